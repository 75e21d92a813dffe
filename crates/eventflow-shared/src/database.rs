//! Embedded sqlx migrations for the event-flow state tables.

/// Migrator for `event_flows` and `event_flow_processor_states`.
///
/// Applied automatically by [`crate::context::EventFlowContext::connect`];
/// also usable directly against any `PgPool`.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
