//! # EventFlow Shared Components
//!
//! Shared foundation for the event-flow orchestration system: the data model,
//! durable state store, task-queue messaging, flow-graph registry,
//! configuration, and telemetry bootstrap.
//!
//! ## Architecture
//!
//! ```text
//! eventflow-shared
//!   ├── models      <- Flow / ProcessorState records and status enums
//!   ├── graph       <- validated flow graphs (DAGs) + registry by flow type
//!   ├── store       <- StateStore (enum): PostgreSQL | in-memory
//!   ├── messaging   <- MessageClient over MessagingProvider (enum): pgmq | in-memory
//!   ├── context     <- EventFlowContext: the one handle orchestrator and workers share
//!   ├── config      <- layered configuration (defaults < file < env)
//!   ├── database    <- sqlx migrator for the two state tables
//!   └── telemetry   <- tracing-subscriber bootstrap
//! ```
//!
//! Provider-style components use enum dispatch rather than trait objects; the
//! in-memory variants back hermetic tests and embedder test harnesses.

pub mod config;
pub mod context;
pub mod database;
pub mod errors;
pub mod graph;
pub mod messaging;
pub mod models;
pub mod store;
pub mod telemetry;

pub use config::EventFlowConfig;
pub use context::EventFlowContext;
pub use errors::{EventFlowError, EventFlowResult};
pub use graph::{FlowGraph, GraphError, GraphRegistry};
pub use models::{Flow, FlowStatus, ProcessorState, ProcessorStatus};
