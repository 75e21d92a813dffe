//! # System Context
//!
//! [`EventFlowContext`] bundles the state store, the message client, the
//! graph registry, and configuration into the one handle that orchestrator
//! functions and workers share. The orchestrator itself is stateless; all of
//! its operations are functions over this context.

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tracing::info;

use crate::config::EventFlowConfig;
use crate::database::MIGRATOR;
use crate::errors::EventFlowResult;
use crate::graph::GraphRegistry;
use crate::messaging::{MessageClient, MessagingProvider, PgmqProvider};
use crate::store::{PgStateStore, StateStore};

/// Shared handle over store, messaging, graphs, and configuration
#[derive(Debug)]
pub struct EventFlowContext {
    store: StateStore,
    messaging: MessageClient,
    graphs: GraphRegistry,
    config: EventFlowConfig,
}

impl EventFlowContext {
    /// Connect to PostgreSQL, run migrations, and ensure the work queue
    pub async fn connect(
        config: EventFlowConfig,
        graphs: GraphRegistry,
    ) -> EventFlowResult<Arc<Self>> {
        let pool = PgPoolOptions::new()
            .max_connections(config.database.max_connections)
            .connect(&config.database.url)
            .await?;
        MIGRATOR.run(&pool).await?;

        let provider = Arc::new(MessagingProvider::Pgmq(
            PgmqProvider::new_with_pool(pool.clone()).await,
        ));
        let messaging = MessageClient::new(provider, config.messaging.queue_name.clone());
        messaging.ensure_queue().await?;

        info!(
            queue = %messaging.queue_name(),
            flow_types = ?graphs.flow_types(),
            "event-flow context connected"
        );

        Ok(Arc::new(Self {
            store: StateStore::Postgres(PgStateStore::new(pool)),
            messaging,
            graphs,
            config,
        }))
    }

    /// Fully in-memory context for hermetic tests
    pub fn for_testing(graphs: GraphRegistry) -> Arc<Self> {
        let config = EventFlowConfig::for_testing();
        let provider = Arc::new(MessagingProvider::new_in_memory());
        let messaging = MessageClient::new(provider, config.messaging.queue_name.clone());

        Arc::new(Self {
            store: StateStore::new_in_memory(),
            messaging,
            graphs,
            config,
        })
    }

    /// In-memory context with a custom configuration (retry tuning in tests)
    pub fn for_testing_with_config(graphs: GraphRegistry, config: EventFlowConfig) -> Arc<Self> {
        let provider = Arc::new(MessagingProvider::new_in_memory());
        let messaging = MessageClient::new(provider, config.messaging.queue_name.clone());

        Arc::new(Self {
            store: StateStore::new_in_memory(),
            messaging,
            graphs,
            config,
        })
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn messaging(&self) -> &MessageClient {
        &self.messaging
    }

    pub fn graphs(&self) -> &GraphRegistry {
        &self.graphs
    }

    pub fn config(&self) -> &EventFlowConfig {
        &self.config
    }
}
