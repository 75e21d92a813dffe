//! # Task-Queue Messaging
//!
//! Dispatch of processor work to the worker pool. One named queue carries
//! every orchestrator task; delivery is at-least-once with a visibility
//! timeout, and idempotence is provided by the state store (unique
//! `(flow_id, processor_name)` rows and claim-guarded dispatch), not by the
//! queue.
//!
//! ## Design
//!
//! ```text
//! MessageClient
//!   ├── provider: Arc<MessagingProvider>   <- pgmq | in-memory, enum dispatch
//!   └── queue_name: String                 <- single work queue
//! ```
//!
//! Providers deal in raw JSON payloads; the client owns (de)serialization of
//! [`ProcessorTask`].

pub mod client;
pub mod message;
pub mod provider;

pub use client::MessageClient;
pub use message::{ProcessorTask, QueuedMessage, ReceiptHandle};
pub use provider::{InMemoryProvider, MessagingProvider, PgmqProvider, RawMessage};

/// Messaging-layer errors
#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    /// The underlying queue backend failed
    #[error("queue provider error: {0}")]
    Provider(String),

    #[error("message serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal messaging failure: {0}")]
    Internal(String),
}

impl MessagingError {
    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}
