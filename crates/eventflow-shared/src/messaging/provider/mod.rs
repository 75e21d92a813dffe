//! Messaging backends behind one enum; no trait objects.

pub mod in_memory;
pub mod pgmq;

use std::time::Duration;

use serde_json::Value;

use super::MessagingError;

pub use in_memory::InMemoryProvider;
pub use pgmq::PgmqProvider;

/// A delivered message before task deserialization
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub id: i64,
    pub payload: Value,
}

/// Queue backend: PostgreSQL (pgmq) in production, in-memory for tests
#[derive(Debug)]
pub enum MessagingProvider {
    Pgmq(PgmqProvider),
    InMemory(InMemoryProvider),
}

impl MessagingProvider {
    pub fn new_in_memory() -> Self {
        Self::InMemory(InMemoryProvider::new())
    }

    pub fn provider_name(&self) -> &'static str {
        match self {
            Self::Pgmq(_) => "pgmq",
            Self::InMemory(_) => "in_memory",
        }
    }

    /// Create the queue if it does not exist; idempotent
    pub async fn ensure_queue(&self, queue: &str) -> Result<(), MessagingError> {
        match self {
            Self::Pgmq(p) => p.ensure_queue(queue).await,
            Self::InMemory(p) => p.ensure_queue(queue),
        }
    }

    pub async fn send(&self, queue: &str, payload: &Value) -> Result<i64, MessagingError> {
        match self {
            Self::Pgmq(p) => p.send(queue, payload).await,
            Self::InMemory(p) => p.send(queue, payload, Duration::ZERO),
        }
    }

    /// Send a message that becomes visible only after `delay`
    pub async fn send_delayed(
        &self,
        queue: &str,
        payload: &Value,
        delay: Duration,
    ) -> Result<i64, MessagingError> {
        match self {
            Self::Pgmq(p) => p.send_delayed(queue, payload, delay).await,
            Self::InMemory(p) => p.send(queue, payload, delay),
        }
    }

    /// Receive up to `max` visible messages, hiding them for
    /// `visibility_timeout`
    pub async fn receive(
        &self,
        queue: &str,
        max: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<RawMessage>, MessagingError> {
        match self {
            Self::Pgmq(p) => p.receive(queue, max, visibility_timeout).await,
            Self::InMemory(p) => p.receive(queue, max, visibility_timeout),
        }
    }

    /// Acknowledge (delete) a processed message
    pub async fn ack(&self, queue: &str, msg_id: i64) -> Result<(), MessagingError> {
        match self {
            Self::Pgmq(p) => p.ack(queue, msg_id).await,
            Self::InMemory(p) => p.ack(queue, msg_id),
        }
    }

    /// Total messages currently in the queue, visible or not
    pub async fn depth(&self, queue: &str) -> Result<i64, MessagingError> {
        match self {
            Self::Pgmq(p) => p.depth(queue).await,
            Self::InMemory(p) => p.depth(queue),
        }
    }

    pub async fn health_check(&self) -> Result<bool, MessagingError> {
        match self {
            Self::Pgmq(p) => p.health_check().await,
            Self::InMemory(_) => Ok(true),
        }
    }
}
