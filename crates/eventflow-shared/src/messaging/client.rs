//! Domain-level messaging client.
//!
//! Owns (de)serialization of [`ProcessorTask`] over a raw-payload provider.
//! A payload that fails to deserialize is acked and dropped with a warning so
//! one malformed message cannot poison the queue.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use super::message::{ProcessorTask, QueuedMessage, ReceiptHandle};
use super::provider::MessagingProvider;
use super::MessagingError;

/// Task-queue client for orchestrator and workers
#[derive(Debug, Clone)]
pub struct MessageClient {
    provider: Arc<MessagingProvider>,
    queue_name: String,
}

impl MessageClient {
    pub fn new(provider: Arc<MessagingProvider>, queue_name: impl Into<String>) -> Self {
        Self {
            provider,
            queue_name: queue_name.into(),
        }
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.provider_name()
    }

    /// Create the work queue if it does not exist; idempotent
    pub async fn ensure_queue(&self) -> Result<(), MessagingError> {
        self.provider.ensure_queue(&self.queue_name).await
    }

    pub async fn send_task(&self, task: &ProcessorTask) -> Result<i64, MessagingError> {
        let payload = serde_json::to_value(task)?;
        self.provider.send(&self.queue_name, &payload).await
    }

    /// Enqueue a task that becomes visible only after `delay`; used for
    /// rate-limit redelivery backoff
    pub async fn send_task_delayed(
        &self,
        task: &ProcessorTask,
        delay: Duration,
    ) -> Result<i64, MessagingError> {
        let payload = serde_json::to_value(task)?;
        self.provider
            .send_delayed(&self.queue_name, &payload, delay)
            .await
    }

    pub async fn receive_tasks(
        &self,
        max: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueuedMessage<ProcessorTask>>, MessagingError> {
        let raw = self
            .provider
            .receive(&self.queue_name, max, visibility_timeout)
            .await?;

        let mut tasks = Vec::with_capacity(raw.len());
        for message in raw {
            match serde_json::from_value::<ProcessorTask>(message.payload.clone()) {
                Ok(task) => tasks.push(QueuedMessage {
                    message: task,
                    receipt: ReceiptHandle(message.id),
                }),
                Err(e) => {
                    warn!(
                        queue = %self.queue_name,
                        msg_id = message.id,
                        error = %e,
                        "dropping malformed task payload"
                    );
                    self.provider.ack(&self.queue_name, message.id).await?;
                }
            }
        }
        Ok(tasks)
    }

    pub async fn ack(&self, receipt: ReceiptHandle) -> Result<(), MessagingError> {
        self.provider.ack(&self.queue_name, receipt.0).await
    }

    /// Total messages in the work queue, visible or not
    pub async fn queue_depth(&self) -> Result<i64, MessagingError> {
        self.provider.depth(&self.queue_name).await
    }

    pub async fn health_check(&self) -> Result<bool, MessagingError> {
        self.provider.health_check().await
    }
}
