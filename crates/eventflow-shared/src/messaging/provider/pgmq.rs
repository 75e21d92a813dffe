//! PostgreSQL queue backend via pgmq.
//!
//! Wraps `pgmq::PGMQueue` over the shared connection pool. Visibility
//! timeouts and delayed sends map directly onto pgmq's `vt` and `send_delay`;
//! `delete` is the acknowledgement.

use std::time::Duration;

use serde_json::Value;
use sqlx::PgPool;
use tracing::debug;

use crate::messaging::provider::RawMessage;
use crate::messaging::MessagingError;

/// pgmq-backed [`super::MessagingProvider`] variant
pub struct PgmqProvider {
    queue: pgmq::PGMQueue,
    pool: PgPool,
}

impl std::fmt::Debug for PgmqProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgmqProvider").finish_non_exhaustive()
    }
}

impl PgmqProvider {
    /// Build over an existing connection pool
    pub async fn new_with_pool(pool: PgPool) -> Self {
        let queue = pgmq::PGMQueue::new_with_pool(pool.clone()).await;
        Self { queue, pool }
    }

    pub async fn ensure_queue(&self, queue: &str) -> Result<(), MessagingError> {
        self.queue
            .create(queue)
            .await
            .map_err(|e| MessagingError::provider(format!("create queue '{queue}': {e}")))
    }

    pub async fn send(&self, queue: &str, payload: &Value) -> Result<i64, MessagingError> {
        let msg_id = self
            .queue
            .send(queue, payload)
            .await
            .map_err(|e| MessagingError::provider(format!("send to '{queue}': {e}")))?;
        debug!(queue = %queue, msg_id, "message enqueued");
        Ok(msg_id)
    }

    pub async fn send_delayed(
        &self,
        queue: &str,
        payload: &Value,
        delay: Duration,
    ) -> Result<i64, MessagingError> {
        let msg_id = self
            .queue
            .send_delay(queue, payload, delay.as_secs())
            .await
            .map_err(|e| MessagingError::provider(format!("delayed send to '{queue}': {e}")))?;
        debug!(queue = %queue, msg_id, delay_secs = delay.as_secs(), "delayed message enqueued");
        Ok(msg_id)
    }

    pub async fn receive(
        &self,
        queue: &str,
        max: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<RawMessage>, MessagingError> {
        let vt = visibility_timeout.as_secs().min(i32::MAX as u64) as i32;
        let batch = self
            .queue
            .read_batch::<Value>(queue, Some(vt), max.min(i32::MAX as usize) as i32)
            .await
            .map_err(|e| MessagingError::provider(format!("read from '{queue}': {e}")))?;

        Ok(batch
            .unwrap_or_default()
            .into_iter()
            .map(|message| RawMessage {
                id: message.msg_id,
                payload: message.message,
            })
            .collect())
    }

    pub async fn ack(&self, queue: &str, msg_id: i64) -> Result<(), MessagingError> {
        self.queue
            .delete(queue, msg_id)
            .await
            .map_err(|e| MessagingError::provider(format!("ack {msg_id} on '{queue}': {e}")))?;
        Ok(())
    }

    /// Queue depth straight from the pgmq queue table. Queue names come from
    /// configuration, not user input.
    pub async fn depth(&self, queue: &str) -> Result<i64, MessagingError> {
        let count: i64 = sqlx::query_scalar(&format!("SELECT count(*) FROM pgmq.q_{queue}"))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MessagingError::provider(format!("depth of '{queue}': {e}")))?;
        Ok(count)
    }

    pub async fn health_check(&self) -> Result<bool, MessagingError> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MessagingError::provider(format!("health check: {e}")))?;
        Ok(true)
    }
}
