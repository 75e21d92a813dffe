//! In-memory queue backend for hermetic tests.
//!
//! Mirrors the pgmq visibility semantics: a received message stays invisible
//! until its visibility timeout lapses, then is redelivered unless acked.
//! Every operation takes the state mutex once, so a message is delivered to
//! exactly one of any number of concurrent receivers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::messaging::provider::RawMessage;
use crate::messaging::MessagingError;

#[derive(Debug)]
struct StoredMessage {
    id: i64,
    payload: Value,
    visible_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct QueueState {
    queues: HashMap<String, Vec<StoredMessage>>,
    next_id: i64,
}

/// In-memory [`super::MessagingProvider`] variant
#[derive(Debug, Clone, Default)]
pub struct InMemoryProvider {
    state: Arc<Mutex<QueueState>>,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, QueueState>, MessagingError> {
        self.state
            .lock()
            .map_err(|_| MessagingError::internal("in-memory queue mutex poisoned"))
    }

    pub fn ensure_queue(&self, queue: &str) -> Result<(), MessagingError> {
        let mut state = self.lock()?;
        state.queues.entry(queue.to_string()).or_default();
        Ok(())
    }

    pub fn send(
        &self,
        queue: &str,
        payload: &Value,
        delay: Duration,
    ) -> Result<i64, MessagingError> {
        let mut state = self.lock()?;
        state.next_id += 1;
        let id = state.next_id;
        let visible_at = Utc::now()
            + chrono::Duration::from_std(delay)
                .map_err(|e| MessagingError::internal(format!("delay out of range: {e}")))?;
        state
            .queues
            .entry(queue.to_string())
            .or_default()
            .push(StoredMessage {
                id,
                payload: payload.clone(),
                visible_at,
            });
        Ok(id)
    }

    pub fn receive(
        &self,
        queue: &str,
        max: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<RawMessage>, MessagingError> {
        let mut state = self.lock()?;
        let now = Utc::now();
        let hidden_until = now
            + chrono::Duration::from_std(visibility_timeout)
                .map_err(|e| MessagingError::internal(format!("timeout out of range: {e}")))?;

        let Some(messages) = state.queues.get_mut(queue) else {
            return Ok(Vec::new());
        };

        let mut delivered = Vec::new();
        for message in messages.iter_mut() {
            if delivered.len() >= max {
                break;
            }
            if message.visible_at <= now {
                message.visible_at = hidden_until;
                delivered.push(RawMessage {
                    id: message.id,
                    payload: message.payload.clone(),
                });
            }
        }
        Ok(delivered)
    }

    pub fn ack(&self, queue: &str, msg_id: i64) -> Result<(), MessagingError> {
        let mut state = self.lock()?;
        if let Some(messages) = state.queues.get_mut(queue) {
            messages.retain(|m| m.id != msg_id);
        }
        Ok(())
    }

    pub fn depth(&self, queue: &str) -> Result<i64, MessagingError> {
        let state = self.lock()?;
        Ok(state.queues.get(queue).map(|q| q.len() as i64).unwrap_or(0))
    }
}
