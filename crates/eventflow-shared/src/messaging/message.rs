//! Queue message types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// One unit of processor work, as carried on the wire
///
/// `inputs` maps each predecessor name to its persisted result; empty for
/// root and termination processors. `attempt` is queue-layer retry metadata:
/// zero on first dispatch, incremented on each rate-limit redelivery. Older
/// producers omit it, hence the serde default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorTask {
    pub processor_name: String,
    pub flow_id: Uuid,
    pub root_arguments: Value,
    pub inputs: Map<String, Value>,
    #[serde(default)]
    pub attempt: u32,
}

impl ProcessorTask {
    pub fn new(
        processor_name: impl Into<String>,
        flow_id: Uuid,
        root_arguments: Value,
        inputs: Map<String, Value>,
    ) -> Self {
        Self {
            processor_name: processor_name.into(),
            flow_id,
            root_arguments,
            inputs,
            attempt: 0,
        }
    }

    /// The same task, one attempt later; used for rate-limit redelivery
    pub fn next_attempt(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self.clone()
        }
    }
}

/// Provider message id; passed back to acknowledge a processed message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReceiptHandle(pub i64);

/// A received message together with its acknowledgement receipt
#[derive(Debug, Clone)]
pub struct QueuedMessage<T> {
    pub message: T,
    pub receipt: ReceiptHandle,
}
