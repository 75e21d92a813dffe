//! # Processor Contract
//!
//! A processor is a named node of a flow graph with a body that consumes the
//! flow's root arguments plus its predecessors' results and returns a
//! structured result. Bodies must be re-entrant: the runtime may invoke the
//! same logical processor more than once across retries and redeliveries.

use async_trait::async_trait;
use serde_json::{Map, Value};
use uuid::Uuid;

/// Read-only execution context handed to a processor body
#[derive(Debug, Clone)]
pub struct ProcessorContext {
    /// Owning flow, for logging and correlation
    pub flow_id: Uuid,
    /// Arguments supplied when the flow was started; identical for every
    /// processor of the flow
    pub root_arguments: Value,
    /// Predecessor name -> persisted result; empty for roots and termination
    /// handlers
    pub inputs: Map<String, Value>,
}

impl ProcessorContext {
    /// Result of a named predecessor, if present
    pub fn input(&self, predecessor: &str) -> Option<&Value> {
        self.inputs.get(predecessor)
    }
}

/// Failure classification a processor body can raise
///
/// The runtime maps these onto persisted states and flow effects: `Critical`
/// aborts the flow, `RateLimited` is redelivered with backoff, and `Failed`
/// either degrades to the processor's fallback result or parks the state as
/// retriable.
#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    /// Fatal: the flow cannot meaningfully continue
    #[error("critical processor failure: {message}")]
    Critical { message: String, trace: String },

    /// Transient, recognised rate-limit or throttling condition
    #[error("rate limited: {message}")]
    RateLimited { message: String },

    /// Any other failure
    #[error("processor failure: {message}")]
    Failed { message: String, trace: String },
}

impl ProcessorError {
    pub fn critical(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::Critical {
            trace: message.clone(),
            message,
        }
    }

    pub fn critical_with_trace(message: impl Into<String>, trace: impl Into<String>) -> Self {
        Self::Critical {
            message: message.into(),
            trace: trace.into(),
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::RateLimited {
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::Failed {
            trace: message.clone(),
            message,
        }
    }

    /// The trace string persisted to the state row
    pub fn trace(&self) -> &str {
        match self {
            Self::Critical { trace, .. } | Self::Failed { trace, .. } => trace,
            Self::RateLimited { message } => message,
        }
    }
}

impl From<serde_json::Error> for ProcessorError {
    fn from(e: serde_json::Error) -> Self {
        Self::failed(format!("malformed processor data: {e}"))
    }
}

/// A processor body
///
/// Implementations are registered by name in a
/// [`crate::registry::ProcessorRegistry`] and constructed per execution.
#[async_trait]
pub trait Processor: Send + Sync + std::fmt::Debug {
    /// Run the body. Returning `Ok` completes the processor; the error
    /// variants are classified per [`ProcessorError`].
    async fn execute(&self, ctx: &ProcessorContext) -> Result<Value, ProcessorError>;

    /// Partial result to hand downstream when the body fails with
    /// [`ProcessorError::Failed`]. Reported as a completion-with-error so
    /// aggregators still receive data.
    fn fallback_result(&self) -> Option<Value> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_traces() {
        let err = ProcessorError::critical("db gone");
        assert_eq!(err.trace(), "db gone");

        let err = ProcessorError::critical_with_trace("db gone", "stack...");
        assert_eq!(err.trace(), "stack...");
        assert!(err.to_string().contains("db gone"));

        let err = ProcessorError::rate_limited("429 from upstream");
        assert_eq!(err.trace(), "429 from upstream");
    }

    #[test]
    fn test_serde_errors_become_generic_failures() {
        let json_err = serde_json::from_str::<Value>("not json").unwrap_err();
        let err: ProcessorError = json_err.into();
        assert!(matches!(err, ProcessorError::Failed { .. }));
    }

    #[test]
    fn test_context_input_lookup() {
        let mut inputs = Map::new();
        inputs.insert("Coherence".to_string(), serde_json::json!({"score": "B2"}));
        let ctx = ProcessorContext {
            flow_id: Uuid::new_v4(),
            root_arguments: serde_json::json!({}),
            inputs,
        };

        assert!(ctx.input("Coherence").is_some());
        assert!(ctx.input("Vocab").is_none());
    }
}
