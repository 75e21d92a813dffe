//! # Error Types
//!
//! One `thiserror` enum per concern, converging on [`EventFlowError`] at the
//! orchestration boundary. Programmer errors (unknown flow type, missing
//! predecessor output, unsatisfied retry preconditions) are distinct variants
//! so callers can tell them apart from runtime conditions.

use uuid::Uuid;

use crate::graph::GraphError;
use crate::messaging::MessagingError;
use crate::models::InvalidStatusError;

/// Result alias used throughout the workspace
pub type EventFlowResult<T> = Result<T, EventFlowError>;

/// Top-level error for orchestration, store, and worker operations
#[derive(Debug, thiserror::Error)]
pub enum EventFlowError {
    /// The flow record does not exist (or is not yet visible to this worker)
    #[error("event flow {0} not found")]
    FlowNotFound(Uuid),

    /// The flow type has no graph declared in the registry
    #[error("unknown flow type '{0}'")]
    UnknownFlowType(String),

    /// No state row exists for this (flow, processor) pair
    #[error("no state row for processor '{processor}' in flow {flow_id}")]
    ProcessorStateNotFound { flow_id: Uuid, processor: String },

    /// A ready dependent was dispatched but a predecessor result is missing.
    /// This is a bug, not a runtime condition.
    #[error(
        "no persisted result for predecessor '{predecessor}' of '{processor}' in flow {flow_id}"
    )]
    MissingPredecessorResult {
        flow_id: Uuid,
        processor: String,
        predecessor: String,
    },

    /// Retry was requested for an errored processor whose predecessors are
    /// not complete; the flow state must be repaired by hand
    #[error(
        "processor '{processor}' in flow {flow_id} is in error state but its \
         predecessors are not done; manual intervention required"
    )]
    ManualInterventionRequired { flow_id: Uuid, processor: String },

    /// No constructor registered for a processor name
    #[error("no processor registered under name '{0}'")]
    UnregisteredProcessor(String),

    #[error("graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("messaging error: {0}")]
    Messaging(#[from] MessagingError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// A persisted status column held a value outside the known set
    #[error(transparent)]
    InvalidStatus(#[from] InvalidStatusError),

    #[error("{0}")]
    Internal(String),
}

impl EventFlowError {
    /// True for errors that indicate a bug or misconfiguration rather than a
    /// transient runtime condition; redelivery will not help these.
    pub fn is_programmer_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownFlowType(_)
                | Self::ProcessorStateNotFound { .. }
                | Self::MissingPredecessorResult { .. }
                | Self::UnregisteredProcessor(_)
                | Self::Graph(_)
                | Self::Configuration(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_programmer_error_classification() {
        assert!(EventFlowError::UnknownFlowType("speaking".into()).is_programmer_error());
        assert!(EventFlowError::UnregisteredProcessor("Vocab".into()).is_programmer_error());
        assert!(!EventFlowError::FlowNotFound(Uuid::new_v4()).is_programmer_error());
        assert!(!EventFlowError::Internal("boom".into()).is_programmer_error());
    }

    #[test]
    fn test_display_includes_identifiers() {
        let flow_id = Uuid::new_v4();
        let err = EventFlowError::MissingPredecessorResult {
            flow_id,
            processor: "WritingFinalScore".into(),
            predecessor: "Coherence".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("WritingFinalScore"));
        assert!(msg.contains("Coherence"));
        assert!(msg.contains(&flow_id.to_string()));
    }
}
