//! # Data Model
//!
//! Record types for the two persisted tables: `event_flows` and
//! `event_flow_processor_states`. Status enums are stored as text and parsed
//! back through [`FromStr`]; the store layers own the SQL.
//!
//! A processor state is exclusively owned by its flow (cascade delete) and
//! `(flow_id, processor_name)` is unique, which is what makes dispatch and
//! termination-handler creation idempotent under at-least-once delivery.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Raised when a persisted status column holds an unknown value
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid status value '{0}'")]
pub struct InvalidStatusError(pub String);

/// Lifecycle status of a flow
///
/// Terminal set = {Completed, Error, Aborted}. A terminal flow absorbs late
/// processor callbacks but never dispatches further work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowStatus {
    Started,
    Completed,
    Error,
    Aborted,
}

impl FlowStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Aborted => "aborted",
        }
    }

    /// True once the flow can make no further automatic progress
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Aborted)
    }
}

impl fmt::Display for FlowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FlowStatus {
    type Err = InvalidStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "started" => Ok(Self::Started),
            "completed" => Ok(Self::Completed),
            "error" => Ok(Self::Error),
            "aborted" => Ok(Self::Aborted),
            other => Err(InvalidStatusError(other.to_string())),
        }
    }
}

/// Lifecycle status of a single processor within a flow
///
/// Completion set = {Completed, CompletedWithError}: the statuses that
/// satisfy a dependent's readiness check. RetriableError is transient; the
/// queue layer redelivers and the runtime moves the row back to InProgress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessorStatus {
    Pending,
    InProgress,
    Completed,
    CompletedWithError,
    Error,
    RetriableError,
    Aborted,
}

impl ProcessorStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::CompletedWithError => "completed_with_error",
            Self::Error => "error",
            Self::RetriableError => "retriable_error",
            Self::Aborted => "aborted",
        }
    }

    /// True when this status satisfies a dependent's readiness check
    pub fn is_complete(self) -> bool {
        matches!(self, Self::Completed | Self::CompletedWithError)
    }

    /// The statuses a Retry operation resets back to Pending
    pub fn is_resettable_for_retry(self) -> bool {
        matches!(
            self,
            Self::Pending | Self::Error | Self::Aborted | Self::CompletedWithError
        )
    }
}

impl fmt::Display for ProcessorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessorStatus {
    type Err = InvalidStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "completed_with_error" => Ok(Self::CompletedWithError),
            "error" => Ok(Self::Error),
            "retriable_error" => Ok(Self::RetriableError),
            "aborted" => Ok(Self::Aborted),
            other => Err(InvalidStatusError(other.to_string())),
        }
    }
}

/// One execution of a flow graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    pub id: Uuid,
    pub flow_type: String,
    /// Opaque arguments supplied at creation; passed to every processor unchanged
    pub root_arguments: Value,
    pub status: FlowStatus,
    /// Free-form identifier of the initiating caller or event
    pub initiated_by: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub run_duration_ms: Option<i64>,
}

/// Per-processor state row within a flow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorState {
    pub id: Uuid,
    pub flow_id: Uuid,
    pub processor_name: String,
    pub status: ProcessorStatus,
    /// Structured output on success or partial success
    pub result: Option<Value>,
    /// Error trace on Error or CompletedWithError
    pub error: Option<String>,
    /// Trace of the most recent retriable failure; overwritten per retry
    pub retriable_error: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub run_duration_ms: Option<i64>,
}

/// One-line-per-processor status report for admin and ops callers
pub fn summarize_states(states: &[ProcessorState]) -> String {
    use std::fmt::Write;

    let mut out = String::new();
    for state in states {
        let duration = state
            .run_duration_ms
            .map(|ms| format!("{ms}ms"))
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(
            out,
            "{:<28}:{}:{}",
            state.processor_name, state.status, duration
        );
    }
    out
}
