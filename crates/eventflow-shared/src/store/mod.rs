//! # State Store
//!
//! Durable storage for [`Flow`] and [`ProcessorState`] records. All
//! orchestrator writes go through this layer; workers never touch state
//! directly. Per-row transitions are serialised by a row-level lock
//! (`SELECT ... FOR UPDATE` on PostgreSQL, the store mutex in memory), which
//! is what the exactly-once dispatch guarantee rests on.
//!
//! [`StateStore::try_claim`] is the dispatch primitive: under the dependent's
//! row lock it re-reads predecessor states, and flips Pending to InProgress
//! only when every predecessor is in the completion set. Two racing
//! completion callbacks can therefore never both claim the same dependent.

pub mod in_memory;
pub mod postgres;

use serde_json::{Map, Value};
use uuid::Uuid;

use crate::errors::EventFlowResult;
use crate::models::{Flow, ProcessorState, ProcessorStatus};

pub use in_memory::InMemoryStateStore;
pub use postgres::PgStateStore;

/// Storage backend: PostgreSQL in production, in-memory for tests
#[derive(Debug)]
pub enum StateStore {
    Postgres(PgStateStore),
    InMemory(InMemoryStateStore),
}

impl StateStore {
    pub fn new_in_memory() -> Self {
        Self::InMemory(InMemoryStateStore::new())
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            Self::Postgres(_) => "postgres",
            Self::InMemory(_) => "in_memory",
        }
    }

    /// Atomically create a flow (Started) plus one Pending state row per
    /// processor name
    pub async fn create_flow(
        &self,
        flow_type: &str,
        root_arguments: Value,
        initiated_by: &str,
        processor_names: &[String],
    ) -> EventFlowResult<Flow> {
        match self {
            Self::Postgres(s) => {
                s.create_flow(flow_type, root_arguments, initiated_by, processor_names)
                    .await
            }
            Self::InMemory(s) => {
                s.create_flow(flow_type, root_arguments, initiated_by, processor_names)
                    .await
            }
        }
    }

    pub async fn flow(&self, flow_id: Uuid) -> EventFlowResult<Option<Flow>> {
        match self {
            Self::Postgres(s) => s.flow(flow_id).await,
            Self::InMemory(s) => s.flow(flow_id).await,
        }
    }

    /// All state rows of a flow, in a stable per-backend order
    pub async fn flow_states(&self, flow_id: Uuid) -> EventFlowResult<Vec<ProcessorState>> {
        match self {
            Self::Postgres(s) => s.flow_states(flow_id).await,
            Self::InMemory(s) => s.flow_states(flow_id).await,
        }
    }

    pub async fn processor_state(
        &self,
        flow_id: Uuid,
        name: &str,
    ) -> EventFlowResult<Option<ProcessorState>> {
        match self {
            Self::Postgres(s) => s.processor_state(flow_id, name).await,
            Self::InMemory(s) => s.processor_state(flow_id, name).await,
        }
    }

    /// Set the flow status. Entering a terminal status stamps end_time and
    /// run_duration; returning to Started clears them.
    pub async fn set_flow_status(
        &self,
        flow_id: Uuid,
        status: crate::models::FlowStatus,
    ) -> EventFlowResult<()> {
        match self {
            Self::Postgres(s) => s.set_flow_status(flow_id, status).await,
            Self::InMemory(s) => s.set_flow_status(flow_id, status).await,
        }
    }

    /// Transition a Started flow to Completed when every state row is
    /// strictly Completed. Returns whether the transition happened.
    pub async fn complete_flow_if_done(&self, flow_id: Uuid) -> EventFlowResult<bool> {
        match self {
            Self::Postgres(s) => s.complete_flow_if_done(flow_id).await,
            Self::InMemory(s) => s.complete_flow_if_done(flow_id).await,
        }
    }

    /// Claim a processor for dispatch: under the row lock, require status
    /// Pending and every predecessor complete, then set InProgress with a
    /// fresh start_time. Returns false when the claim is lost (already
    /// claimed, or predecessors incomplete).
    pub async fn try_claim(
        &self,
        flow_id: Uuid,
        name: &str,
        predecessors: &[String],
    ) -> EventFlowResult<bool> {
        match self {
            Self::Postgres(s) => s.try_claim(flow_id, name, predecessors).await,
            Self::InMemory(s) => s.try_claim(flow_id, name, predecessors).await,
        }
    }

    /// RetriableError -> InProgress with a fresh start_time; no-op in any
    /// other state. Called by the runtime when a redelivered attempt begins.
    pub async fn mark_retry_attempt(&self, flow_id: Uuid, name: &str) -> EventFlowResult<()> {
        match self {
            Self::Postgres(s) => s.mark_retry_attempt(flow_id, name).await,
            Self::InMemory(s) => s.mark_retry_attempt(flow_id, name).await,
        }
    }

    /// Persist a completion. Returns false (and changes nothing) when the row
    /// is already in the completion set, making late or duplicate submissions
    /// idempotent.
    pub async fn complete_processor(
        &self,
        flow_id: Uuid,
        name: &str,
        result: Value,
        soft_error: Option<String>,
    ) -> EventFlowResult<bool> {
        match self {
            Self::Postgres(s) => s.complete_processor(flow_id, name, result, soft_error).await,
            Self::InMemory(s) => s.complete_processor(flow_id, name, result, soft_error).await,
        }
    }

    pub async fn mark_processor_error(
        &self,
        flow_id: Uuid,
        name: &str,
        trace: &str,
    ) -> EventFlowResult<()> {
        match self {
            Self::Postgres(s) => s.mark_processor_error(flow_id, name, trace).await,
            Self::InMemory(s) => s.mark_processor_error(flow_id, name, trace).await,
        }
    }

    /// Record a retriable failure; `retriable_error` keeps only the latest trace
    pub async fn mark_processor_retriable(
        &self,
        flow_id: Uuid,
        name: &str,
        trace: &str,
    ) -> EventFlowResult<()> {
        match self {
            Self::Postgres(s) => s.mark_processor_retriable(flow_id, name, trace).await,
            Self::InMemory(s) => s.mark_processor_retriable(flow_id, name, trace).await,
        }
    }

    /// Flip every Pending row to Aborted in one statement; returns the count
    pub async fn mark_pending_aborted(&self, flow_id: Uuid) -> EventFlowResult<u64> {
        match self {
            Self::Postgres(s) => s.mark_pending_aborted(flow_id).await,
            Self::InMemory(s) => s.mark_pending_aborted(flow_id).await,
        }
    }

    /// Create Pending rows for termination processors; existing rows are left
    /// untouched (unique on flow_id + processor_name)
    pub async fn insert_termination_states(
        &self,
        flow_id: Uuid,
        names: &[String],
    ) -> EventFlowResult<()> {
        match self {
            Self::Postgres(s) => s.insert_termination_states(flow_id, names).await,
            Self::InMemory(s) => s.insert_termination_states(flow_id, names).await,
        }
    }

    pub async fn delete_states(&self, flow_id: Uuid, names: &[String]) -> EventFlowResult<()> {
        match self {
            Self::Postgres(s) => s.delete_states(flow_id, names).await,
            Self::InMemory(s) => s.delete_states(flow_id, names).await,
        }
    }

    /// Retry reset: {Pending, Error, Aborted, CompletedWithError} -> Pending
    /// with cleared result, errors, and timings
    pub async fn reset_states_for_retry(&self, flow_id: Uuid) -> EventFlowResult<()> {
        match self {
            Self::Postgres(s) => s.reset_states_for_retry(flow_id).await,
            Self::InMemory(s) => s.reset_states_for_retry(flow_id).await,
        }
    }

    /// Full reset: every row -> Pending with cleared result, errors, timings
    pub async fn reset_all_states(&self, flow_id: Uuid) -> EventFlowResult<()> {
        match self {
            Self::Postgres(s) => s.reset_all_states(flow_id).await,
            Self::InMemory(s) => s.reset_all_states(flow_id).await,
        }
    }

    /// Assemble `{predecessor -> result}` for a dependent about to be
    /// dispatched. A missing row or missing result is a programmer error.
    pub async fn assembled_results(
        &self,
        flow_id: Uuid,
        predecessors: &[String],
        dependent: &str,
    ) -> EventFlowResult<Map<String, Value>> {
        match self {
            Self::Postgres(s) => s.assembled_results(flow_id, predecessors, dependent).await,
            Self::InMemory(s) => s.assembled_results(flow_id, predecessors, dependent).await,
        }
    }

    pub async fn states_by_status(
        &self,
        flow_id: Uuid,
        status: ProcessorStatus,
    ) -> EventFlowResult<Vec<String>> {
        match self {
            Self::Postgres(s) => s.states_by_status(flow_id, status).await,
            Self::InMemory(s) => s.states_by_status(flow_id, status).await,
        }
    }

    /// True when every named processor is in the completion set
    pub async fn all_in_completion_set(
        &self,
        flow_id: Uuid,
        names: &[String],
    ) -> EventFlowResult<bool> {
        match self {
            Self::Postgres(s) => s.all_in_completion_set(flow_id, names).await,
            Self::InMemory(s) => s.all_in_completion_set(flow_id, names).await,
        }
    }
}
