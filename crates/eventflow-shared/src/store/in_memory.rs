//! In-memory state store for hermetic tests and embedder test harnesses.
//!
//! A single async mutex over the whole store plays the role of the
//! PostgreSQL row lock: every read-modify-write runs under it, so claim
//! races resolve exactly as they do against the database. No lock is held
//! across an await point.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use crate::errors::{EventFlowError, EventFlowResult};
use crate::models::{Flow, FlowStatus, ProcessorState, ProcessorStatus};

#[derive(Debug, Default)]
struct StoreState {
    flows: HashMap<Uuid, Flow>,
    /// State rows per flow, in creation order
    states: HashMap<Uuid, Vec<ProcessorState>>,
}

/// In-memory [`super::StateStore`] variant
#[derive(Debug, Clone, Default)]
pub struct InMemoryStateStore {
    inner: Arc<Mutex<StoreState>>,
}

fn finish_timing(state: &mut ProcessorState) {
    state.end_time = Some(Utc::now());
    match (state.start_time, state.end_time) {
        (Some(start), Some(end)) => {
            state.run_duration_ms = Some((end - start).num_milliseconds());
        }
        _ => {
            warn!(
                flow_id = %state.flow_id,
                processor = %state.processor_name,
                "processor finished without a start_time"
            );
        }
    }
}

fn clear_state(state: &mut ProcessorState) {
    state.status = ProcessorStatus::Pending;
    state.result = None;
    state.error = None;
    state.retriable_error = None;
    state.start_time = None;
    state.end_time = None;
    state.run_duration_ms = None;
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state_row<'a>(
        rows: &'a mut Vec<ProcessorState>,
        flow_id: Uuid,
        name: &str,
    ) -> EventFlowResult<&'a mut ProcessorState> {
        rows.iter_mut()
            .find(|s| s.processor_name == name)
            .ok_or_else(|| EventFlowError::ProcessorStateNotFound {
                flow_id,
                processor: name.to_string(),
            })
    }

    pub async fn create_flow(
        &self,
        flow_type: &str,
        root_arguments: Value,
        initiated_by: &str,
        processor_names: &[String],
    ) -> EventFlowResult<Flow> {
        let mut store = self.inner.lock().await;
        let flow = Flow {
            id: Uuid::new_v4(),
            flow_type: flow_type.to_string(),
            root_arguments,
            status: FlowStatus::Started,
            initiated_by: initiated_by.to_string(),
            start_time: Utc::now(),
            end_time: None,
            run_duration_ms: None,
        };

        let rows = processor_names
            .iter()
            .map(|name| ProcessorState {
                id: Uuid::new_v4(),
                flow_id: flow.id,
                processor_name: name.clone(),
                status: ProcessorStatus::Pending,
                result: None,
                error: None,
                retriable_error: None,
                start_time: None,
                end_time: None,
                run_duration_ms: None,
            })
            .collect();

        store.states.insert(flow.id, rows);
        store.flows.insert(flow.id, flow.clone());
        Ok(flow)
    }

    pub async fn flow(&self, flow_id: Uuid) -> EventFlowResult<Option<Flow>> {
        let store = self.inner.lock().await;
        Ok(store.flows.get(&flow_id).cloned())
    }

    pub async fn flow_states(&self, flow_id: Uuid) -> EventFlowResult<Vec<ProcessorState>> {
        let store = self.inner.lock().await;
        Ok(store.states.get(&flow_id).cloned().unwrap_or_default())
    }

    pub async fn processor_state(
        &self,
        flow_id: Uuid,
        name: &str,
    ) -> EventFlowResult<Option<ProcessorState>> {
        let store = self.inner.lock().await;
        Ok(store
            .states
            .get(&flow_id)
            .and_then(|rows| rows.iter().find(|s| s.processor_name == name))
            .cloned())
    }

    pub async fn set_flow_status(
        &self,
        flow_id: Uuid,
        status: FlowStatus,
    ) -> EventFlowResult<()> {
        let mut store = self.inner.lock().await;
        let flow = store
            .flows
            .get_mut(&flow_id)
            .ok_or(EventFlowError::FlowNotFound(flow_id))?;

        flow.status = status;
        if status.is_terminal() {
            let end = Utc::now();
            flow.end_time = Some(end);
            flow.run_duration_ms = Some((end - flow.start_time).num_milliseconds());
        } else {
            flow.end_time = None;
            flow.run_duration_ms = None;
        }
        Ok(())
    }

    pub async fn complete_flow_if_done(&self, flow_id: Uuid) -> EventFlowResult<bool> {
        let mut store = self.inner.lock().await;
        let all_completed = store
            .states
            .get(&flow_id)
            .map(|rows| {
                !rows.is_empty() && rows.iter().all(|s| s.status == ProcessorStatus::Completed)
            })
            .unwrap_or(false);

        let flow = store
            .flows
            .get_mut(&flow_id)
            .ok_or(EventFlowError::FlowNotFound(flow_id))?;

        if flow.status != FlowStatus::Started || !all_completed {
            return Ok(false);
        }

        let end = Utc::now();
        flow.status = FlowStatus::Completed;
        flow.end_time = Some(end);
        flow.run_duration_ms = Some((end - flow.start_time).num_milliseconds());
        Ok(true)
    }

    pub async fn try_claim(
        &self,
        flow_id: Uuid,
        name: &str,
        predecessors: &[String],
    ) -> EventFlowResult<bool> {
        let mut store = self.inner.lock().await;
        let rows = store
            .states
            .get_mut(&flow_id)
            .ok_or(EventFlowError::FlowNotFound(flow_id))?;

        let ready = predecessors.iter().all(|p| {
            rows.iter()
                .any(|s| s.processor_name == *p && s.status.is_complete())
        });
        if !ready {
            return Ok(false);
        }

        let state = Self::state_row(rows, flow_id, name)?;
        if state.status != ProcessorStatus::Pending {
            return Ok(false);
        }

        state.status = ProcessorStatus::InProgress;
        state.start_time = Some(Utc::now());
        Ok(true)
    }

    pub async fn mark_retry_attempt(&self, flow_id: Uuid, name: &str) -> EventFlowResult<()> {
        let mut store = self.inner.lock().await;
        let rows = store
            .states
            .get_mut(&flow_id)
            .ok_or(EventFlowError::FlowNotFound(flow_id))?;
        let state = Self::state_row(rows, flow_id, name)?;

        if state.status == ProcessorStatus::RetriableError {
            state.status = ProcessorStatus::InProgress;
            state.start_time = Some(Utc::now());
            state.end_time = None;
            state.run_duration_ms = None;
        }
        Ok(())
    }

    pub async fn complete_processor(
        &self,
        flow_id: Uuid,
        name: &str,
        result: Value,
        soft_error: Option<String>,
    ) -> EventFlowResult<bool> {
        let mut store = self.inner.lock().await;
        let rows = store
            .states
            .get_mut(&flow_id)
            .ok_or(EventFlowError::FlowNotFound(flow_id))?;
        let state = Self::state_row(rows, flow_id, name)?;

        if state.status.is_complete() {
            return Ok(false);
        }

        state.result = Some(result);
        match soft_error {
            Some(trace) => {
                state.error = Some(trace);
                state.status = ProcessorStatus::CompletedWithError;
            }
            None => state.status = ProcessorStatus::Completed,
        }
        finish_timing(state);
        Ok(true)
    }

    pub async fn mark_processor_error(
        &self,
        flow_id: Uuid,
        name: &str,
        trace: &str,
    ) -> EventFlowResult<()> {
        let mut store = self.inner.lock().await;
        let rows = store
            .states
            .get_mut(&flow_id)
            .ok_or(EventFlowError::FlowNotFound(flow_id))?;
        let state = Self::state_row(rows, flow_id, name)?;

        state.error = Some(trace.to_string());
        state.status = ProcessorStatus::Error;
        finish_timing(state);
        Ok(())
    }

    pub async fn mark_processor_retriable(
        &self,
        flow_id: Uuid,
        name: &str,
        trace: &str,
    ) -> EventFlowResult<()> {
        let mut store = self.inner.lock().await;
        let rows = store
            .states
            .get_mut(&flow_id)
            .ok_or(EventFlowError::FlowNotFound(flow_id))?;
        let state = Self::state_row(rows, flow_id, name)?;

        state.retriable_error = Some(trace.to_string());
        state.status = ProcessorStatus::RetriableError;
        finish_timing(state);
        Ok(())
    }

    pub async fn mark_pending_aborted(&self, flow_id: Uuid) -> EventFlowResult<u64> {
        let mut store = self.inner.lock().await;
        let rows = store
            .states
            .get_mut(&flow_id)
            .ok_or(EventFlowError::FlowNotFound(flow_id))?;

        let mut flipped = 0;
        for state in rows.iter_mut() {
            if state.status == ProcessorStatus::Pending {
                state.status = ProcessorStatus::Aborted;
                flipped += 1;
            }
        }
        Ok(flipped)
    }

    pub async fn insert_termination_states(
        &self,
        flow_id: Uuid,
        names: &[String],
    ) -> EventFlowResult<()> {
        let mut store = self.inner.lock().await;
        let rows = store
            .states
            .get_mut(&flow_id)
            .ok_or(EventFlowError::FlowNotFound(flow_id))?;

        for name in names {
            if rows.iter().any(|s| s.processor_name == *name) {
                continue;
            }
            rows.push(ProcessorState {
                id: Uuid::new_v4(),
                flow_id,
                processor_name: name.clone(),
                status: ProcessorStatus::Pending,
                result: None,
                error: None,
                retriable_error: None,
                start_time: None,
                end_time: None,
                run_duration_ms: None,
            });
        }
        Ok(())
    }

    pub async fn delete_states(&self, flow_id: Uuid, names: &[String]) -> EventFlowResult<()> {
        let mut store = self.inner.lock().await;
        if let Some(rows) = store.states.get_mut(&flow_id) {
            rows.retain(|s| !names.contains(&s.processor_name));
        }
        Ok(())
    }

    pub async fn reset_states_for_retry(&self, flow_id: Uuid) -> EventFlowResult<()> {
        let mut store = self.inner.lock().await;
        if let Some(rows) = store.states.get_mut(&flow_id) {
            for state in rows.iter_mut() {
                if state.status.is_resettable_for_retry() {
                    clear_state(state);
                }
            }
        }
        Ok(())
    }

    pub async fn reset_all_states(&self, flow_id: Uuid) -> EventFlowResult<()> {
        let mut store = self.inner.lock().await;
        if let Some(rows) = store.states.get_mut(&flow_id) {
            for state in rows.iter_mut() {
                clear_state(state);
            }
        }
        Ok(())
    }

    pub async fn assembled_results(
        &self,
        flow_id: Uuid,
        predecessors: &[String],
        dependent: &str,
    ) -> EventFlowResult<Map<String, Value>> {
        let store = self.inner.lock().await;
        let rows = store
            .states
            .get(&flow_id)
            .ok_or(EventFlowError::FlowNotFound(flow_id))?;

        let mut assembled = Map::new();
        for predecessor in predecessors {
            let result = rows
                .iter()
                .find(|s| s.processor_name == *predecessor)
                .and_then(|s| s.result.clone())
                .ok_or_else(|| EventFlowError::MissingPredecessorResult {
                    flow_id,
                    processor: dependent.to_string(),
                    predecessor: predecessor.clone(),
                })?;
            assembled.insert(predecessor.clone(), result);
        }
        Ok(assembled)
    }

    pub async fn states_by_status(
        &self,
        flow_id: Uuid,
        status: ProcessorStatus,
    ) -> EventFlowResult<Vec<String>> {
        let store = self.inner.lock().await;
        Ok(store
            .states
            .get(&flow_id)
            .map(|rows| {
                rows.iter()
                    .filter(|s| s.status == status)
                    .map(|s| s.processor_name.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    pub async fn all_in_completion_set(
        &self,
        flow_id: Uuid,
        names: &[String],
    ) -> EventFlowResult<bool> {
        let store = self.inner.lock().await;
        let rows = store
            .states
            .get(&flow_id)
            .ok_or(EventFlowError::FlowNotFound(flow_id))?;
        Ok(names.iter().all(|name| {
            rows.iter()
                .any(|s| s.processor_name == *name && s.status.is_complete())
        }))
    }
}
