//! # Orchestrator
//!
//! Stateless flow controller. Every operation is an async function over
//! `(flow_id, &EventFlowContext)`; the only shared mutable state is the state
//! store, and every per-row transition runs under its row lock.
//!
//! ## Dispatch discipline
//!
//! Dispatching a processor is always claim-then-assemble-then-enqueue: the
//! store's `try_claim` flips the row Pending -> InProgress under its row
//! lock (re-reading predecessor readiness there), inputs are assembled from
//! persisted predecessor results, and only then is the task enqueued. The
//! enqueue never happens inside a store transaction, so state rows are always
//! visible before the task can run; the claim makes dispatch exactly-once
//! even when sibling completions race.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use eventflow_shared::context::EventFlowContext;
use eventflow_shared::errors::{EventFlowError, EventFlowResult};
use eventflow_shared::graph::FlowGraph;
use eventflow_shared::messaging::ProcessorTask;
use eventflow_shared::models::{self, Flow, FlowStatus, ProcessorStatus};

/// Why a flow is being terminated; maps onto the flow's terminal status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationCause {
    Manual,
    ProcessorError,
}

impl TerminationCause {
    pub fn flow_status(self) -> FlowStatus {
        match self {
            Self::Manual => FlowStatus::Aborted,
            Self::ProcessorError => FlowStatus::Error,
        }
    }
}

async fn require_flow(ctx: &EventFlowContext, flow_id: Uuid) -> EventFlowResult<Flow> {
    ctx.store()
        .flow(flow_id)
        .await?
        .ok_or(EventFlowError::FlowNotFound(flow_id))
}

/// Claim, assemble, and enqueue one processor. Returns whether this call won
/// the claim and actually dispatched.
async fn dispatch_processor(
    ctx: &EventFlowContext,
    graph: &FlowGraph,
    flow: &Flow,
    name: &str,
) -> EventFlowResult<bool> {
    let dependencies = graph.dependencies(name)?;

    if !ctx.store().try_claim(flow.id, name, dependencies).await? {
        debug!(
            flow_id = %flow.id,
            processor = %name,
            "claim lost; processor already dispatched or not ready"
        );
        return Ok(false);
    }

    let inputs = if dependencies.is_empty() {
        Map::new()
    } else {
        ctx.store()
            .assembled_results(flow.id, dependencies, name)
            .await?
    };

    let task = ProcessorTask::new(name, flow.id, flow.root_arguments.clone(), inputs);
    let msg_id = ctx.messaging().send_task(&task).await?;

    info!(
        flow_id = %flow.id,
        processor = %name,
        msg_id,
        inputs = ?dependencies,
        "processor dispatched"
    );
    Ok(true)
}

/// Create a flow of the given type and seed its root processors.
///
/// The flow row and all Pending processor rows are created in one
/// transaction; root tasks are enqueued only after it commits.
pub async fn start_flow(
    ctx: &Arc<EventFlowContext>,
    flow_type: &str,
    root_arguments: Value,
    initiated_by: &str,
) -> EventFlowResult<Uuid> {
    let graph = ctx.graphs().get(flow_type)?;
    let processor_names: Vec<String> = graph.processor_names().map(String::from).collect();

    let flow = ctx
        .store()
        .create_flow(flow_type, root_arguments, initiated_by, &processor_names)
        .await?;

    info!(
        flow_id = %flow.id,
        flow_type = %flow_type,
        initiated_by = %initiated_by,
        processors = processor_names.len(),
        "event flow created"
    );

    for root in graph.roots() {
        dispatch_processor(ctx, &graph, &flow, root).await?;
    }

    Ok(flow.id)
}

/// Processor completion callback: persist the outcome, recompute flow
/// completion, and dispatch any dependents that just became ready.
///
/// A `soft_error` turns the completion into CompletedWithError; dependents
/// still proceed. Submissions against an already-complete row are ignored,
/// and submissions into a terminal flow are persisted but dispatch nothing.
pub async fn submit_result(
    ctx: &Arc<EventFlowContext>,
    flow_id: Uuid,
    processor_name: &str,
    result: Value,
    soft_error: Option<String>,
) -> EventFlowResult<()> {
    let flow = require_flow(ctx, flow_id).await?;
    let graph = ctx.graphs().get(&flow.flow_type)?;
    if !graph.has_node(processor_name) {
        return Err(EventFlowError::Graph(
            eventflow_shared::graph::GraphError::UnknownProcessor(processor_name.to_string()),
        ));
    }

    let applied = ctx
        .store()
        .complete_processor(flow_id, processor_name, result, soft_error)
        .await?;
    if !applied {
        debug!(
            flow_id = %flow_id,
            processor = %processor_name,
            "duplicate completion ignored"
        );
        return Ok(());
    }

    info!(flow_id = %flow_id, processor = %processor_name, "processor completed");

    if ctx.store().complete_flow_if_done(flow_id).await? {
        info!(flow_id = %flow_id, "event flow completed");
        return Ok(());
    }

    // Terminal check happens after persisting: late callbacks into an aborted
    // flow keep their row updated but dispatch nothing further
    let flow = require_flow(ctx, flow_id).await?;
    if flow.status.is_terminal() {
        info!(
            flow_id = %flow_id,
            processor = %processor_name,
            status = %flow.status,
            "flow is terminal; dependents not dispatched"
        );
        return Ok(());
    }

    for dependent in graph.dependents_of(processor_name) {
        dispatch_processor(ctx, &graph, &flow, dependent).await?;
    }
    Ok(())
}

/// Record a transient processor failure. The row moves to RetriableError and
/// the worker machinery decides whether to redeliver; nothing is dispatched.
pub async fn submit_retriable_error(
    ctx: &Arc<EventFlowContext>,
    flow_id: Uuid,
    processor_name: &str,
    trace: &str,
) -> EventFlowResult<()> {
    warn!(flow_id = %flow_id, processor = %processor_name, "processor reported retriable error");
    ctx.store()
        .mark_processor_retriable(flow_id, processor_name, trace)
        .await
}

/// Record a fatal processor failure; optionally abort the whole flow
pub async fn submit_error(
    ctx: &Arc<EventFlowContext>,
    flow_id: Uuid,
    processor_name: &str,
    trace: &str,
    abort: bool,
) -> EventFlowResult<()> {
    warn!(
        flow_id = %flow_id,
        processor = %processor_name,
        abort,
        "processor reported fatal error"
    );
    ctx.store()
        .mark_processor_error(flow_id, processor_name, trace)
        .await?;

    if abort {
        abort_flow(ctx, flow_id, TerminationCause::ProcessorError).await?;
    }
    Ok(())
}

/// Terminate a flow: set its terminal status, flip Pending rows to Aborted,
/// and run the termination processors with empty inputs.
///
/// Idempotent across repeated calls: termination rows are unique per
/// (flow_id, processor_name) and the dispatch claim fires at most once per
/// Pending row.
pub async fn abort_flow(
    ctx: &Arc<EventFlowContext>,
    flow_id: Uuid,
    cause: TerminationCause,
) -> EventFlowResult<()> {
    let flow = require_flow(ctx, flow_id).await?;
    let graph = ctx.graphs().get(&flow.flow_type)?;

    info!(flow_id = %flow_id, cause = ?cause, "aborting event flow");

    ctx.store()
        .set_flow_status(flow_id, cause.flow_status())
        .await?;
    let aborted = ctx.store().mark_pending_aborted(flow_id).await?;
    debug!(flow_id = %flow_id, aborted, "pending processors aborted");

    let termination = graph.termination_processors();
    if termination.is_empty() {
        return Ok(());
    }

    ctx.store()
        .insert_termination_states(flow_id, termination)
        .await?;

    info!(flow_id = %flow_id, handlers = ?termination, "dispatching termination handlers");
    let flow = require_flow(ctx, flow_id).await?;
    for handler in termination {
        dispatch_processor(ctx, &graph, &flow, handler).await?;
    }
    Ok(())
}

/// Admin operation: wipe all processor state and run the flow again from its
/// roots, with the root arguments re-read from the store.
pub async fn reset_and_restart(ctx: &Arc<EventFlowContext>, flow_id: Uuid) -> EventFlowResult<()> {
    let flow = require_flow(ctx, flow_id).await?;
    let graph = ctx.graphs().get(&flow.flow_type)?;

    info!(flow_id = %flow_id, flow_type = %flow.flow_type, "resetting and restarting event flow");

    ctx.store()
        .set_flow_status(flow_id, FlowStatus::Started)
        .await?;
    ctx.store()
        .delete_states(flow_id, graph.termination_processors())
        .await?;
    ctx.store().reset_all_states(flow_id).await?;

    let flow = require_flow(ctx, flow_id).await?;
    for root in graph.roots() {
        dispatch_processor(ctx, &graph, &flow, root).await?;
    }
    Ok(())
}

/// Admin operation: re-run the errored processors of a failed flow.
///
/// Preconditions are checked before any state changes: every errored
/// processor must have all of its predecessors complete, otherwise the flow
/// state needs manual repair and this returns
/// [`EventFlowError::ManualInterventionRequired`].
pub async fn retry_flow(ctx: &Arc<EventFlowContext>, flow_id: Uuid) -> EventFlowResult<()> {
    let flow = require_flow(ctx, flow_id).await?;
    let graph = ctx.graphs().get(&flow.flow_type)?;

    let errored: Vec<String> = ctx
        .store()
        .states_by_status(flow_id, ProcessorStatus::Error)
        .await?
        .into_iter()
        .filter(|name| !graph.is_termination(name))
        .collect();

    for name in &errored {
        let dependencies = graph.dependencies(name)?;
        if !ctx
            .store()
            .all_in_completion_set(flow_id, dependencies)
            .await?
        {
            return Err(EventFlowError::ManualInterventionRequired {
                flow_id,
                processor: name.clone(),
            });
        }
    }

    info!(flow_id = %flow_id, errored = ?errored, "retrying event flow");

    ctx.store()
        .delete_states(flow_id, graph.termination_processors())
        .await?;
    ctx.store().reset_states_for_retry(flow_id).await?;
    ctx.store()
        .set_flow_status(flow_id, FlowStatus::Started)
        .await?;

    let flow = require_flow(ctx, flow_id).await?;
    for name in &errored {
        dispatch_processor(ctx, &graph, &flow, name).await?;
    }
    Ok(())
}

/// Worker-facing helper: note that a redelivered attempt has begun. Moves a
/// RetriableError row back to InProgress; no-op in any other state.
pub async fn mark_attempt_started(
    ctx: &Arc<EventFlowContext>,
    flow_id: Uuid,
    processor_name: &str,
) -> EventFlowResult<()> {
    ctx.store()
        .mark_retry_attempt(flow_id, processor_name)
        .await
}

/// One-line-per-processor status report for a flow
pub async fn flow_summary(ctx: &Arc<EventFlowContext>, flow_id: Uuid) -> EventFlowResult<String> {
    let states = ctx.store().flow_states(flow_id).await?;
    Ok(models::summarize_states(&states))
}
