//! # EventFlow Orchestration
//!
//! The controller of the event-flow system: flow creation, processor
//! completion callbacks, dependent readiness and dispatch, abort with
//! termination handlers, and the retry/reset admin operations.
//!
//! The orchestrator is a stateless module, not an object: every operation is
//! an async function over a shared [`eventflow_shared::EventFlowContext`].
//! Workers call back into the same functions after running a processor body,
//! so progress is driven entirely by task-queue delivery; there is no
//! dedicated orchestrator daemon.

pub mod catalog;
pub mod orchestrator;

pub use orchestrator::{
    abort_flow, flow_summary, mark_attempt_started, reset_and_restart, retry_flow, start_flow,
    submit_error, submit_result, submit_retriable_error, TerminationCause,
};
