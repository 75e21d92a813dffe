//! # Processor Runtime
//!
//! The host wrapping every processor execution:
//!
//! 1. Hydrate the flow record, retrying with exponential backoff to cover
//!    the window between task enqueue and the creating transaction becoming
//!    visible to this worker.
//! 2. Note redelivered attempts (RetriableError -> InProgress).
//! 3. Run the body and classify the outcome
//!    ([`crate::outcome::classify_outcome`]).
//! 4. Report to the orchestrator and tell the worker loop whether the task
//!    needs redelivery.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use uuid::Uuid;

use eventflow_orchestration as orchestrator;
use eventflow_shared::context::EventFlowContext;
use eventflow_shared::errors::{EventFlowError, EventFlowResult};
use eventflow_shared::messaging::ProcessorTask;
use eventflow_shared::models::Flow;

use crate::outcome::{classify_outcome, ProcessorOutcome};
use crate::processor::ProcessorContext;
use crate::registry::ProcessorRegistry;

/// What the worker loop should do with the message after a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunDisposition {
    /// Ack the message; the outcome has been reported
    Completed,
    /// Re-enqueue the task (attempt + 1) with this delay, then ack
    RetryAfter(Duration),
}

/// Executes processor tasks against the shared context
#[derive(Debug, Clone)]
pub struct ProcessorRuntime {
    ctx: Arc<EventFlowContext>,
    registry: Arc<ProcessorRegistry>,
}

impl ProcessorRuntime {
    pub fn new(ctx: Arc<EventFlowContext>, registry: Arc<ProcessorRegistry>) -> Self {
        Self { ctx, registry }
    }

    /// Run one task end to end and report its outcome
    pub async fn run(&self, task: &ProcessorTask) -> EventFlowResult<RunDisposition> {
        let flow = self.hydrate_flow(task.flow_id).await?;

        // On redelivery the row sits in RetriableError; flip it back so the
        // persisted trace shows one InProgress per attempt
        orchestrator::mark_attempt_started(&self.ctx, task.flow_id, &task.processor_name).await?;

        let processor = self.registry.build(&task.processor_name)?;

        info!(
            flow_id = %task.flow_id,
            processor = %task.processor_name,
            attempt = task.attempt,
            "processor execution starting"
        );

        let body_ctx = ProcessorContext {
            flow_id: flow.id,
            root_arguments: task.root_arguments.clone(),
            inputs: task.inputs.clone(),
        };
        let result = processor.execute(&body_ctx).await;
        let outcome = classify_outcome(
            result,
            processor.fallback_result(),
            task.attempt,
            &self.ctx.config().retry,
        );

        self.report(task, outcome).await
    }

    /// Fetch the flow record, retrying the not-yet-visible race with
    /// exponential backoff
    async fn hydrate_flow(&self, flow_id: Uuid) -> EventFlowResult<Flow> {
        let worker_cfg = &self.ctx.config().worker;
        let max_retries = worker_cfg.flow_lookup_max_retries;
        let mut delay = Duration::from_millis(worker_cfg.flow_lookup_base_delay_ms);

        for attempt in 1..=max_retries {
            if let Some(flow) = self.ctx.store().flow(flow_id).await? {
                if attempt > 1 {
                    info!(flow_id = %flow_id, attempt, "flow record found after retry");
                }
                return Ok(flow);
            }
            if attempt < max_retries {
                warn!(
                    flow_id = %flow_id,
                    attempt,
                    max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "flow record not yet visible, backing off"
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }

        error!(flow_id = %flow_id, max_retries, "flow record not found after retries");
        Err(EventFlowError::FlowNotFound(flow_id))
    }

    async fn report(
        &self,
        task: &ProcessorTask,
        outcome: ProcessorOutcome,
    ) -> EventFlowResult<RunDisposition> {
        let flow_id = task.flow_id;
        let name = task.processor_name.as_str();

        match outcome {
            ProcessorOutcome::Success(result) => {
                info!(flow_id = %flow_id, processor = %name, "processor done");
                orchestrator::submit_result(&self.ctx, flow_id, name, result, None).await?;
                Ok(RunDisposition::Completed)
            }

            ProcessorOutcome::SuccessWithError { result, trace } => {
                warn!(
                    flow_id = %flow_id,
                    processor = %name,
                    "processor done with fallback result"
                );
                orchestrator::submit_result(&self.ctx, flow_id, name, result, Some(trace)).await?;
                Ok(RunDisposition::Completed)
            }

            ProcessorOutcome::Retriable {
                trace,
                redeliver_after,
            } => {
                orchestrator::submit_retriable_error(&self.ctx, flow_id, name, &trace).await?;
                match redeliver_after {
                    Some(delay) => {
                        info!(
                            flow_id = %flow_id,
                            processor = %name,
                            attempt = task.attempt,
                            delay_secs = delay.as_secs(),
                            "scheduling redelivery"
                        );
                        Ok(RunDisposition::RetryAfter(delay))
                    }
                    None => Ok(RunDisposition::Completed),
                }
            }

            ProcessorOutcome::Fatal { trace } => {
                error!(flow_id = %flow_id, processor = %name, "processor failed fatally");
                orchestrator::submit_error(&self.ctx, flow_id, name, &trace, true).await?;
                Ok(RunDisposition::Completed)
            }
        }
    }
}
