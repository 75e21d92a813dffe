//! # Worker Loop
//!
//! Polls the task queue and feeds each delivery through the
//! [`ProcessorRuntime`]. Acknowledgement policy:
//!
//! - reported outcomes (including fatal ones) ack the message;
//! - rate-limit retries re-enqueue a delayed copy with attempt + 1, then ack;
//! - tasks for unknown flows or unregistered processors are acked and logged,
//!   since redelivery cannot fix them;
//! - infrastructure failures (store or queue down) leave the message unacked
//!   so the visibility timeout redelivers it.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use eventflow_shared::context::EventFlowContext;
use eventflow_shared::errors::{EventFlowError, EventFlowResult};
use eventflow_shared::messaging::{ProcessorTask, QueuedMessage};

use crate::registry::ProcessorRegistry;
use crate::runtime::{ProcessorRuntime, RunDisposition};

/// Queue-driven processor worker
#[derive(Debug, Clone)]
pub struct Worker {
    ctx: Arc<EventFlowContext>,
    runtime: ProcessorRuntime,
}

impl Worker {
    /// Build a worker, validating the registry against every flow graph the
    /// context knows about
    pub fn new(
        ctx: Arc<EventFlowContext>,
        registry: Arc<ProcessorRegistry>,
    ) -> EventFlowResult<Self> {
        for flow_type in ctx.graphs().flow_types() {
            let graph = ctx.graphs().get(flow_type)?;
            registry.validate_against(&graph)?;
        }

        info!(
            processors = ?registry.names(),
            queue = %ctx.messaging().queue_name(),
            "worker ready"
        );

        Ok(Self {
            runtime: ProcessorRuntime::new(ctx.clone(), registry),
            ctx,
        })
    }

    /// Receive and process one batch; returns how many tasks were handled
    pub async fn run_once(&self) -> EventFlowResult<usize> {
        let messaging_cfg = &self.ctx.config().messaging;
        let deliveries = self
            .ctx
            .messaging()
            .receive_tasks(
                messaging_cfg.batch_size as usize,
                Duration::from_secs(messaging_cfg.visibility_timeout_secs),
            )
            .await?;

        let handled = deliveries.len();
        for delivery in deliveries {
            self.process_delivery(delivery).await;
        }
        Ok(handled)
    }

    /// Process until the queue yields nothing; returns the total handled.
    /// Intended for tests and batch drains, where "empty" means done because
    /// redelivery delays are zero.
    pub async fn drain(&self) -> EventFlowResult<usize> {
        let mut total = 0;
        loop {
            let handled = self.run_once().await?;
            if handled == 0 {
                return Ok(total);
            }
            total += handled;
        }
    }

    /// Poll the queue forever. Run under `tokio::select!` against a shutdown
    /// future to stop it.
    pub async fn run(&self) -> EventFlowResult<()> {
        let poll_interval = Duration::from_millis(self.ctx.config().worker.poll_interval_ms);
        loop {
            match self.run_once().await {
                Ok(0) => tokio::time::sleep(poll_interval).await,
                Ok(_) => {}
                Err(e) => {
                    error!(error = %e, "worker poll failed; backing off");
                    tokio::time::sleep(poll_interval).await;
                }
            }
        }
    }

    async fn process_delivery(&self, delivery: QueuedMessage<ProcessorTask>) {
        let task = delivery.message;
        let receipt = delivery.receipt;

        match self.runtime.run(&task).await {
            Ok(RunDisposition::Completed) => {
                self.ack(&task, receipt).await;
            }
            Ok(RunDisposition::RetryAfter(delay)) => {
                let retried = task.next_attempt();
                match self.ctx.messaging().send_task_delayed(&retried, delay).await {
                    Ok(_) => self.ack(&task, receipt).await,
                    Err(e) => {
                        // Leave the original unacked; the visibility timeout
                        // will redeliver the same attempt
                        error!(
                            flow_id = %task.flow_id,
                            processor = %task.processor_name,
                            error = %e,
                            "failed to schedule redelivery"
                        );
                    }
                }
            }
            Err(e) if task_is_unrunnable(&e) => {
                warn!(
                    flow_id = %task.flow_id,
                    processor = %task.processor_name,
                    error = %e,
                    "dropping unrunnable task"
                );
                self.ack(&task, receipt).await;
            }
            Err(e) => {
                error!(
                    flow_id = %task.flow_id,
                    processor = %task.processor_name,
                    error = %e,
                    "task processing failed; message will be redelivered"
                );
            }
        }
    }

    async fn ack(&self, task: &ProcessorTask, receipt: eventflow_shared::messaging::ReceiptHandle) {
        if let Err(e) = self.ctx.messaging().ack(receipt).await {
            // Redelivery of an already-reported outcome is absorbed by the
            // store's idempotence rules
            warn!(
                flow_id = %task.flow_id,
                processor = %task.processor_name,
                error = %e,
                "failed to ack processed message"
            );
        }
    }
}

/// Errors redelivery cannot fix: the task itself is bad
fn task_is_unrunnable(error: &EventFlowError) -> bool {
    matches!(
        error,
        EventFlowError::FlowNotFound(_)
            | EventFlowError::UnregisteredProcessor(_)
            | EventFlowError::ProcessorStateNotFound { .. }
            | EventFlowError::Graph(_)
            | EventFlowError::UnknownFlowType(_)
    )
}
