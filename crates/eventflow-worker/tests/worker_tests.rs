//! Worker and runtime integration tests over the in-memory context.
//!
//! The test configuration zeroes redelivery delays, so `Worker::drain` runs
//! retry loops to their conclusion deterministically.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use eventflow_orchestration::start_flow;
use eventflow_shared::context::EventFlowContext;
use eventflow_shared::errors::EventFlowError;
use eventflow_shared::graph::{FlowGraph, GraphRegistry};
use eventflow_shared::messaging::ProcessorTask;
use eventflow_shared::models::{FlowStatus, ProcessorStatus};
use eventflow_worker::{Processor, ProcessorContext, ProcessorError, ProcessorRegistry, Worker};

#[derive(Debug)]
struct Echo;

#[async_trait]
impl Processor for Echo {
    async fn execute(&self, ctx: &ProcessorContext) -> Result<Value, ProcessorError> {
        Ok(json!({"ok": true, "root": ctx.root_arguments, "inputs": ctx.inputs.len()}))
    }
}

/// Rate-limited for the first `fail_times` calls, then succeeds
#[derive(Debug)]
struct Throttled {
    calls: Arc<AtomicU32>,
    fail_times: u32,
}

#[async_trait]
impl Processor for Throttled {
    async fn execute(&self, _ctx: &ProcessorContext) -> Result<Value, ProcessorError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.fail_times {
            Err(ProcessorError::rate_limited(format!(
                "throttled on call {call}"
            )))
        } else {
            Ok(json!({"succeeded_on_call": call}))
        }
    }
}

#[derive(Debug)]
struct CriticalBoom;

#[async_trait]
impl Processor for CriticalBoom {
    async fn execute(&self, _ctx: &ProcessorContext) -> Result<Value, ProcessorError> {
        Err(ProcessorError::critical_with_trace(
            "unrecoverable body failure",
            "trace: unrecoverable body failure",
        ))
    }
}

#[derive(Debug)]
struct FailWithFallback;

#[async_trait]
impl Processor for FailWithFallback {
    async fn execute(&self, _ctx: &ProcessorContext) -> Result<Value, ProcessorError> {
        Err(ProcessorError::failed("upstream returned garbage"))
    }

    fn fallback_result(&self) -> Option<Value> {
        Some(json!({"score": "B1", "degraded": true}))
    }
}

#[derive(Debug)]
struct FailNoFallback;

#[async_trait]
impl Processor for FailNoFallback {
    async fn execute(&self, _ctx: &ProcessorContext) -> Result<Value, ProcessorError> {
        Err(ProcessorError::failed("flaky dependency"))
    }
}

/// Termination handler that counts invocations
#[derive(Debug)]
struct Cleanup {
    runs: Arc<AtomicU32>,
}

#[async_trait]
impl Processor for Cleanup {
    async fn execute(&self, _ctx: &ProcessorContext) -> Result<Value, ProcessorError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(json!({}))
    }
}

fn single_node_registry() -> GraphRegistry {
    let mut graphs = GraphRegistry::new();
    graphs.insert(
        FlowGraph::builder("single")
            .processor("P", &[])
            .termination("Cleanup")
            .build()
            .unwrap(),
    );
    graphs
}

fn chain_registry() -> GraphRegistry {
    let mut graphs = GraphRegistry::new();
    graphs.insert(
        FlowGraph::builder("chain")
            .processor("A", &[])
            .processor("B", &["A"])
            .processor("C", &["B"])
            .termination("Cleanup")
            .build()
            .unwrap(),
    );
    graphs
}

fn cleanup_counter(registry: &mut ProcessorRegistry) -> Arc<AtomicU32> {
    let runs = Arc::new(AtomicU32::new(0));
    let handle = runs.clone();
    registry.register("Cleanup", move || {
        Box::new(Cleanup {
            runs: handle.clone(),
        })
    });
    runs
}

async fn status_of(ctx: &Arc<EventFlowContext>, flow_id: Uuid, name: &str) -> ProcessorStatus {
    ctx.store()
        .processor_state(flow_id, name)
        .await
        .unwrap()
        .unwrap()
        .status
}

#[tokio::test]
async fn test_happy_path_chain_completes() {
    let ctx = EventFlowContext::for_testing(chain_registry());
    let mut registry = ProcessorRegistry::new();
    for name in ["A", "B", "C"] {
        registry.register(name, || Box::new(Echo));
    }
    cleanup_counter(&mut registry);
    let worker = Worker::new(ctx.clone(), Arc::new(registry)).unwrap();

    let flow_id = start_flow(&ctx, "chain", json!({"text": "hello"}), "tester")
        .await
        .unwrap();
    worker.drain().await.unwrap();

    let flow = ctx.store().flow(flow_id).await.unwrap().unwrap();
    assert_eq!(flow.status, FlowStatus::Completed);
    for name in ["A", "B", "C"] {
        let state = ctx
            .store()
            .processor_state(flow_id, name)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.status, ProcessorStatus::Completed);
        assert!(state.result.is_some());
        assert!(state.run_duration_ms.is_some());
    }
    // B saw exactly A's result as input
    let b_result = ctx
        .store()
        .processor_state(flow_id, "B")
        .await
        .unwrap()
        .unwrap()
        .result
        .unwrap();
    assert_eq!(b_result["inputs"], json!(1));
}

#[tokio::test]
async fn test_rate_limited_processor_retries_until_success() {
    let ctx = EventFlowContext::for_testing(single_node_registry());
    let mut registry = ProcessorRegistry::new();
    let calls = Arc::new(AtomicU32::new(0));
    let handle = calls.clone();
    registry.register("P", move || {
        Box::new(Throttled {
            calls: handle.clone(),
            fail_times: 3,
        })
    });
    cleanup_counter(&mut registry);
    let worker = Worker::new(ctx.clone(), Arc::new(registry)).unwrap();

    let flow_id = start_flow(&ctx, "single", json!({}), "tester").await.unwrap();
    worker.drain().await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 4);
    let state = ctx
        .store()
        .processor_state(flow_id, "P")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state.status, ProcessorStatus::Completed);
    assert_eq!(state.result, Some(json!({"succeeded_on_call": 4})));
    // Only the most recent retriable trace is kept
    assert_eq!(
        state.retriable_error.as_deref(),
        Some("throttled on call 3")
    );

    let flow = ctx.store().flow(flow_id).await.unwrap().unwrap();
    assert_eq!(flow.status, FlowStatus::Completed);
}

#[tokio::test]
async fn test_rate_limited_exhaustion_turns_into_flow_abort() {
    let ctx = EventFlowContext::for_testing(single_node_registry());
    let mut registry = ProcessorRegistry::new();
    let calls = Arc::new(AtomicU32::new(0));
    let handle = calls.clone();
    registry.register("P", move || {
        Box::new(Throttled {
            calls: handle.clone(),
            fail_times: u32::MAX,
        })
    });
    let cleanup_runs = cleanup_counter(&mut registry);
    let worker = Worker::new(ctx.clone(), Arc::new(registry)).unwrap();

    let flow_id = start_flow(&ctx, "single", json!({}), "tester").await.unwrap();
    worker.drain().await.unwrap();

    // max_attempts executions, then the failure is reported as fatal
    assert_eq!(calls.load(Ordering::SeqCst), 5);
    let state = ctx
        .store()
        .processor_state(flow_id, "P")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state.status, ProcessorStatus::Error);
    assert!(state.error.as_deref().unwrap().contains("5 attempts"));

    let flow = ctx.store().flow(flow_id).await.unwrap().unwrap();
    assert_eq!(flow.status, FlowStatus::Error);
    assert_eq!(cleanup_runs.load(Ordering::SeqCst), 1);
    assert_eq!(
        status_of(&ctx, flow_id, "Cleanup").await,
        ProcessorStatus::Completed
    );
}

#[tokio::test]
async fn test_critical_failure_aborts_flow_and_runs_termination() {
    let ctx = EventFlowContext::for_testing(chain_registry());
    let mut registry = ProcessorRegistry::new();
    registry.register("A", || Box::new(Echo));
    registry.register("B", || Box::new(CriticalBoom));
    registry.register("C", || Box::new(Echo));
    let cleanup_runs = cleanup_counter(&mut registry);
    let worker = Worker::new(ctx.clone(), Arc::new(registry)).unwrap();

    let flow_id = start_flow(&ctx, "chain", json!({}), "tester").await.unwrap();
    worker.drain().await.unwrap();

    assert_eq!(status_of(&ctx, flow_id, "A").await, ProcessorStatus::Completed);
    assert_eq!(status_of(&ctx, flow_id, "B").await, ProcessorStatus::Error);
    assert_eq!(status_of(&ctx, flow_id, "C").await, ProcessorStatus::Aborted);
    assert_eq!(
        status_of(&ctx, flow_id, "Cleanup").await,
        ProcessorStatus::Completed
    );
    assert_eq!(cleanup_runs.load(Ordering::SeqCst), 1);

    let flow = ctx.store().flow(flow_id).await.unwrap().unwrap();
    assert_eq!(flow.status, FlowStatus::Error);

    let b_state = ctx
        .store()
        .processor_state(flow_id, "B")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        b_state.error.as_deref(),
        Some("trace: unrecoverable body failure")
    );
}

#[tokio::test]
async fn test_fallback_result_degrades_to_partial_success() {
    let ctx = EventFlowContext::for_testing(chain_registry());
    let mut registry = ProcessorRegistry::new();
    registry.register("A", || Box::new(FailWithFallback));
    registry.register("B", || Box::new(Echo));
    registry.register("C", || Box::new(Echo));
    cleanup_counter(&mut registry);
    let worker = Worker::new(ctx.clone(), Arc::new(registry)).unwrap();

    let flow_id = start_flow(&ctx, "chain", json!({}), "tester").await.unwrap();
    worker.drain().await.unwrap();

    let a_state = ctx
        .store()
        .processor_state(flow_id, "A")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(a_state.status, ProcessorStatus::CompletedWithError);
    assert_eq!(a_state.result, Some(json!({"score": "B1", "degraded": true})));
    assert_eq!(a_state.error.as_deref(), Some("upstream returned garbage"));

    // Downstream still ran on the fallback data
    assert_eq!(status_of(&ctx, flow_id, "B").await, ProcessorStatus::Completed);
    assert_eq!(status_of(&ctx, flow_id, "C").await, ProcessorStatus::Completed);

    // A partial completion keeps the flow out of Completed
    let flow = ctx.store().flow(flow_id).await.unwrap().unwrap();
    assert_eq!(flow.status, FlowStatus::Started);
}

#[tokio::test]
async fn test_generic_failure_parks_without_redelivery() {
    let ctx = EventFlowContext::for_testing(single_node_registry());
    let mut registry = ProcessorRegistry::new();
    registry.register("P", || Box::new(FailNoFallback));
    cleanup_counter(&mut registry);
    let worker = Worker::new(ctx.clone(), Arc::new(registry)).unwrap();

    let flow_id = start_flow(&ctx, "single", json!({}), "tester").await.unwrap();
    let handled = worker.drain().await.unwrap();

    assert_eq!(handled, 1);
    let state = ctx
        .store()
        .processor_state(flow_id, "P")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state.status, ProcessorStatus::RetriableError);
    assert_eq!(state.retriable_error.as_deref(), Some("flaky dependency"));

    // No redelivery was scheduled and the flow stays open
    assert_eq!(ctx.messaging().queue_depth().await.unwrap(), 0);
    let flow = ctx.store().flow(flow_id).await.unwrap().unwrap();
    assert_eq!(flow.status, FlowStatus::Started);
}

#[tokio::test]
async fn test_task_for_unknown_flow_is_dropped_after_lookup_retries() {
    let ctx = EventFlowContext::for_testing(single_node_registry());
    let mut registry = ProcessorRegistry::new();
    registry.register("P", || Box::new(Echo));
    cleanup_counter(&mut registry);
    let worker = Worker::new(ctx.clone(), Arc::new(registry)).unwrap();

    let orphan = ProcessorTask::new("P", Uuid::new_v4(), json!({}), Map::new());
    ctx.messaging().send_task(&orphan).await.unwrap();

    worker.drain().await.unwrap();
    // Acked away rather than poisoning the queue
    assert_eq!(ctx.messaging().queue_depth().await.unwrap(), 0);
}

#[tokio::test]
async fn test_worker_construction_validates_registry() {
    let ctx = EventFlowContext::for_testing(single_node_registry());
    let mut registry = ProcessorRegistry::new();
    registry.register("P", || Box::new(Echo));
    // Cleanup missing

    let err = Worker::new(ctx, Arc::new(registry)).unwrap_err();
    assert!(matches!(err, EventFlowError::UnregisteredProcessor(name) if name == "Cleanup"));
}
