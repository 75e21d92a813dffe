//! # Outcome Classification
//!
//! The runtime turns a processor body's `Result` into a [`ProcessorOutcome`]:
//! a tagged value that fully determines what gets reported to the
//! orchestrator and whether the task is redelivered. Keeping this a pure
//! function makes the classification ladder testable without a queue or
//! store.

use std::time::Duration;

use serde_json::Value;

use eventflow_shared::config::RetryConfig;

use crate::processor::ProcessorError;

/// Classified result of one processor execution attempt
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessorOutcome {
    /// Body returned normally; report the result
    Success(Value),
    /// Body failed but supplied a fallback; report result plus error trace so
    /// downstream aggregators still receive partial data
    SuccessWithError { result: Value, trace: String },
    /// Transient failure. `redeliver_after` carries the backoff delay when
    /// the queue should retry; `None` parks the state without redelivery.
    Retriable {
        trace: String,
        redeliver_after: Option<Duration>,
    },
    /// Fatal failure; the flow aborts
    Fatal { trace: String },
}

/// Exponential redelivery backoff: base doubles per attempt, capped
pub fn retry_backoff(retry: &RetryConfig, attempt: u32) -> Duration {
    let exponent = attempt.min(63);
    let delay = retry
        .base_delay_secs
        .saturating_mul(1u64 << exponent)
        .min(retry.max_delay_secs);
    Duration::from_secs(delay)
}

/// Classify one execution attempt.
///
/// `attempt` is zero-based; a rate-limited failure on the final allowed
/// attempt becomes fatal, which is how a persistently throttled processor
/// eventually surfaces as a flow abort.
pub fn classify_outcome(
    result: Result<Value, ProcessorError>,
    fallback: Option<Value>,
    attempt: u32,
    retry: &RetryConfig,
) -> ProcessorOutcome {
    match result {
        Ok(value) => ProcessorOutcome::Success(value),

        Err(ProcessorError::Critical { trace, .. }) => ProcessorOutcome::Fatal { trace },

        Err(err @ ProcessorError::RateLimited { .. }) => {
            if attempt + 1 >= retry.max_attempts {
                ProcessorOutcome::Fatal {
                    trace: format!(
                        "{} (gave up after {} attempts)",
                        err.trace(),
                        attempt + 1
                    ),
                }
            } else {
                ProcessorOutcome::Retriable {
                    trace: err.trace().to_string(),
                    redeliver_after: Some(retry_backoff(retry, attempt)),
                }
            }
        }

        Err(ProcessorError::Failed { trace, .. }) => match fallback {
            Some(result) => ProcessorOutcome::SuccessWithError { result, trace },
            None => ProcessorOutcome::Retriable {
                trace,
                redeliver_after: None,
            },
        },
    }
}
