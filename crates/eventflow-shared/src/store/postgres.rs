//! PostgreSQL state store.
//!
//! Row-level serialisation comes from `SELECT ... FOR UPDATE` inside short
//! transactions; no transaction is ever held across a queue call. Queries are
//! built at runtime (no compile-time checked macros) so the crate builds
//! without a live database; rows are mapped by hand.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::warn;
use uuid::Uuid;

use crate::errors::{EventFlowError, EventFlowResult};
use crate::models::{Flow, FlowStatus, ProcessorState, ProcessorStatus};

/// PostgreSQL-backed [`super::StateStore`] variant
#[derive(Debug, Clone)]
pub struct PgStateStore {
    pool: PgPool,
}

fn map_flow(row: &PgRow) -> EventFlowResult<Flow> {
    let status: String = row.try_get("status")?;
    Ok(Flow {
        id: row.try_get("id")?,
        flow_type: row.try_get("flow_type")?,
        root_arguments: row.try_get("root_arguments")?,
        status: status.parse::<FlowStatus>()?,
        initiated_by: row.try_get("initiated_by")?,
        start_time: row.try_get("start_time")?,
        end_time: row.try_get("end_time")?,
        run_duration_ms: row.try_get("run_duration_ms")?,
    })
}

fn map_state(row: &PgRow) -> EventFlowResult<ProcessorState> {
    let status: String = row.try_get("status")?;
    Ok(ProcessorState {
        id: row.try_get("id")?,
        flow_id: row.try_get("flow_id")?,
        processor_name: row.try_get("processor_name")?,
        status: status.parse::<ProcessorStatus>()?,
        result: row.try_get("result")?,
        error: row.try_get("error")?,
        retriable_error: row.try_get("retriable_error")?,
        start_time: row.try_get("start_time")?,
        end_time: row.try_get("end_time")?,
        run_duration_ms: row.try_get("run_duration_ms")?,
    })
}

fn duration_ms(start: Option<DateTime<Utc>>, end: DateTime<Utc>) -> Option<i64> {
    start.map(|s| (end - s).num_milliseconds())
}

impl PgStateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn create_flow(
        &self,
        flow_type: &str,
        root_arguments: Value,
        initiated_by: &str,
        processor_names: &[String],
    ) -> EventFlowResult<Flow> {
        let mut tx = self.pool.begin().await?;

        let flow_id = Uuid::new_v4();
        let row = sqlx::query(
            r#"
            INSERT INTO event_flows (id, flow_type, root_arguments, status, initiated_by)
            VALUES ($1, $2, $3, 'started', $4)
            RETURNING id, flow_type, root_arguments, status, initiated_by,
                      start_time, end_time, run_duration_ms
            "#,
        )
        .bind(flow_id)
        .bind(flow_type)
        .bind(&root_arguments)
        .bind(initiated_by)
        .fetch_one(&mut *tx)
        .await?;
        let flow = map_flow(&row)?;

        for name in processor_names {
            sqlx::query(
                r#"
                INSERT INTO event_flow_processor_states (id, flow_id, processor_name, status)
                VALUES ($1, $2, $3, 'pending')
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(flow_id)
            .bind(name)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(flow)
    }

    pub async fn flow(&self, flow_id: Uuid) -> EventFlowResult<Option<Flow>> {
        let row = sqlx::query(
            r#"
            SELECT id, flow_type, root_arguments, status, initiated_by,
                   start_time, end_time, run_duration_ms
            FROM event_flows WHERE id = $1
            "#,
        )
        .bind(flow_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(map_flow).transpose()
    }

    pub async fn flow_states(&self, flow_id: Uuid) -> EventFlowResult<Vec<ProcessorState>> {
        let rows = sqlx::query(
            r#"
            SELECT id, flow_id, processor_name, status, result, error, retriable_error,
                   start_time, end_time, run_duration_ms
            FROM event_flow_processor_states
            WHERE flow_id = $1
            ORDER BY processor_name
            "#,
        )
        .bind(flow_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(map_state).collect()
    }

    pub async fn processor_state(
        &self,
        flow_id: Uuid,
        name: &str,
    ) -> EventFlowResult<Option<ProcessorState>> {
        let row = sqlx::query(
            r#"
            SELECT id, flow_id, processor_name, status, result, error, retriable_error,
                   start_time, end_time, run_duration_ms
            FROM event_flow_processor_states
            WHERE flow_id = $1 AND processor_name = $2
            "#,
        )
        .bind(flow_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(map_state).transpose()
    }

    pub async fn set_flow_status(
        &self,
        flow_id: Uuid,
        status: FlowStatus,
    ) -> EventFlowResult<()> {
        let updated = if status.is_terminal() {
            sqlx::query(
                r#"
                UPDATE event_flows
                SET status = $2,
                    end_time = now(),
                    run_duration_ms = (extract(epoch FROM (now() - start_time)) * 1000)::bigint
                WHERE id = $1
                "#,
            )
            .bind(flow_id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?
        } else {
            sqlx::query(
                r#"
                UPDATE event_flows
                SET status = $2, end_time = NULL, run_duration_ms = NULL
                WHERE id = $1
                "#,
            )
            .bind(flow_id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?
        };

        if updated.rows_affected() == 0 {
            return Err(EventFlowError::FlowNotFound(flow_id));
        }
        Ok(())
    }

    /// Single idempotent statement: transition happens only while the flow is
    /// Started and every state row is strictly completed
    pub async fn complete_flow_if_done(&self, flow_id: Uuid) -> EventFlowResult<bool> {
        let updated = sqlx::query(
            r#"
            UPDATE event_flows
            SET status = 'completed',
                end_time = now(),
                run_duration_ms = (extract(epoch FROM (now() - start_time)) * 1000)::bigint
            WHERE id = $1
              AND status = 'started'
              AND EXISTS (
                  SELECT 1 FROM event_flow_processor_states s WHERE s.flow_id = $1
              )
              AND NOT EXISTS (
                  SELECT 1 FROM event_flow_processor_states s
                  WHERE s.flow_id = $1 AND s.status <> 'completed'
              )
            "#,
        )
        .bind(flow_id)
        .execute(&self.pool)
        .await?;

        Ok(updated.rows_affected() > 0)
    }

    pub async fn try_claim(
        &self,
        flow_id: Uuid,
        name: &str,
        predecessors: &[String],
    ) -> EventFlowResult<bool> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            SELECT status FROM event_flow_processor_states
            WHERE flow_id = $1 AND processor_name = $2
            FOR UPDATE
            "#,
        )
        .bind(flow_id)
        .bind(name)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| EventFlowError::ProcessorStateNotFound {
            flow_id,
            processor: name.to_string(),
        })?;

        let status: String = row.try_get("status")?;
        if status.parse::<ProcessorStatus>()? != ProcessorStatus::Pending {
            return Ok(false);
        }

        if !predecessors.is_empty() {
            // Readiness is re-read from persisted state under the lock; a
            // missing predecessor row also fails the count
            let complete: i64 = sqlx::query_scalar(
                r#"
                SELECT count(*) FROM event_flow_processor_states
                WHERE flow_id = $1
                  AND processor_name = ANY($2)
                  AND status IN ('completed', 'completed_with_error')
                "#,
            )
            .bind(flow_id)
            .bind(predecessors.to_vec())
            .fetch_one(&mut *tx)
            .await?;

            if complete != predecessors.len() as i64 {
                return Ok(false);
            }
        }

        sqlx::query(
            r#"
            UPDATE event_flow_processor_states
            SET status = 'in_progress', start_time = now()
            WHERE flow_id = $1 AND processor_name = $2
            "#,
        )
        .bind(flow_id)
        .bind(name)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    pub async fn mark_retry_attempt(&self, flow_id: Uuid, name: &str) -> EventFlowResult<()> {
        sqlx::query(
            r#"
            UPDATE event_flow_processor_states
            SET status = 'in_progress', start_time = now(),
                end_time = NULL, run_duration_ms = NULL
            WHERE flow_id = $1 AND processor_name = $2 AND status = 'retriable_error'
            "#,
        )
        .bind(flow_id)
        .bind(name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn complete_processor(
        &self,
        flow_id: Uuid,
        name: &str,
        result: Value,
        soft_error: Option<String>,
    ) -> EventFlowResult<bool> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            SELECT status, start_time FROM event_flow_processor_states
            WHERE flow_id = $1 AND processor_name = $2
            FOR UPDATE
            "#,
        )
        .bind(flow_id)
        .bind(name)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| EventFlowError::ProcessorStateNotFound {
            flow_id,
            processor: name.to_string(),
        })?;

        let status: String = row.try_get("status")?;
        if status.parse::<ProcessorStatus>()?.is_complete() {
            return Ok(false);
        }

        let start_time: Option<DateTime<Utc>> = row.try_get("start_time")?;
        let end = Utc::now();
        let run_duration = duration_ms(start_time, end);
        if run_duration.is_none() {
            warn!(flow_id = %flow_id, processor = %name, "processor finished without a start_time");
        }

        let status = match &soft_error {
            Some(_) => ProcessorStatus::CompletedWithError,
            None => ProcessorStatus::Completed,
        };

        sqlx::query(
            r#"
            UPDATE event_flow_processor_states
            SET status = $3, result = $4, error = $5, end_time = $6, run_duration_ms = $7
            WHERE flow_id = $1 AND processor_name = $2
            "#,
        )
        .bind(flow_id)
        .bind(name)
        .bind(status.as_str())
        .bind(&result)
        .bind(&soft_error)
        .bind(end)
        .bind(run_duration)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    pub async fn mark_processor_error(
        &self,
        flow_id: Uuid,
        name: &str,
        trace: &str,
    ) -> EventFlowResult<()> {
        self.finish_with_status(flow_id, name, ProcessorStatus::Error, "error", trace)
            .await
    }

    pub async fn mark_processor_retriable(
        &self,
        flow_id: Uuid,
        name: &str,
        trace: &str,
    ) -> EventFlowResult<()> {
        self.finish_with_status(
            flow_id,
            name,
            ProcessorStatus::RetriableError,
            "retriable_error",
            trace,
        )
        .await
    }

    async fn finish_with_status(
        &self,
        flow_id: Uuid,
        name: &str,
        status: ProcessorStatus,
        error_column: &str,
        trace: &str,
    ) -> EventFlowResult<()> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            SELECT start_time FROM event_flow_processor_states
            WHERE flow_id = $1 AND processor_name = $2
            FOR UPDATE
            "#,
        )
        .bind(flow_id)
        .bind(name)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| EventFlowError::ProcessorStateNotFound {
            flow_id,
            processor: name.to_string(),
        })?;

        let start_time: Option<DateTime<Utc>> = row.try_get("start_time")?;
        let end = Utc::now();
        let run_duration = duration_ms(start_time, end);

        // error_column is one of two compile-time literals, never user input
        let sql = format!(
            r#"
            UPDATE event_flow_processor_states
            SET status = $3, {error_column} = $4, end_time = $5, run_duration_ms = $6
            WHERE flow_id = $1 AND processor_name = $2
            "#
        );
        sqlx::query(&sql)
            .bind(flow_id)
            .bind(name)
            .bind(status.as_str())
            .bind(trace)
            .bind(end)
            .bind(run_duration)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn mark_pending_aborted(&self, flow_id: Uuid) -> EventFlowResult<u64> {
        let updated = sqlx::query(
            r#"
            UPDATE event_flow_processor_states
            SET status = 'aborted'
            WHERE flow_id = $1 AND status = 'pending'
            "#,
        )
        .bind(flow_id)
        .execute(&self.pool)
        .await?;
        Ok(updated.rows_affected())
    }

    pub async fn insert_termination_states(
        &self,
        flow_id: Uuid,
        names: &[String],
    ) -> EventFlowResult<()> {
        for name in names {
            sqlx::query(
                r#"
                INSERT INTO event_flow_processor_states (id, flow_id, processor_name, status)
                VALUES ($1, $2, $3, 'pending')
                ON CONFLICT (flow_id, processor_name) DO NOTHING
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(flow_id)
            .bind(name)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    pub async fn delete_states(&self, flow_id: Uuid, names: &[String]) -> EventFlowResult<()> {
        sqlx::query(
            r#"
            DELETE FROM event_flow_processor_states
            WHERE flow_id = $1 AND processor_name = ANY($2)
            "#,
        )
        .bind(flow_id)
        .bind(names.to_vec())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn reset_states_for_retry(&self, flow_id: Uuid) -> EventFlowResult<()> {
        sqlx::query(
            r#"
            UPDATE event_flow_processor_states
            SET status = 'pending', result = NULL, error = NULL, retriable_error = NULL,
                start_time = NULL, end_time = NULL, run_duration_ms = NULL
            WHERE flow_id = $1
              AND status IN ('pending', 'error', 'aborted', 'completed_with_error')
            "#,
        )
        .bind(flow_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn reset_all_states(&self, flow_id: Uuid) -> EventFlowResult<()> {
        sqlx::query(
            r#"
            UPDATE event_flow_processor_states
            SET status = 'pending', result = NULL, error = NULL, retriable_error = NULL,
                start_time = NULL, end_time = NULL, run_duration_ms = NULL
            WHERE flow_id = $1
            "#,
        )
        .bind(flow_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn assembled_results(
        &self,
        flow_id: Uuid,
        predecessors: &[String],
        dependent: &str,
    ) -> EventFlowResult<Map<String, Value>> {
        let rows = sqlx::query(
            r#"
            SELECT processor_name, result FROM event_flow_processor_states
            WHERE flow_id = $1 AND processor_name = ANY($2)
            "#,
        )
        .bind(flow_id)
        .bind(predecessors.to_vec())
        .fetch_all(&self.pool)
        .await?;

        let mut by_name: Map<String, Value> = Map::new();
        for row in &rows {
            let name: String = row.try_get("processor_name")?;
            if let Some(result) = row.try_get::<Option<Value>, _>("result")? {
                by_name.insert(name, result);
            }
        }

        let mut assembled = Map::new();
        for predecessor in predecessors {
            let result = by_name.remove(predecessor).ok_or_else(|| {
                EventFlowError::MissingPredecessorResult {
                    flow_id,
                    processor: dependent.to_string(),
                    predecessor: predecessor.clone(),
                }
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
        let rows = sqlx::query(
            r#"
            SELECT processor_name FROM event_flow_processor_states
            WHERE flow_id = $1 AND status = $2
            ORDER BY processor_name
            "#,
        )
        .bind(flow_id)
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("processor_name").map_err(Into::into))
            .collect()
    }

    pub async fn all_in_completion_set(
        &self,
        flow_id: Uuid,
        names: &[String],
    ) -> EventFlowResult<bool> {
        if names.is_empty() {
            return Ok(true);
        }
        let complete: i64 = sqlx::query_scalar(
            r#"
            SELECT count(*) FROM event_flow_processor_states
            WHERE flow_id = $1
              AND processor_name = ANY($2)
              AND status IN ('completed', 'completed_with_error')
            "#,
        )
        .bind(flow_id)
        .bind(names.to_vec())
        .fetch_one(&self.pool)
        .await?;
        Ok(complete == names.len() as i64)
    }
}
