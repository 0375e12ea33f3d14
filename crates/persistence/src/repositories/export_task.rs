//! Postgres-backed export task queue.
//!
//! Tasks are rows in `export_tasks`. A receive claims one available row with
//! `FOR UPDATE SKIP LOCKED` and leases it for the visibility timeout. An
//! expired lease makes the row receivable again, which covers worker crashes.

use async_trait::async_trait;
use domain::models::ExportTask;
use domain::services::{ChannelError, TaskChannel, TaskDelivery};
use sqlx::PgPool;
use std::time::Duration;
use uuid::Uuid;

use crate::entities::ExportTaskEntity;
use crate::metrics::QueryTimer;

/// Backoff step per attempt after a nack.
pub const NACK_BACKOFF_STEP_SECS: i64 = 5;

/// Upper bound for the nack backoff.
pub const NACK_BACKOFF_MAX_SECS: i64 = 300;

/// Delay before a nacked task becomes receivable again.
pub fn nack_backoff_secs(attempts: i32) -> i64 {
    (i64::from(attempts.max(1)) * NACK_BACKOFF_STEP_SECS).min(NACK_BACKOFF_MAX_SECS)
}

#[derive(Clone)]
pub struct ExportTaskQueue {
    pool: PgPool,
    visibility_timeout: Duration,
}

impl ExportTaskQueue {
    pub fn new(pool: PgPool, visibility_timeout: Duration) -> Self {
        Self {
            pool,
            visibility_timeout,
        }
    }

    /// Parks a row whose payload cannot be decoded so it is never claimed
    /// again.
    async fn dead_letter(&self, id: Uuid, reason: &str) -> Result<(), ChannelError> {
        sqlx::query(
            r#"
            UPDATE export_tasks
            SET dead_lettered_at = NOW(), last_error = $2, locked_until = NULL
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_err(channel_error)?;
        Ok(())
    }
}

#[async_trait]
impl TaskChannel for ExportTaskQueue {
    async fn enqueue(&self, task: &ExportTask) -> Result<(), ChannelError> {
        let payload =
            serde_json::to_value(task).map_err(|e| ChannelError::Malformed(e.to_string()))?;

        let timer = QueryTimer::new("enqueue_export_task");
        let result = sqlx::query(
            r#"
            INSERT INTO export_tasks (id, job_id, payload)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(task.job_id)
        .bind(payload)
        .execute(&self.pool)
        .await;
        timer.record();

        result.map_err(channel_error)?;
        Ok(())
    }

    async fn receive(&self) -> Result<Option<TaskDelivery>, ChannelError> {
        let timer = QueryTimer::new("claim_export_task");
        let result = sqlx::query_as::<_, ExportTaskEntity>(
            r#"
            UPDATE export_tasks
            SET attempts = attempts + 1,
                locked_until = NOW() + make_interval(secs => $1)
            WHERE id = (
                SELECT id FROM export_tasks
                WHERE dead_lettered_at IS NULL
                  AND available_at <= NOW()
                  AND (locked_until IS NULL OR locked_until < NOW())
                ORDER BY available_at ASC, created_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING id, job_id, payload, attempts, available_at, locked_until, created_at
            "#,
        )
        .bind(self.visibility_timeout.as_secs_f64())
        .fetch_optional(&self.pool)
        .await;
        timer.record();

        let Some(entity) = result.map_err(channel_error)? else {
            return Ok(None);
        };

        match serde_json::from_value::<ExportTask>(entity.payload) {
            Ok(task) => Ok(Some(TaskDelivery {
                delivery_id: entity.id,
                task,
                attempt: entity.attempts,
            })),
            Err(e) => {
                let reason = format!("undecodable task payload: {}", e);
                tracing::error!(
                    task_id = %entity.id,
                    job_id = %entity.job_id,
                    error = %reason,
                    "Dead-lettering export task"
                );
                self.dead_letter(entity.id, &reason).await?;
                Err(ChannelError::Malformed(reason))
            }
        }
    }

    async fn ack(&self, delivery: &TaskDelivery) -> Result<(), ChannelError> {
        let timer = QueryTimer::new("ack_export_task");
        let result = sqlx::query("DELETE FROM export_tasks WHERE id = $1")
            .bind(delivery.delivery_id)
            .execute(&self.pool)
            .await;
        timer.record();

        if result.map_err(channel_error)?.rows_affected() == 0 {
            return Err(ChannelError::UnknownDelivery(delivery.delivery_id));
        }
        Ok(())
    }

    async fn nack(&self, delivery: &TaskDelivery) -> Result<(), ChannelError> {
        let backoff = nack_backoff_secs(delivery.attempt);

        let timer = QueryTimer::new("nack_export_task");
        let result = sqlx::query(
            r#"
            UPDATE export_tasks
            SET locked_until = NULL,
                available_at = NOW() + make_interval(secs => $2)
            WHERE id = $1
            "#,
        )
        .bind(delivery.delivery_id)
        .bind(backoff as f64)
        .execute(&self.pool)
        .await;
        timer.record();

        if result.map_err(channel_error)?.rows_affected() == 0 {
            return Err(ChannelError::UnknownDelivery(delivery.delivery_id));
        }
        tracing::debug!(
            task_id = %delivery.delivery_id,
            job_id = %delivery.task.job_id,
            backoff_secs = backoff,
            "Export task returned to queue"
        );
        Ok(())
    }

    async fn has_live_task(&self, job_id: Uuid) -> Result<bool, ChannelError> {
        let timer = QueryTimer::new("find_live_export_task");
        let result = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM export_tasks
                WHERE job_id = $1 AND dead_lettered_at IS NULL
            )
            "#,
        )
        .bind(job_id)
        .fetch_one(&self.pool)
        .await;
        timer.record();

        result.map_err(channel_error)
    }
}

fn channel_error(err: sqlx::Error) -> ChannelError {
    ChannelError::Unavailable(err.to_string())
}
