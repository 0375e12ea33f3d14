//! Export job repository for database operations.
//!
//! Status transitions are guarded in SQL so concurrent deliveries of the
//! same task cannot move a job out of a terminal state.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::models::{ExportJob, ExportJobStatus, ExportOutcome};
use domain::services::{ExportJobStore, StatusWrite, StoreError};
use sqlx::PgPool;
use uuid::Uuid;

use crate::entities::ExportJobEntity;
use crate::metrics::QueryTimer;

const JOB_COLUMNS: &str = "id, owner_id, category, format, status, file_url, error_message, created_at, updated_at";

/// Repository for export job database operations.
#[derive(Clone)]
pub struct ExportJobRepository {
    pool: PgPool,
}

impl ExportJobRepository {
    /// Creates a new ExportJobRepository with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch(&self, job_id: Uuid) -> Result<Option<ExportJobEntity>, sqlx::Error> {
        sqlx::query_as::<_, ExportJobEntity>(&format!(
            "SELECT {} FROM export_jobs WHERE id = $1",
            JOB_COLUMNS
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Resolves a guarded UPDATE that matched `updated`: either the write
    /// landed, or the job is missing or in a state that refused it.
    async fn resolve_write(
        &self,
        job_id: Uuid,
        updated: Option<ExportJobEntity>,
    ) -> Result<StatusWrite, StoreError> {
        if let Some(entity) = updated {
            return Ok(StatusWrite::Applied(entity_to_domain(entity)?));
        }
        match self.fetch(job_id).await.map_err(store_error)? {
            Some(entity) => Ok(StatusWrite::Rejected(entity_to_domain(entity)?)),
            None => Ok(StatusWrite::Missing),
        }
    }
}

#[async_trait]
impl ExportJobStore for ExportJobRepository {
    async fn create(&self, job: &ExportJob) -> Result<ExportJob, StoreError> {
        let timer = QueryTimer::new("create_export_job");
        let result = sqlx::query_as::<_, ExportJobEntity>(&format!(
            r#"
            INSERT INTO export_jobs (id, owner_id, category, format, status, file_url, error_message, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {}
            "#,
            JOB_COLUMNS
        ))
        .bind(job.id)
        .bind(job.owner_id)
        .bind(job.category.to_string())
        .bind(job.format.to_string())
        .bind(job.status.to_string())
        .bind(&job.file_url)
        .bind(&job.error_message)
        .bind(job.created_at)
        .bind(job.updated_at)
        .fetch_one(&self.pool)
        .await;
        timer.record();

        entity_to_domain(result.map_err(store_error)?)
    }

    async fn find_by_id(&self, job_id: Uuid) -> Result<Option<ExportJob>, StoreError> {
        let timer = QueryTimer::new("find_export_job_by_id");
        let result = self.fetch(job_id).await;
        timer.record();

        result
            .map_err(store_error)?
            .map(entity_to_domain)
            .transpose()
    }

    async fn mark_processing(&self, job_id: Uuid) -> Result<StatusWrite, StoreError> {
        let timer = QueryTimer::new("mark_export_job_processing");
        let result = sqlx::query_as::<_, ExportJobEntity>(&format!(
            r#"
            UPDATE export_jobs
            SET status = 'PROCESSING', updated_at = NOW()
            WHERE id = $1 AND status IN ('PENDING', 'PROCESSING')
            RETURNING {}
            "#,
            JOB_COLUMNS
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await;
        timer.record();

        let updated = result.map_err(store_error)?;
        self.resolve_write(job_id, updated).await
    }

    async fn record_outcome(
        &self,
        job_id: Uuid,
        outcome: &ExportOutcome,
    ) -> Result<StatusWrite, StoreError> {
        let (file_url, error_message) = match outcome {
            ExportOutcome::Completed { file_url } => (Some(file_url.as_str()), None),
            ExportOutcome::Failed { reason } => (None, Some(reason.as_str())),
        };

        let timer = QueryTimer::new("record_export_job_outcome");
        let result = sqlx::query_as::<_, ExportJobEntity>(&format!(
            r#"
            UPDATE export_jobs
            SET status = $2, file_url = $3, error_message = $4, updated_at = NOW()
            WHERE id = $1 AND status IN ('PENDING', 'PROCESSING')
            RETURNING {}
            "#,
            JOB_COLUMNS
        ))
        .bind(job_id)
        .bind(outcome.status().to_string())
        .bind(file_url)
        .bind(error_message)
        .fetch_optional(&self.pool)
        .await;
        timer.record();

        let updated = result.map_err(store_error)?;
        self.resolve_write(job_id, updated).await
    }

    async fn list_by_owner(&self, owner_id: Uuid) -> Result<Vec<ExportJob>, StoreError> {
        let timer = QueryTimer::new("list_export_jobs_by_owner");
        let result = sqlx::query_as::<_, ExportJobEntity>(&format!(
            r#"
            SELECT {}
            FROM export_jobs
            WHERE owner_id = $1
            ORDER BY created_at DESC, id DESC
            "#,
            JOB_COLUMNS
        ))
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await;
        timer.record();

        result
            .map_err(store_error)?
            .into_iter()
            .map(entity_to_domain)
            .collect()
    }

    async fn find_stale(
        &self,
        status: ExportJobStatus,
        updated_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ExportJob>, StoreError> {
        let timer = QueryTimer::new("find_stale_export_jobs");
        let result = sqlx::query_as::<_, ExportJobEntity>(&format!(
            r#"
            SELECT {}
            FROM export_jobs
            WHERE status = $1 AND updated_at < $2
            ORDER BY updated_at ASC
            LIMIT $3
            "#,
            JOB_COLUMNS
        ))
        .bind(status.to_string())
        .bind(updated_before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await;
        timer.record();

        result
            .map_err(store_error)?
            .into_iter()
            .map(entity_to_domain)
            .collect()
    }
}

fn entity_to_domain(entity: ExportJobEntity) -> Result<ExportJob, StoreError> {
    let id = entity.id;
    ExportJob::try_from(entity)
        .map_err(|e| StoreError::Database(format!("corrupt export job row {}: {}", id, e)))
}

/// Maps sqlx errors onto the store contract. Connection-level failures are
/// reported as unavailability.
pub(crate) fn store_error(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Unavailable(err.to_string())
        }
        other => StoreError::Database(other.to_string()),
    }
}
