//! Export request handling.

use chrono::Utc;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{ExportCategory, ExportFormat, ExportJob, ExportTask};
use crate::services::job_store::{ExportJobStore, StoreError};
use crate::services::task_channel::{ChannelError, TaskChannel};

#[derive(Debug, Error)]
pub enum ExportRequestError {
    #[error("{0}")]
    InvalidFormat(String),

    #[error("Failed to persist export job: {0}")]
    Persistence(#[from] StoreError),

    /// The job was persisted but its task could not be handed off. The job
    /// stays PENDING until the reconciliation sweep re-enqueues it.
    #[error("Export job {job_id} was created but could not be queued: {source}")]
    Enqueue {
        job_id: Uuid,
        #[source]
        source: ChannelError,
    },
}

/// Creates PENDING jobs and hands their tasks to the worker channel.
#[derive(Clone)]
pub struct ExportRequestHandler {
    store: Arc<dyn ExportJobStore>,
    channel: Arc<dyn TaskChannel>,
}

impl ExportRequestHandler {
    pub fn new(store: Arc<dyn ExportJobStore>, channel: Arc<dyn TaskChannel>) -> Self {
        Self { store, channel }
    }

    /// Persists a PENDING job and enqueues exactly one task for it.
    ///
    /// The returned id is queryable as soon as this returns. Nothing is
    /// enqueued when persistence fails.
    pub async fn initiate_export(
        &self,
        owner_id: Uuid,
        category: ExportCategory,
        format: &str,
    ) -> Result<Uuid, ExportRequestError> {
        let format = ExportFormat::from_str(format).map_err(ExportRequestError::InvalidFormat)?;

        let job = ExportJob::new_pending(owner_id, category, format, Utc::now());
        let job = self.store.create(&job).await?;

        let task = ExportTask::from(&job);
        if let Err(source) = self.channel.enqueue(&task).await {
            tracing::error!(
                job_id = %job.id,
                owner_id = %owner_id,
                error = %source,
                "Export job persisted but task enqueue failed"
            );
            return Err(ExportRequestError::Enqueue {
                job_id: job.id,
                source,
            });
        }

        tracing::info!(
            job_id = %job.id,
            owner_id = %owner_id,
            category = %category,
            format = %format,
            "Export job initiated"
        );

        Ok(job.id)
    }
}
