//! Read access to export jobs.
//!
//! Nothing here mutates state. Unknown jobs come back as `None`; a FAILED
//! job is still found.

use std::sync::Arc;
use uuid::Uuid;

use crate::models::ExportJob;
use crate::services::job_store::{ExportJobStore, StoreError};

#[derive(Clone)]
pub struct ExportQueryService {
    store: Arc<dyn ExportJobStore>,
}

impl ExportQueryService {
    pub fn new(store: Arc<dyn ExportJobStore>) -> Self {
        Self { store }
    }

    /// Current persisted state of a job.
    pub async fn get_status(&self, job_id: Uuid) -> Result<Option<ExportJob>, StoreError> {
        self.store.find_by_id(job_id).await
    }

    /// File location of a COMPLETED job; `None` for unknown and unfinished
    /// jobs alike.
    pub async fn get_download_location(&self, job_id: Uuid) -> Result<Option<String>, StoreError> {
        Ok(self
            .store
            .find_by_id(job_id)
            .await?
            .and_then(|job| job.download_location().map(str::to_string)))
    }

    /// Every job of an owner, newest first.
    pub async fn list_jobs_for_owner(&self, owner_id: Uuid) -> Result<Vec<ExportJob>, StoreError> {
        self.store.list_by_owner(owner_id).await
    }
}
