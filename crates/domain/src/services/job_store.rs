//! Export job store abstraction.
//!
//! Status writes are guarded: a write is only applied when the state machine
//! allows it, so a terminal job never changes again regardless of how many
//! deliveries race on it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{ExportJob, ExportJobStatus, ExportOutcome};

/// Job store failure. Always an infrastructure problem.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Job store unavailable: {0}")]
    Unavailable(String),
}

/// Result of a guarded status write.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusWrite {
    /// The write was applied; carries the updated job.
    Applied(ExportJob),
    /// The job is already terminal; carries its current state.
    Rejected(ExportJob),
    /// No job with that id.
    Missing,
}

impl StatusWrite {
    pub fn is_applied(&self) -> bool {
        matches!(self, StatusWrite::Applied(_))
    }
}

#[async_trait]
pub trait ExportJobStore: Send + Sync {
    /// Persists a new job.
    async fn create(&self, job: &ExportJob) -> Result<ExportJob, StoreError>;

    async fn find_by_id(&self, job_id: Uuid) -> Result<Option<ExportJob>, StoreError>;

    /// Moves a PENDING or PROCESSING job to PROCESSING.
    async fn mark_processing(&self, job_id: Uuid) -> Result<StatusWrite, StoreError>;

    /// Records a terminal outcome on a PENDING or PROCESSING job.
    async fn record_outcome(
        &self,
        job_id: Uuid,
        outcome: &ExportOutcome,
    ) -> Result<StatusWrite, StoreError>;

    /// All jobs of one owner, newest first.
    async fn list_by_owner(&self, owner_id: Uuid) -> Result<Vec<ExportJob>, StoreError>;

    /// Jobs in `status` not updated since `updated_before`, oldest first.
    async fn find_stale(
        &self,
        status: ExportJobStatus,
        updated_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ExportJob>, StoreError>;
}

/// Orders jobs newest first, breaking ties on the time-ordered id.
pub fn sort_newest_first(jobs: &mut [ExportJob]) {
    jobs.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.id.cmp(&a.id))
    });
}

/// In-memory job store for development and tests.
#[derive(Debug, Default)]
pub struct InMemoryExportJobStore {
    jobs: RwLock<HashMap<Uuid, ExportJob>>,
    unavailable: AtomicBool,
}

impl InMemoryExportJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates an unreachable backend: every call fails while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "in-memory store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }

    async fn guarded_write<F>(&self, job_id: Uuid, apply: F) -> Result<StatusWrite, StoreError>
    where
        F: FnOnce(&mut ExportJob) -> bool + Send,
    {
        self.check_available()?;
        let mut jobs = self.jobs.write().await;
        let Some(job) = jobs.get_mut(&job_id) else {
            return Ok(StatusWrite::Missing);
        };
        if apply(job) {
            Ok(StatusWrite::Applied(job.clone()))
        } else {
            Ok(StatusWrite::Rejected(job.clone()))
        }
    }
}

#[async_trait]
impl ExportJobStore for InMemoryExportJobStore {
    async fn create(&self, job: &ExportJob) -> Result<ExportJob, StoreError> {
        self.check_available()?;
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(StoreError::Database(format!(
                "duplicate export job id {}",
                job.id
            )));
        }
        jobs.insert(job.id, job.clone());
        Ok(job.clone())
    }

    async fn find_by_id(&self, job_id: Uuid) -> Result<Option<ExportJob>, StoreError> {
        self.check_available()?;
        Ok(self.jobs.read().await.get(&job_id).cloned())
    }

    async fn mark_processing(&self, job_id: Uuid) -> Result<StatusWrite, StoreError> {
        self.guarded_write(job_id, |job| job.begin_processing(Utc::now()))
            .await
    }

    async fn record_outcome(
        &self,
        job_id: Uuid,
        outcome: &ExportOutcome,
    ) -> Result<StatusWrite, StoreError> {
        let outcome = outcome.clone();
        self.guarded_write(job_id, move |job| job.apply_outcome(&outcome, Utc::now()))
            .await
    }

    async fn list_by_owner(&self, owner_id: Uuid) -> Result<Vec<ExportJob>, StoreError> {
        self.check_available()?;
        let mut jobs: Vec<ExportJob> = self
            .jobs
            .read()
            .await
            .values()
            .filter(|job| job.owner_id == owner_id)
            .cloned()
            .collect();
        sort_newest_first(&mut jobs);
        Ok(jobs)
    }

    async fn find_stale(
        &self,
        status: ExportJobStatus,
        updated_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ExportJob>, StoreError> {
        self.check_available()?;
        let mut jobs: Vec<ExportJob> = self
            .jobs
            .read()
            .await
            .values()
            .filter(|job| job.status == status && job.updated_at < updated_before)
            .cloned()
            .collect();
        jobs.sort_by_key(|job| job.updated_at);
        jobs.truncate(limit.max(0) as usize);
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExportCategory, ExportFormat};
    use chrono::Duration;

    fn job_at(owner_id: Uuid, created_at: DateTime<Utc>) -> ExportJob {
        ExportJob::new_pending(
            owner_id,
            ExportCategory::Stock,
            ExportFormat::Xlsx,
            created_at,
        )
    }

    #[tokio::test]
    async fn test_create_and_find() {
        let store = InMemoryExportJobStore::new();
        let job = job_at(Uuid::new_v4(), Utc::now());

        store.create(&job).await.unwrap();
        let found = store.find_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(found, job);
        assert!(store.find_by_id(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_rejects_duplicate_id() {
        let store = InMemoryExportJobStore::new();
        let job = job_at(Uuid::new_v4(), Utc::now());

        store.create(&job).await.unwrap();
        assert!(store.create(&job).await.is_err());
    }

    #[tokio::test]
    async fn test_mark_processing_is_reentrant_until_terminal() {
        let store = InMemoryExportJobStore::new();
        let job = job_at(Uuid::new_v4(), Utc::now());
        store.create(&job).await.unwrap();

        assert!(store.mark_processing(job.id).await.unwrap().is_applied());
        assert!(store.mark_processing(job.id).await.unwrap().is_applied());

        store
            .record_outcome(job.id, &ExportOutcome::failed("boom"))
            .await
            .unwrap();

        match store.mark_processing(job.id).await.unwrap() {
            StatusWrite::Rejected(current) => assert_eq!(current.status, ExportJobStatus::Failed),
            other => panic!("Expected rejection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_first_terminal_write_wins() {
        let store = InMemoryExportJobStore::new();
        let job = job_at(Uuid::new_v4(), Utc::now());
        store.create(&job).await.unwrap();

        let completed = ExportOutcome::Completed {
            file_url: "https://cdn.example.com/a.xlsx".to_string(),
        };
        assert!(store
            .record_outcome(job.id, &completed)
            .await
            .unwrap()
            .is_applied());
        assert!(!store
            .record_outcome(job.id, &ExportOutcome::failed("late failure"))
            .await
            .unwrap()
            .is_applied());

        let stored = store.find_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ExportJobStatus::Completed);
        assert!(stored.error_message.is_none());
        assert!(stored.has_consistent_result());
    }

    #[tokio::test]
    async fn test_write_to_missing_job() {
        let store = InMemoryExportJobStore::new();
        assert_eq!(
            store.mark_processing(Uuid::new_v4()).await.unwrap(),
            StatusWrite::Missing
        );
    }

    #[tokio::test]
    async fn test_list_by_owner_newest_first() {
        let store = InMemoryExportJobStore::new();
        let owner = Uuid::new_v4();
        let base = Utc::now();

        let j2 = job_at(owner, base + Duration::seconds(1));
        let j1 = job_at(owner, base);
        let j3 = job_at(owner, base + Duration::seconds(2));
        for job in [&j2, &j1, &j3] {
            store.create(job).await.unwrap();
        }
        store
            .create(&job_at(Uuid::new_v4(), base + Duration::seconds(5)))
            .await
            .unwrap();

        let ids: Vec<Uuid> = store
            .list_by_owner(owner)
            .await
            .unwrap()
            .into_iter()
            .map(|j| j.id)
            .collect();
        assert_eq!(ids, vec![j3.id, j2.id, j1.id]);
    }

    #[tokio::test]
    async fn test_find_stale_filters_by_status_and_age() {
        let store = InMemoryExportJobStore::new();
        let owner = Uuid::new_v4();
        let now = Utc::now();

        let old = job_at(owner, now - Duration::minutes(30));
        let fresh = job_at(owner, now);
        let mut done = job_at(owner, now - Duration::minutes(30));
        done.apply_outcome(&ExportOutcome::failed("x"), now - Duration::minutes(30));
        for job in [&old, &fresh, &done] {
            store.create(job).await.unwrap();
        }

        let stale = store
            .find_stale(ExportJobStatus::Pending, now - Duration::minutes(15), 10)
            .await
            .unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, old.id);

        let none = store
            .find_stale(ExportJobStatus::Pending, now - Duration::minutes(15), 0)
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_store_errors() {
        let store = InMemoryExportJobStore::new();
        store.set_unavailable(true);
        assert!(matches!(
            store.find_by_id(Uuid::new_v4()).await,
            Err(StoreError::Unavailable(_))
        ));
        store.set_unavailable(false);
        assert!(store.find_by_id(Uuid::new_v4()).await.is_ok());
    }
}
