//! Export worker.
//!
//! Drives one job through `PENDING -> PROCESSING -> {COMPLETED | FAILED}`
//! per task delivery. Business failures (fetch, generation, upload) end the
//! job in FAILED and the delivery is acknowledged. Only job store failures
//! are returned as errors so the delivery goes back to the channel.
//!
//! Redelivery is safe: PROCESSING can be re-entered, the pipeline re-runs
//! from scratch, and terminal writes are guarded so the first terminal
//! outcome recorded for a job is the one that sticks.

use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;

use crate::models::{
    export_filename, export_storage_key, ExportJobStatus, ExportOutcome, ExportStatusUpdate,
    ExportTask,
};
use crate::services::data_source::{DataSourceError, InventoryDataSource};
use crate::services::job_store::{ExportJobStore, StatusWrite, StoreError};
use crate::services::notification::{NotificationResult, StatusNotifier};
use crate::services::spreadsheet::{ArtifactError, ArtifactGenerator};
use crate::services::storage::{ObjectStorage, StorageError};
use crate::services::task_channel::{ChannelError, TaskChannel, TaskDelivery};

/// Infrastructure failure. The delivery should be redelivered.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Job store error: {0}")]
    Store(#[from] StoreError),

    #[error("Task channel error: {0}")]
    Channel(#[from] ChannelError),
}

/// Failure inside the export pipeline. Recorded on the job, never retried.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Fetch(#[from] DataSourceError),

    #[error(transparent)]
    Generate(#[from] ArtifactError),

    #[error(transparent)]
    Upload(#[from] StorageError),
}

/// What happened to one delivery. Every variant is acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskDisposition {
    Completed { file_url: String },
    Failed { reason: String },
    /// The job was already terminal; nothing was written.
    Duplicate(ExportJobStatus),
    /// No job matches the task.
    Orphaned,
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Publish a status update when a job completes. Failures are always
    /// published.
    pub notify_on_completion: bool,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            notify_on_completion: true,
        }
    }
}

/// Counts from one [`ExportWorker::drain`] pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainSummary {
    pub completed: usize,
    pub failed: usize,
    pub duplicates: usize,
    pub orphaned: usize,
    /// Deliveries returned to the channel after an infrastructure error.
    pub redelivered: usize,
}

impl DrainSummary {
    pub fn handled(&self) -> usize {
        self.completed + self.failed + self.duplicates + self.orphaned
    }

    fn record(&mut self, disposition: &TaskDisposition) {
        match disposition {
            TaskDisposition::Completed { .. } => self.completed += 1,
            TaskDisposition::Failed { .. } => self.failed += 1,
            TaskDisposition::Duplicate(_) => self.duplicates += 1,
            TaskDisposition::Orphaned => self.orphaned += 1,
        }
    }
}

#[derive(Clone)]
pub struct ExportWorker {
    store: Arc<dyn ExportJobStore>,
    data_source: Arc<dyn InventoryDataSource>,
    generator: Arc<dyn ArtifactGenerator>,
    storage: Arc<dyn ObjectStorage>,
    notifier: Arc<dyn StatusNotifier>,
    settings: WorkerSettings,
}

impl ExportWorker {
    pub fn new(
        store: Arc<dyn ExportJobStore>,
        data_source: Arc<dyn InventoryDataSource>,
        generator: Arc<dyn ArtifactGenerator>,
        storage: Arc<dyn ObjectStorage>,
        notifier: Arc<dyn StatusNotifier>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            store,
            data_source,
            generator,
            storage,
            notifier,
            settings,
        }
    }

    /// Fetch, generate and upload. Never touches the job store.
    pub async fn run_pipeline(&self, task: &ExportTask) -> ExportOutcome {
        match self.produce_artifact(task).await {
            Ok(file_url) => ExportOutcome::Completed { file_url },
            Err(err) => ExportOutcome::failed(err),
        }
    }

    async fn produce_artifact(&self, task: &ExportTask) -> Result<String, PipelineError> {
        let dataset = self.data_source.fetch_all(task.category).await?;
        tracing::debug!(
            job_id = %task.job_id,
            category = %task.category,
            rows = dataset.len(),
            "Fetched export dataset"
        );

        let generator = Arc::clone(&self.generator);
        let format = task.format;
        let sheet_name = task.category.sheet_name();
        let bytes = tokio::task::spawn_blocking(move || {
            generator.generate(format, &dataset, sheet_name)
        })
        .await
        .map_err(|e| ArtifactError::Encoding(format!("generation task aborted: {}", e)))??;

        let filename = export_filename(task.category, task.format, Utc::now());
        let key = export_storage_key(task.owner_id, &filename);
        let size = bytes.len();
        let file_url = self
            .storage
            .put(&key, bytes, task.format.content_type())
            .await?;

        tracing::debug!(job_id = %task.job_id, key = %key, bytes = size, "Uploaded export artifact");
        Ok(file_url)
    }

    /// Runs the state machine for one task.
    pub async fn handle(&self, task: &ExportTask) -> Result<TaskDisposition, WorkerError> {
        match self.store.mark_processing(task.job_id).await? {
            StatusWrite::Applied(_) => {}
            StatusWrite::Rejected(job) => {
                tracing::info!(
                    job_id = %task.job_id,
                    status = %job.status,
                    "Skipping redelivered task for finished export job"
                );
                return Ok(TaskDisposition::Duplicate(job.status));
            }
            StatusWrite::Missing => {
                tracing::warn!(job_id = %task.job_id, "Export task references unknown job");
                return Ok(TaskDisposition::Orphaned);
            }
        }

        let outcome = self.run_pipeline(task).await;

        match self.store.record_outcome(task.job_id, &outcome).await? {
            StatusWrite::Applied(job) => {
                let update = ExportStatusUpdate::from(&job);
                let disposition = match outcome {
                    ExportOutcome::Completed { file_url } => {
                        tracing::info!(
                            job_id = %job.id,
                            owner_id = %job.owner_id,
                            category = %job.category,
                            file_url = %file_url,
                            "Export job completed"
                        );
                        if self.settings.notify_on_completion {
                            self.notify(&update).await;
                        }
                        TaskDisposition::Completed { file_url }
                    }
                    ExportOutcome::Failed { reason } => {
                        tracing::warn!(
                            job_id = %job.id,
                            owner_id = %job.owner_id,
                            category = %job.category,
                            error = %reason,
                            "Export job failed"
                        );
                        self.notify(&update).await;
                        TaskDisposition::Failed { reason }
                    }
                };
                Ok(disposition)
            }
            StatusWrite::Rejected(job) => {
                tracing::info!(
                    job_id = %job.id,
                    status = %job.status,
                    "Export job was finished by another delivery"
                );
                Ok(TaskDisposition::Duplicate(job.status))
            }
            StatusWrite::Missing => {
                tracing::warn!(job_id = %task.job_id, "Export job disappeared during processing");
                Ok(TaskDisposition::Orphaned)
            }
        }
    }

    async fn notify(&self, update: &ExportStatusUpdate) {
        if let NotificationResult::Failed(reason) = self.notifier.publish(update).await {
            tracing::warn!(
                job_id = %update.job_id,
                error = %reason,
                "Failed to publish export status update"
            );
        }
    }

    /// Handles a delivery and settles it with the channel: ack on any
    /// disposition, nack on infrastructure errors.
    pub async fn process_delivery(
        &self,
        channel: &dyn TaskChannel,
        delivery: &TaskDelivery,
    ) -> Result<TaskDisposition, WorkerError> {
        match self.handle(&delivery.task).await {
            Ok(disposition) => {
                channel.ack(delivery).await?;
                Ok(disposition)
            }
            Err(err) => {
                tracing::error!(
                    job_id = %delivery.task.job_id,
                    attempt = delivery.attempt,
                    error = %err,
                    "Export task failed on infrastructure error, returning to channel"
                );
                if let Err(nack_err) = channel.nack(delivery).await {
                    tracing::warn!(
                        job_id = %delivery.task.job_id,
                        error = %nack_err,
                        "Failed to return export task to channel"
                    );
                }
                Err(err)
            }
        }
    }

    /// Receives and processes one delivery, if any is available.
    pub async fn poll_once(
        &self,
        channel: &dyn TaskChannel,
    ) -> Result<Option<TaskDisposition>, WorkerError> {
        let Some(delivery) = channel.receive().await? else {
            return Ok(None);
        };
        self.process_delivery(channel, &delivery).await.map(Some)
    }

    /// Processes up to `max` deliveries. Stops early when the channel is
    /// empty or on the first infrastructure error.
    pub async fn drain(
        &self,
        channel: &dyn TaskChannel,
        max: usize,
    ) -> Result<DrainSummary, WorkerError> {
        let mut summary = DrainSummary::default();
        for _ in 0..max {
            match self.poll_once(channel).await {
                Ok(Some(disposition)) => summary.record(&disposition),
                Ok(None) => break,
                Err(WorkerError::Store(err)) => {
                    summary.redelivered += 1;
                    tracing::warn!(error = %err, "Stopping drain after job store error");
                    break;
                }
                Err(err) => return Err(err),
            }
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExportCategory, ExportFormat, ExportJob, Product};
    use crate::services::data_source::InMemoryInventory;
    use crate::services::job_store::InMemoryExportJobStore;
    use crate::services::notification::BroadcastStatusNotifier;
    use crate::services::spreadsheet::SpreadsheetGenerator;
    use crate::services::storage::public_object_url;
    use crate::services::task_channel::InMemoryTaskChannel;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use uuid::Uuid;

    const CDN: &str = "https://cdn.example.com";

    #[derive(Default)]
    struct RecordingStorage {
        keys: Mutex<Vec<(String, String, usize)>>,
        fail: bool,
    }

    impl RecordingStorage {
        fn failing() -> Self {
            Self {
                keys: Mutex::new(Vec::new()),
                fail: true,
            }
        }

        fn puts(&self) -> Vec<(String, String, usize)> {
            self.keys.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ObjectStorage for RecordingStorage {
        async fn put(
            &self,
            key: &str,
            bytes: Vec<u8>,
            content_type: &str,
        ) -> Result<String, StorageError> {
            if self.fail {
                return Err(StorageError::Rejected {
                    status: 503,
                    body: "bucket offline".to_string(),
                });
            }
            self.keys
                .lock()
                .unwrap()
                .push((key.to_string(), content_type.to_string(), bytes.len()));
            Ok(public_object_url(CDN, key))
        }
    }

    struct BrokenDataSource;

    #[async_trait]
    impl InventoryDataSource for BrokenDataSource {
        async fn fetch_all(
            &self,
            category: ExportCategory,
        ) -> Result<crate::models::ExportDataset, DataSourceError> {
            Err(DataSourceError::Fetch {
                category,
                message: "connection reset by peer".to_string(),
            })
        }
    }

    /// Store wrapper that logs every applied status.
    struct ObservedStore {
        inner: InMemoryExportJobStore,
        observed: Mutex<Vec<ExportJobStatus>>,
    }

    impl ObservedStore {
        fn new() -> Self {
            Self {
                inner: InMemoryExportJobStore::new(),
                observed: Mutex::new(Vec::new()),
            }
        }

        fn observe(&self, write: &StatusWrite) {
            if let StatusWrite::Applied(job) = write {
                self.observed.lock().unwrap().push(job.status);
            }
        }
    }

    #[async_trait]
    impl ExportJobStore for ObservedStore {
        async fn create(&self, job: &ExportJob) -> Result<ExportJob, StoreError> {
            self.observed.lock().unwrap().push(job.status);
            self.inner.create(job).await
        }

        async fn find_by_id(&self, job_id: Uuid) -> Result<Option<ExportJob>, StoreError> {
            self.inner.find_by_id(job_id).await
        }

        async fn mark_processing(&self, job_id: Uuid) -> Result<StatusWrite, StoreError> {
            let write = self.inner.mark_processing(job_id).await?;
            self.observe(&write);
            Ok(write)
        }

        async fn record_outcome(
            &self,
            job_id: Uuid,
            outcome: &ExportOutcome,
        ) -> Result<StatusWrite, StoreError> {
            let write = self.inner.record_outcome(job_id, outcome).await?;
            self.observe(&write);
            Ok(write)
        }

        async fn list_by_owner(&self, owner_id: Uuid) -> Result<Vec<ExportJob>, StoreError> {
            self.inner.list_by_owner(owner_id).await
        }

        async fn find_stale(
            &self,
            status: ExportJobStatus,
            updated_before: chrono::DateTime<Utc>,
            limit: i64,
        ) -> Result<Vec<ExportJob>, StoreError> {
            self.inner.find_stale(status, updated_before, limit).await
        }
    }

    struct Harness {
        store: Arc<InMemoryExportJobStore>,
        inventory: Arc<InMemoryInventory>,
        storage: Arc<RecordingStorage>,
        notifier: Arc<BroadcastStatusNotifier>,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_storage(RecordingStorage::default())
        }

        fn with_storage(storage: RecordingStorage) -> Self {
            Self {
                store: Arc::new(InMemoryExportJobStore::new()),
                inventory: Arc::new(InMemoryInventory::new()),
                storage: Arc::new(storage),
                notifier: Arc::new(BroadcastStatusNotifier::new(16)),
            }
        }

        fn worker(&self, settings: WorkerSettings) -> ExportWorker {
            ExportWorker::new(
                self.store.clone(),
                self.inventory.clone(),
                Arc::new(SpreadsheetGenerator),
                self.storage.clone(),
                self.notifier.clone(),
                settings,
            )
        }

        async fn pending_task(&self, category: ExportCategory) -> ExportTask {
            let job =
                ExportJob::new_pending(Uuid::new_v4(), category, ExportFormat::Xlsx, Utc::now());
            self.store.create(&job).await.unwrap();
            ExportTask::from(&job)
        }

        async fn add_product(&self, code: &str) {
            let now = Utc::now();
            self.inventory
                .add_product(Product {
                    id: Uuid::new_v4(),
                    code: code.to_string(),
                    name: format!("Product {}", code),
                    description: None,
                    price: Some("9.50".to_string()),
                    category: None,
                    brand: None,
                    sku: None,
                    active: true,
                    created_at: now,
                    updated_at: now,
                })
                .await;
        }
    }

    #[tokio::test]
    async fn test_successful_export_completes_job() {
        let h = Harness::new();
        h.add_product("P-1").await;
        let task = h.pending_task(ExportCategory::Product).await;
        let mut events = h.notifier.subscribe_job(task.job_id);

        let disposition = h
            .worker(WorkerSettings::default())
            .handle(&task)
            .await
            .unwrap();

        let job = h.store.find_by_id(task.job_id).await.unwrap().unwrap();
        assert_eq!(job.status, ExportJobStatus::Completed);
        assert!(job.error_message.is_none());

        let url = job.file_url.clone().unwrap();
        let prefix = format!("{}/exports/{}/product_", CDN, task.owner_id);
        assert!(url.starts_with(&prefix), "unexpected url {}", url);
        assert!(url.ends_with(".xlsx"));
        // yyyy_MM_dd_HH_mm_ss
        assert_eq!(url.len() - prefix.len() - ".xlsx".len(), 19);
        assert_eq!(disposition, TaskDisposition::Completed { file_url: url });

        let puts = h.storage.puts();
        assert_eq!(puts.len(), 1);
        assert_eq!(puts[0].1, ExportFormat::Xlsx.content_type());

        let event = events.recv().await.unwrap();
        assert_eq!(event.status, ExportJobStatus::Completed);
        assert_eq!(event.file_url, job.file_url);
    }

    #[tokio::test]
    async fn test_fetch_failure_fails_job_and_publishes() {
        let h = Harness::new();
        let task = h.pending_task(ExportCategory::Stock).await;
        let mut events = h.notifier.subscribe_job(task.job_id);
        let worker = ExportWorker::new(
            h.store.clone(),
            Arc::new(BrokenDataSource),
            Arc::new(SpreadsheetGenerator),
            h.storage.clone(),
            h.notifier.clone(),
            WorkerSettings::default(),
        );

        let disposition = worker.handle(&task).await.unwrap();
        assert!(matches!(disposition, TaskDisposition::Failed { .. }));

        let job = h.store.find_by_id(task.job_id).await.unwrap().unwrap();
        assert_eq!(job.status, ExportJobStatus::Failed);
        assert!(job.file_url.is_none());
        assert!(job
            .error_message
            .as_deref()
            .unwrap()
            .contains("connection reset by peer"));

        let event = events.recv().await.unwrap();
        assert_eq!(event.status, ExportJobStatus::Failed);
        assert_eq!(event.error_message, job.error_message);
        assert!(h.storage.puts().is_empty());
    }

    #[tokio::test]
    async fn test_empty_dataset_fails_without_upload() {
        let h = Harness::new();
        let task = h.pending_task(ExportCategory::Warehouse).await;

        h.worker(WorkerSettings::default())
            .handle(&task)
            .await
            .unwrap();

        let job = h.store.find_by_id(task.job_id).await.unwrap().unwrap();
        assert_eq!(job.status, ExportJobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some("No data to export"));
        assert!(job.file_url.is_none());
        assert!(h.storage.puts().is_empty());
    }

    #[tokio::test]
    async fn test_upload_failure_fails_job() {
        let h = Harness::with_storage(RecordingStorage::failing());
        h.add_product("P-1").await;
        let task = h.pending_task(ExportCategory::Product).await;

        let disposition = h
            .worker(WorkerSettings::default())
            .handle(&task)
            .await
            .unwrap();

        let TaskDisposition::Failed { reason } = disposition else {
            panic!("Expected failure");
        };
        assert!(reason.contains("503"));
        let job = h.store.find_by_id(task.job_id).await.unwrap().unwrap();
        assert_eq!(job.status, ExportJobStatus::Failed);
        assert!(job.has_consistent_result());
    }

    #[tokio::test]
    async fn test_completion_notification_can_be_disabled() {
        let h = Harness::new();
        h.add_product("P-1").await;
        let task = h.pending_task(ExportCategory::Product).await;
        let mut rx = h.notifier.subscribe();

        h.worker(WorkerSettings {
            notify_on_completion: false,
        })
        .handle(&task)
        .await
        .unwrap();

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_statuses_are_monotonic() {
        let h = Harness::new();
        h.add_product("P-1").await;
        let store = Arc::new(ObservedStore::new());
        let job = ExportJob::new_pending(
            Uuid::new_v4(),
            ExportCategory::Product,
            ExportFormat::Xlsx,
            Utc::now(),
        );
        store.create(&job).await.unwrap();
        let task = ExportTask::from(&job);

        let worker = ExportWorker::new(
            store.clone(),
            h.inventory.clone(),
            Arc::new(SpreadsheetGenerator),
            h.storage.clone(),
            h.notifier.clone(),
            WorkerSettings::default(),
        );
        worker.handle(&task).await.unwrap();
        worker.handle(&task).await.unwrap();

        let observed = store.observed.lock().unwrap().clone();
        assert_eq!(
            observed,
            vec![
                ExportJobStatus::Pending,
                ExportJobStatus::Processing,
                ExportJobStatus::Completed
            ]
        );
    }

    #[tokio::test]
    async fn test_redelivery_after_completion_is_a_no_op() {
        let h = Harness::new();
        h.add_product("P-1").await;
        let task = h.pending_task(ExportCategory::Product).await;
        let worker = h.worker(WorkerSettings::default());

        worker.handle(&task).await.unwrap();
        let first = h.store.find_by_id(task.job_id).await.unwrap().unwrap();

        let disposition = worker.handle(&task).await.unwrap();
        assert_eq!(
            disposition,
            TaskDisposition::Duplicate(ExportJobStatus::Completed)
        );

        let second = h.store.find_by_id(task.job_id).await.unwrap().unwrap();
        assert_eq!(first, second);
        assert_eq!(h.storage.puts().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_deliveries_end_in_one_terminal_state() {
        let h = Harness::new();
        h.add_product("P-1").await;
        h.add_product("P-2").await;
        let task = h.pending_task(ExportCategory::Product).await;
        let a = h.worker(WorkerSettings::default());
        let b = h.worker(WorkerSettings::default());

        let (ra, rb) = tokio::join!(a.handle(&task), b.handle(&task));
        let dispositions = [ra.unwrap(), rb.unwrap()];

        let completed = dispositions
            .iter()
            .filter(|d| matches!(d, TaskDisposition::Completed { .. }))
            .count();
        assert_eq!(completed, 1);

        let job = h.store.find_by_id(task.job_id).await.unwrap().unwrap();
        assert_eq!(job.status, ExportJobStatus::Completed);
        assert!(job.has_consistent_result());
        let winning_url = dispositions.iter().find_map(|d| match d {
            TaskDisposition::Completed { file_url } => Some(file_url.clone()),
            _ => None,
        });
        assert_eq!(job.file_url, winning_url);
    }

    #[tokio::test]
    async fn test_task_for_unknown_job_is_orphaned_and_acked() {
        let h = Harness::new();
        let channel = InMemoryTaskChannel::new();
        channel
            .enqueue(&ExportTask {
                job_id: Uuid::new_v4(),
                owner_id: Uuid::new_v4(),
                category: ExportCategory::Product,
                format: ExportFormat::Xlsx,
            })
            .await
            .unwrap();

        let disposition = h
            .worker(WorkerSettings::default())
            .poll_once(&channel)
            .await
            .unwrap();
        assert_eq!(disposition, Some(TaskDisposition::Orphaned));
        assert_eq!(channel.in_flight_len(), 0);
        assert_eq!(channel.ready_len(), 0);
    }

    #[tokio::test]
    async fn test_store_outage_nacks_delivery() {
        let h = Harness::new();
        let task = h.pending_task(ExportCategory::Product).await;
        let channel = InMemoryTaskChannel::new();
        channel.enqueue(&task).await.unwrap();
        h.store.set_unavailable(true);

        let worker = h.worker(WorkerSettings::default());
        let result = worker.poll_once(&channel).await;
        assert!(matches!(result, Err(WorkerError::Store(_))));
        assert_eq!(channel.ready_len(), 1);
        assert_eq!(channel.in_flight_len(), 0);

        h.store.set_unavailable(false);
        h.add_product("P-1").await;
        let summary = worker.drain(&channel, 10).await.unwrap();
        assert_eq!(summary.completed, 1);
        assert_eq!(channel.ready_len(), 0);
    }

    #[tokio::test]
    async fn test_drain_respects_batch_limit() {
        let h = Harness::new();
        h.add_product("P-1").await;
        let channel = InMemoryTaskChannel::new();
        for _ in 0..3 {
            let task = h.pending_task(ExportCategory::Product).await;
            channel.enqueue(&task).await.unwrap();
        }
        let empty_task = h.pending_task(ExportCategory::Stock).await;
        channel.enqueue(&empty_task).await.unwrap();

        let worker = h.worker(WorkerSettings::default());
        let summary = worker.drain(&channel, 2).await.unwrap();
        assert_eq!(summary.handled(), 2);
        assert_eq!(channel.ready_len(), 2);

        let summary = worker.drain(&channel, 10).await.unwrap();
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.failed, 1);
        assert!(worker.poll_once(&channel).await.unwrap().is_none());
    }
}
