//! Domain services for the inventory export service.
//!
//! Services contain business logic that operates on domain models. Storage,
//! queueing and delivery are reached through the traits declared here so the
//! same pipeline runs against Postgres or the in-memory backends.

pub mod data_source;
pub mod export_query;
pub mod export_request;
pub mod job_store;
pub mod notification;
pub mod reconciliation;
pub mod spreadsheet;
pub mod storage;
pub mod task_channel;
pub mod worker;

pub use data_source::{DataSourceError, InMemoryInventory, InventoryDataSource};
pub use export_query::ExportQueryService;
pub use export_request::{ExportRequestError, ExportRequestHandler};
pub use job_store::{ExportJobStore, InMemoryExportJobStore, StatusWrite, StoreError};
pub use notification::{
    BroadcastStatusNotifier, JobStatusSubscription, NotificationResult, StatusNotifier,
    SubscriptionEvent, DEFAULT_NOTIFICATION_BUFFER,
};
pub use reconciliation::{ExportReconciler, SweepPolicy, SweepReport, PROCESSING_TIMEOUT_MESSAGE};
pub use spreadsheet::{ArtifactError, ArtifactGenerator, SpreadsheetGenerator};
pub use storage::{public_object_url, validate_object_key, ObjectStorage, StorageError};
pub use task_channel::{ChannelError, InMemoryTaskChannel, TaskChannel, TaskDelivery};
pub use worker::{DrainSummary, ExportWorker, PipelineError, TaskDisposition, WorkerError, WorkerSettings};
