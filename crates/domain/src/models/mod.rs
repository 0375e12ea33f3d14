//! Domain models for the inventory export service.

pub mod export_job;
pub mod inventory;

pub use export_job::{
    export_filename, export_status_topic, export_storage_key, truncate_error_message,
    ExportCategory, ExportFormat, ExportJob, ExportJobStatus, ExportOutcome, ExportStatusUpdate,
    ExportTask, InitiateExportQuery, InitiateExportResponse, ListExportJobsResponse,
    DEFAULT_EXPORT_FORMAT, EXPORT_ACCEPTED_MESSAGE, MAX_ERROR_MESSAGE_LEN,
};
pub use inventory::{ExportDataset, Product, Stock, TabularRecord, Warehouse};
