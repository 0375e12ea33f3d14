//! Repository implementations for database operations.

pub mod export_job;
pub mod export_task;
pub mod inventory;

pub use export_job::ExportJobRepository;
pub use export_task::{nack_backoff_secs, ExportTaskQueue};
pub use inventory::InventoryRepository;
