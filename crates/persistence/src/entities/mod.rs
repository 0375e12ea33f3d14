//! Database entity definitions.
//!
//! Entities are direct mappings to database rows.

pub mod export_job;
pub mod export_task;
pub mod inventory;

pub use export_job::ExportJobEntity;
pub use export_task::ExportTaskEntity;
pub use inventory::{ProductEntity, StockEntity, WarehouseEntity};
