//! Background job scheduler and job implementations.

mod export_worker;
mod scheduler;
mod stale_export_sweep;

pub use export_worker::ExportWorkerJob;
pub use scheduler::{Job, JobFrequency, JobScheduler};
pub use stale_export_sweep::StaleExportSweepJob;
