//! Background job draining the export task channel.

use domain::services::{ExportWorker, TaskChannel};
use std::sync::Arc;

use super::scheduler::{Job, JobFrequency};
use crate::middleware::metrics::record_drain;

/// Polls the channel and runs up to `batch_size` export tasks per tick.
pub struct ExportWorkerJob {
    worker: ExportWorker,
    channel: Arc<dyn TaskChannel>,
    batch_size: usize,
    poll_interval_ms: u64,
}

impl ExportWorkerJob {
    pub fn new(
        worker: ExportWorker,
        channel: Arc<dyn TaskChannel>,
        batch_size: usize,
        poll_interval_ms: u64,
    ) -> Self {
        Self {
            worker,
            channel,
            batch_size: batch_size.max(1),
            poll_interval_ms,
        }
    }
}

#[async_trait::async_trait]
impl Job for ExportWorkerJob {
    fn name(&self) -> &'static str {
        "export_worker"
    }

    fn frequency(&self) -> JobFrequency {
        JobFrequency::Milliseconds(self.poll_interval_ms)
    }

    async fn execute(&self) -> Result<(), String> {
        let summary = self
            .worker
            .drain(self.channel.as_ref(), self.batch_size)
            .await
            .map_err(|e| e.to_string())?;

        if summary.handled() > 0 {
            tracing::info!(
                completed = summary.completed,
                failed = summary.failed,
                duplicates = summary.duplicates,
                orphaned = summary.orphaned,
                "Export worker drained tasks"
            );
        }
        record_drain(&summary);
        Ok(())
    }
}
