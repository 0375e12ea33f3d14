//! Background job reconciling stuck export jobs.

use domain::services::{ExportReconciler, SweepPolicy};

use super::scheduler::{Job, JobFrequency};
use crate::middleware::metrics::record_sweep;

/// Re-enqueues stale PENDING jobs and fails stale PROCESSING jobs.
pub struct StaleExportSweepJob {
    reconciler: ExportReconciler,
    policy: SweepPolicy,
    interval_secs: u64,
}

impl StaleExportSweepJob {
    pub fn new(reconciler: ExportReconciler, policy: SweepPolicy, interval_secs: u64) -> Self {
        Self {
            reconciler,
            policy,
            interval_secs,
        }
    }
}

#[async_trait::async_trait]
impl Job for StaleExportSweepJob {
    fn name(&self) -> &'static str {
        "stale_export_sweep"
    }

    fn frequency(&self) -> JobFrequency {
        JobFrequency::Seconds(self.interval_secs)
    }

    async fn execute(&self) -> Result<(), String> {
        let report = self
            .reconciler
            .sweep(&self.policy)
            .await
            .map_err(|e| format!("Stale export sweep failed: {}", e))?;
        record_sweep(&report);
        Ok(())
    }
}
