//! Stale job reconciliation.
//!
//! Jobs can get stuck when a task is lost between persistence and the
//! channel, or when a worker dies mid-pipeline and the channel never
//! redelivers. The sweep re-enqueues old PENDING jobs that have no live task
//! and fails old PROCESSING jobs so every job eventually reaches a terminal
//! state.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use crate::models::{ExportJobStatus, ExportOutcome, ExportStatusUpdate, ExportTask};
use crate::services::job_store::{ExportJobStore, StatusWrite, StoreError};
use crate::services::notification::{NotificationResult, StatusNotifier};
use crate::services::task_channel::TaskChannel;

/// Error recorded on jobs that exceeded the processing timeout.
pub const PROCESSING_TIMEOUT_MESSAGE: &str = "Export timed out while processing";

#[derive(Debug, Clone)]
pub struct SweepPolicy {
    pub pending_timeout: Duration,
    pub processing_timeout: Duration,
    pub batch_size: i64,
}

impl Default for SweepPolicy {
    fn default() -> Self {
        Self {
            pending_timeout: Duration::seconds(900),
            processing_timeout: Duration::seconds(3600),
            batch_size: 100,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub requeued: usize,
    /// Stale PENDING jobs skipped because their task is still in the channel.
    pub already_queued: usize,
    pub timed_out: usize,
    /// Stale PENDING jobs whose re-enqueue failed. Retried next sweep.
    pub requeue_failures: usize,
}

pub struct ExportReconciler {
    store: Arc<dyn ExportJobStore>,
    channel: Arc<dyn TaskChannel>,
    notifier: Arc<dyn StatusNotifier>,
}

impl ExportReconciler {
    pub fn new(
        store: Arc<dyn ExportJobStore>,
        channel: Arc<dyn TaskChannel>,
        notifier: Arc<dyn StatusNotifier>,
    ) -> Self {
        Self {
            store,
            channel,
            notifier,
        }
    }

    pub async fn sweep(&self, policy: &SweepPolicy) -> Result<SweepReport, StoreError> {
        self.sweep_at(policy, Utc::now()).await
    }

    /// Runs one sweep as of `now`.
    pub async fn sweep_at(
        &self,
        policy: &SweepPolicy,
        now: DateTime<Utc>,
    ) -> Result<SweepReport, StoreError> {
        let mut report = SweepReport::default();

        let stale_pending = self
            .store
            .find_stale(
                ExportJobStatus::Pending,
                now - policy.pending_timeout,
                policy.batch_size,
            )
            .await?;

        for job in &stale_pending {
            match self.channel.has_live_task(job.id).await {
                Ok(true) => {
                    report.already_queued += 1;
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    report.requeue_failures += 1;
                    tracing::warn!(job_id = %job.id, error = %e, "Failed to look up export task");
                    continue;
                }
            }
            match self.channel.enqueue(&ExportTask::from(job)).await {
                Ok(()) => {
                    report.requeued += 1;
                    tracing::info!(
                        job_id = %job.id,
                        owner_id = %job.owner_id,
                        "Re-enqueued stale pending export job"
                    );
                }
                Err(e) => {
                    report.requeue_failures += 1;
                    tracing::warn!(job_id = %job.id, error = %e, "Failed to re-enqueue export job");
                }
            }
        }

        let stale_processing = self
            .store
            .find_stale(
                ExportJobStatus::Processing,
                now - policy.processing_timeout,
                policy.batch_size,
            )
            .await?;

        let outcome = ExportOutcome::failed(PROCESSING_TIMEOUT_MESSAGE);
        for job in &stale_processing {
            if let StatusWrite::Applied(failed) = self.store.record_outcome(job.id, &outcome).await? {
                report.timed_out += 1;
                tracing::warn!(
                    job_id = %failed.id,
                    owner_id = %failed.owner_id,
                    "Failed export job stuck in processing"
                );
                let update = ExportStatusUpdate::from(&failed);
                if let NotificationResult::Failed(reason) = self.notifier.publish(&update).await {
                    tracing::warn!(job_id = %failed.id, error = %reason, "Failed to publish timeout update");
                }
            }
        }

        if report != SweepReport::default() {
            tracing::info!(
                requeued = report.requeued,
                already_queued = report.already_queued,
                timed_out = report.timed_out,
                requeue_failures = report.requeue_failures,
                "Export reconciliation sweep finished"
            );
        }

        Ok(report)
    }
}
