//! Status notification channel.
//!
//! Best-effort fan-out of [`ExportStatusUpdate`]s keyed by job id. The job
//! store stays the source of truth; subscribers that lag simply miss
//! updates.

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::ExportStatusUpdate;

/// Default number of buffered updates per subscriber.
pub const DEFAULT_NOTIFICATION_BUFFER: usize = 256;

/// Result of a publish attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationResult {
    /// Delivered to this many subscribers.
    Sent(usize),
    /// Nobody was listening.
    NoSubscribers,
    /// Publishing failed (but was non-blocking).
    Failed(String),
}

#[async_trait::async_trait]
pub trait StatusNotifier: Send + Sync {
    async fn publish(&self, update: &ExportStatusUpdate) -> NotificationResult;
}

/// Notifier backed by a `tokio::sync::broadcast` channel.
#[derive(Debug, Clone)]
pub struct BroadcastStatusNotifier {
    tx: broadcast::Sender<ExportStatusUpdate>,
}

impl BroadcastStatusNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Receives every update; callers filter by job id.
    pub fn subscribe(&self) -> broadcast::Receiver<ExportStatusUpdate> {
        self.tx.subscribe()
    }

    /// Receives only the updates of one job.
    pub fn subscribe_job(&self, job_id: Uuid) -> JobStatusSubscription {
        JobStatusSubscription {
            job_id,
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for BroadcastStatusNotifier {
    fn default() -> Self {
        Self::new(DEFAULT_NOTIFICATION_BUFFER)
    }
}

#[async_trait::async_trait]
impl StatusNotifier for BroadcastStatusNotifier {
    async fn publish(&self, update: &ExportStatusUpdate) -> NotificationResult {
        match self.tx.send(update.clone()) {
            Ok(count) => {
                tracing::debug!(
                    job_id = %update.job_id,
                    topic = %update.topic(),
                    status = %update.status,
                    subscribers = count,
                    "Published export status update"
                );
                NotificationResult::Sent(count)
            }
            Err(_) => NotificationResult::NoSubscribers,
        }
    }
}

/// What a job subscription yields next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionEvent {
    Update(ExportStatusUpdate),
    /// This many updates (of any job) were dropped; re-read the store.
    Lagged(u64),
}

/// Subscription filtered to one job's topic.
#[derive(Debug)]
pub struct JobStatusSubscription {
    job_id: Uuid,
    rx: broadcast::Receiver<ExportStatusUpdate>,
}

impl JobStatusSubscription {
    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// Next update for this job, or a lag marker. Returns `None` once the
    /// channel is closed.
    pub async fn next_event(&mut self) -> Option<SubscriptionEvent> {
        loop {
            match self.rx.recv().await {
                Ok(update) if update.job_id == self.job_id => {
                    return Some(SubscriptionEvent::Update(update))
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(job_id = %self.job_id, skipped, "Status subscriber lagged");
                    return Some(SubscriptionEvent::Lagged(skipped));
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next update for this job, skipping lag markers.
    pub async fn recv(&mut self) -> Option<ExportStatusUpdate> {
        loop {
            match self.next_event().await? {
                SubscriptionEvent::Update(update) => return Some(update),
                SubscriptionEvent::Lagged(_) => continue,
            }
        }
    }
}
