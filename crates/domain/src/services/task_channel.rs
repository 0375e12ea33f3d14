//! Task channel between the request handler and export workers.
//!
//! Delivery is at-least-once: a received task stays owned by the channel
//! until it is acknowledged, and a negative acknowledgement (or a lost
//! worker) makes it receivable again.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use thiserror::Error;
use uuid::Uuid;

use crate::models::ExportTask;

#[derive(Debug, Clone, Error)]
pub enum ChannelError {
    #[error("Task channel unavailable: {0}")]
    Unavailable(String),

    #[error("Malformed task payload: {0}")]
    Malformed(String),

    #[error("Unknown delivery: {0}")]
    UnknownDelivery(Uuid),
}

/// One receipt of a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDelivery {
    pub delivery_id: Uuid,
    pub task: ExportTask,
    /// 1 on first delivery, incremented on each redelivery.
    pub attempt: i32,
}

#[async_trait]
pub trait TaskChannel: Send + Sync {
    async fn enqueue(&self, task: &ExportTask) -> Result<(), ChannelError>;

    /// Claims the next available task without blocking.
    async fn receive(&self) -> Result<Option<TaskDelivery>, ChannelError>;

    /// Marks a delivery as handled; it will not be delivered again.
    async fn ack(&self, delivery: &TaskDelivery) -> Result<(), ChannelError>;

    /// Returns a delivery to the channel for redelivery.
    async fn nack(&self, delivery: &TaskDelivery) -> Result<(), ChannelError>;

    /// Whether a task for `job_id` is still queued or leased.
    async fn has_live_task(&self, job_id: Uuid) -> Result<bool, ChannelError>;
}

#[derive(Debug)]
struct QueuedTask {
    delivery_id: Uuid,
    task: ExportTask,
    attempts: i32,
}

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<QueuedTask>,
    in_flight: HashMap<Uuid, QueuedTask>,
}

/// In-memory task channel for development and tests.
#[derive(Debug, Default)]
pub struct InMemoryTaskChannel {
    state: Mutex<QueueState>,
    reject_enqueue: AtomicBool,
}

impl InMemoryTaskChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates a broker outage for `enqueue`.
    pub fn set_reject_enqueue(&self, reject: bool) {
        self.reject_enqueue.store(reject, Ordering::SeqCst);
    }

    /// Tasks waiting to be received.
    pub fn ready_len(&self) -> usize {
        self.state.lock().map(|s| s.ready.len()).unwrap_or(0)
    }

    /// Tasks received but not yet acknowledged.
    pub fn in_flight_len(&self) -> usize {
        self.state.lock().map(|s| s.in_flight.len()).unwrap_or(0)
    }

    /// Returns every in-flight task to the ready queue, as if the workers
    /// holding them had crashed.
    pub fn requeue_in_flight(&self) -> Result<usize, ChannelError> {
        let mut state = self.lock()?;
        let drained: Vec<QueuedTask> = state.in_flight.drain().map(|(_, t)| t).collect();
        let count = drained.len();
        state.ready.extend(drained);
        Ok(count)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, QueueState>, ChannelError> {
        self.state
            .lock()
            .map_err(|_| ChannelError::Unavailable("task queue lock poisoned".to_string()))
    }
}

#[async_trait]
impl TaskChannel for InMemoryTaskChannel {
    async fn enqueue(&self, task: &ExportTask) -> Result<(), ChannelError> {
        if self.reject_enqueue.load(Ordering::SeqCst) {
            return Err(ChannelError::Unavailable(
                "in-memory channel rejecting enqueue".to_string(),
            ));
        }
        self.lock()?.ready.push_back(QueuedTask {
            delivery_id: Uuid::new_v4(),
            task: task.clone(),
            attempts: 0,
        });
        Ok(())
    }

    async fn receive(&self) -> Result<Option<TaskDelivery>, ChannelError> {
        let mut state = self.lock()?;
        let Some(mut queued) = state.ready.pop_front() else {
            return Ok(None);
        };
        queued.attempts += 1;
        let delivery = TaskDelivery {
            delivery_id: queued.delivery_id,
            task: queued.task.clone(),
            attempt: queued.attempts,
        };
        state.in_flight.insert(queued.delivery_id, queued);
        Ok(Some(delivery))
    }

    async fn ack(&self, delivery: &TaskDelivery) -> Result<(), ChannelError> {
        self.lock()?
            .in_flight
            .remove(&delivery.delivery_id)
            .map(|_| ())
            .ok_or(ChannelError::UnknownDelivery(delivery.delivery_id))
    }

    async fn nack(&self, delivery: &TaskDelivery) -> Result<(), ChannelError> {
        let mut state = self.lock()?;
        let queued = state
            .in_flight
            .remove(&delivery.delivery_id)
            .ok_or(ChannelError::UnknownDelivery(delivery.delivery_id))?;
        state.ready.push_back(queued);
        Ok(())
    }

    async fn has_live_task(&self, job_id: Uuid) -> Result<bool, ChannelError> {
        let state = self.lock()?;
        Ok(state
            .ready
            .iter()
            .chain(state.in_flight.values())
            .any(|queued| queued.task.job_id == job_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExportCategory, ExportFormat};

    fn task() -> ExportTask {
        ExportTask {
            job_id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            category: ExportCategory::Warehouse,
            format: ExportFormat::Xlsx,
        }
    }

    #[tokio::test]
    async fn test_receive_on_empty_channel() {
        let channel = InMemoryTaskChannel::new();
        assert!(channel.receive().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ack_removes_task() {
        let channel = InMemoryTaskChannel::new();
        let t = task();
        channel.enqueue(&t).await.unwrap();

        let delivery = channel.receive().await.unwrap().unwrap();
        assert_eq!(delivery.task, t);
        assert_eq!(delivery.attempt, 1);
        assert_eq!(channel.in_flight_len(), 1);

        channel.ack(&delivery).await.unwrap();
        assert_eq!(channel.in_flight_len(), 0);
        assert!(channel.receive().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_nack_redelivers_with_incremented_attempt() {
        let channel = InMemoryTaskChannel::new();
        channel.enqueue(&task()).await.unwrap();

        let first = channel.receive().await.unwrap().unwrap();
        channel.nack(&first).await.unwrap();

        let second = channel.receive().await.unwrap().unwrap();
        assert_eq!(second.delivery_id, first.delivery_id);
        assert_eq!(second.attempt, 2);
    }

    #[tokio::test]
    async fn test_double_ack_is_unknown_delivery() {
        let channel = InMemoryTaskChannel::new();
        channel.enqueue(&task()).await.unwrap();
        let delivery = channel.receive().await.unwrap().unwrap();

        channel.ack(&delivery).await.unwrap();
        assert!(matches!(
            channel.ack(&delivery).await,
            Err(ChannelError::UnknownDelivery(_))
        ));
    }

    #[tokio::test]
    async fn test_requeue_in_flight_simulates_worker_crash() {
        let channel = InMemoryTaskChannel::new();
        channel.enqueue(&task()).await.unwrap();
        channel.enqueue(&task()).await.unwrap();
        let _a = channel.receive().await.unwrap().unwrap();
        let _b = channel.receive().await.unwrap().unwrap();

        assert_eq!(channel.requeue_in_flight().unwrap(), 2);
        assert_eq!(channel.ready_len(), 2);
        assert_eq!(channel.in_flight_len(), 0);
    }

    #[tokio::test]
    async fn test_live_task_tracks_queue_and_lease() {
        let channel = InMemoryTaskChannel::new();
        let t = task();
        assert!(!channel.has_live_task(t.job_id).await.unwrap());

        channel.enqueue(&t).await.unwrap();
        assert!(channel.has_live_task(t.job_id).await.unwrap());
        assert!(!channel.has_live_task(Uuid::new_v4()).await.unwrap());

        let delivery = channel.receive().await.unwrap().unwrap();
        assert!(channel.has_live_task(t.job_id).await.unwrap());

        channel.ack(&delivery).await.unwrap();
        assert!(!channel.has_live_task(t.job_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_rejected_enqueue() {
        let channel = InMemoryTaskChannel::new();
        channel.set_reject_enqueue(true);
        assert!(channel.enqueue(&task()).await.is_err());
        assert_eq!(channel.ready_len(), 0);
    }
}
