//! Periodic runner for the export background jobs.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

/// How often a job runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobFrequency {
    /// Queue polling.
    Milliseconds(u64),
    Seconds(u64),
}

impl JobFrequency {
    /// Period between runs. Never zero.
    pub fn duration(&self) -> Duration {
        match self {
            JobFrequency::Milliseconds(ms) => Duration::from_millis((*ms).max(1)),
            JobFrequency::Seconds(secs) => Duration::from_secs((*secs).max(1)),
        }
    }
}

#[async_trait::async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &'static str;

    fn frequency(&self) -> JobFrequency;

    /// One run. An error is logged and the job keeps its schedule.
    async fn execute(&self) -> Result<(), String>;
}

pub struct JobScheduler {
    jobs: Vec<Arc<dyn Job>>,
    shutdown: watch::Sender<bool>,
    running: JoinSet<()>,
}

impl JobScheduler {
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            jobs: Vec::new(),
            shutdown,
            running: JoinSet::new(),
        }
    }

    pub fn register<J: Job + 'static>(&mut self, job: J) {
        self.jobs.push(Arc::new(job));
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    /// Spawns one loop per registered job. The first run happens one period
    /// after start.
    pub fn start(&mut self) {
        info!(jobs = self.jobs.len(), "Starting job scheduler");
        for job in &self.jobs {
            self.running
                .spawn(run_job(Arc::clone(job), self.shutdown.subscribe()));
        }
    }

    /// Signals every job loop to stop after its current run.
    pub fn shutdown(&self) {
        info!("Stopping job scheduler");
        self.shutdown.send_replace(true);
    }

    /// Waits for the job loops to exit, giving up after `timeout`.
    pub async fn wait_for_shutdown(mut self, timeout: Duration) {
        let drained = time::timeout(timeout, async {
            while let Some(joined) = self.running.join_next().await {
                if let Err(e) = joined {
                    warn!(error = %e, "Job task panicked");
                }
            }
        })
        .await;

        match drained {
            Ok(()) => info!("Job scheduler stopped"),
            Err(_) => {
                warn!(timeout = ?timeout, "Job scheduler shutdown timed out");
                self.running.abort_all();
            }
        }
    }
}

async fn run_job(job: Arc<dyn Job>, mut shutdown: watch::Receiver<bool>) {
    let name = job.name();
    let period = job.frequency().duration();
    let mut interval = time::interval_at(Instant::now() + period, period);
    // A slow run pushes the next one back instead of bursting.
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(job = name, period = ?period, "Job scheduled");

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let started = Instant::now();
                if let Err(e) = job.execute().await {
                    error!(
                        job = name,
                        elapsed_ms = started.elapsed().as_millis(),
                        error = %e,
                        "Job failed"
                    );
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    info!(job = name, "Job stopped");
}
