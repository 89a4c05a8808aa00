//! Maintenance worker claiming and executing queued jobs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use markvault_core::{defaults, Job, JobRepository, JobType, Result};
use markvault_db::Database;

use crate::handler::{JobContext, JobHandler, JobResult};

/// Configuration for the maintenance worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Polling interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Maximum number of concurrent jobs.
    pub max_concurrent_jobs: usize,
    /// Whether to enable job processing.
    pub enabled: bool,
    /// Interval between periodic orphan-repair enqueues. `None` disables
    /// the periodic scan (repair stays available on demand).
    pub orphan_scan_interval: Option<Duration>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: defaults::JOB_POLL_INTERVAL_MS,
            max_concurrent_jobs: defaults::JOB_MAX_CONCURRENT,
            enabled: true,
            orphan_scan_interval: Some(Duration::from_secs(defaults::ORPHAN_SCAN_INTERVAL_SECS)),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `JOB_WORKER_ENABLED` | `true` | Enable/disable job processing |
    /// | `JOB_MAX_CONCURRENT` | `2` | Max concurrent jobs |
    /// | `JOB_POLL_INTERVAL_MS` | `500` | Polling interval when queue is empty |
    /// | `ORPHAN_SCAN_INTERVAL_SECS` | `21600` | Periodic repair interval (0 disables) |
    pub fn from_env() -> Self {
        let enabled = std::env::var("JOB_WORKER_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let max_concurrent_jobs = std::env::var("JOB_MAX_CONCURRENT")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults::JOB_MAX_CONCURRENT)
            .max(1);

        let poll_interval_ms = std::env::var("JOB_POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::JOB_POLL_INTERVAL_MS);

        let orphan_scan_interval = std::env::var("ORPHAN_SCAN_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::ORPHAN_SCAN_INTERVAL_SECS);

        Self {
            poll_interval_ms,
            max_concurrent_jobs,
            enabled,
            orphan_scan_interval: (orphan_scan_interval > 0)
                .then(|| Duration::from_secs(orphan_scan_interval)),
        }
    }

    /// Create a new config with custom poll interval.
    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    /// Set maximum concurrent jobs.
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent_jobs = max;
        self
    }

    /// Enable or disable job processing.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Event emitted by the maintenance worker.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// A job was started.
    JobStarted { job_id: Uuid, job_type: JobType },
    /// A job completed successfully.
    JobCompleted { job_id: Uuid, job_type: JobType },
    /// A job failed.
    JobFailed {
        job_id: Uuid,
        job_type: JobType,
        error: String,
    },
    /// Worker started.
    WorkerStarted,
    /// Worker stopped.
    WorkerStopped,
}

/// Broadcast channel capacity for worker events.
const EVENT_CAPACITY: usize = 64;

/// Handle for controlling a running worker.
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<WorkerEvent>,
}

impl WorkerHandle {
    /// Signal the worker to shut down gracefully.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| markvault_core::Error::Internal("Failed to send shutdown signal".into()))?;
        Ok(())
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_rx.resubscribe()
    }
}

/// Maintenance worker that processes jobs from the queue.
pub struct JobWorker {
    db: Database,
    config: WorkerConfig,
    handlers: Arc<RwLock<HashMap<JobType, Arc<dyn JobHandler>>>>,
    event_tx: broadcast::Sender<WorkerEvent>,
}

impl JobWorker {
    /// Create a new maintenance worker.
    pub fn new(db: Database, config: WorkerConfig) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            db,
            config,
            handlers: Arc::new(RwLock::new(HashMap::new())),
            event_tx,
        }
    }

    /// Register a handler for a job type.
    pub async fn register_handler<H: JobHandler + 'static>(&self, handler: H) {
        let job_type = handler.job_type();
        let mut handlers = self.handlers.write().await;
        handlers.insert(job_type, Arc::new(handler));
        debug!(?job_type, "Registered job handler");
    }

    /// Start the worker and return a handle for control.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let event_rx = self.event_tx.subscribe();

        let worker = Arc::new(self);

        tokio::spawn(async move {
            worker.run(&mut shutdown_rx).await;
        });

        WorkerHandle {
            shutdown_tx,
            event_rx,
        }
    }

    /// Run the worker loop with concurrent job processing.
    ///
    /// Claims up to `max_concurrent_jobs` at a time and processes them
    /// concurrently. Only sleeps when the queue is empty.
    #[instrument(skip(self, shutdown_rx))]
    async fn run(self: Arc<Self>, shutdown_rx: &mut mpsc::Receiver<()>) {
        if !self.config.enabled {
            info!("Maintenance worker is disabled, not starting");
            return;
        }

        info!(
            poll_interval_ms = self.config.poll_interval_ms,
            max_concurrent = self.config.max_concurrent_jobs,
            "Maintenance worker started"
        );

        let _ = self.event_tx.send(WorkerEvent::WorkerStarted);

        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let max_concurrent = self.config.max_concurrent_jobs;
        let mut last_orphan_scan = Instant::now();

        loop {
            // Check for shutdown before claiming jobs
            if shutdown_rx.try_recv().is_ok() {
                info!("Maintenance worker received shutdown signal");
                break;
            }

            self.maybe_queue_orphan_scan(&mut last_orphan_scan).await;

            // Claim up to max_concurrent jobs
            let mut claimed = 0;
            let mut tasks = tokio::task::JoinSet::new();

            for _ in 0..max_concurrent {
                match self.db.jobs.claim_next().await {
                    Ok(Some(job)) => {
                        claimed += 1;
                        let worker = Arc::clone(&self);
                        tasks.spawn(async move {
                            worker.execute_job(job).await;
                        });
                    }
                    Ok(None) => break,
                    Err(e) => {
                        error!(error = %e, "Failed to claim job");
                        break;
                    }
                }
            }

            if claimed == 0 {
                // Queue empty — sleep before polling again
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Maintenance worker received shutdown signal");
                        break;
                    }
                    _ = sleep(poll_interval) => {}
                }
            } else {
                debug!(claimed, "Processing concurrent job batch");
                // Wait for all claimed jobs to complete
                while let Some(result) = tasks.join_next().await {
                    if let Err(e) = result {
                        error!(error = ?e, "Job task panicked");
                    }
                }
                // No sleep — immediately try to claim more jobs
            }
        }

        let _ = self.event_tx.send(WorkerEvent::WorkerStopped);
        info!("Maintenance worker stopped");
    }

    /// Enqueue a periodic orphan-repair job when the interval elapses.
    ///
    /// Deduplicated queueing keeps at most one pending repair regardless
    /// of how often the interval fires.
    async fn maybe_queue_orphan_scan(&self, last_scan: &mut Instant) {
        let Some(interval) = self.config.orphan_scan_interval else {
            return;
        };
        if last_scan.elapsed() < interval {
            return;
        }
        *last_scan = Instant::now();

        match self
            .db
            .jobs
            .queue_deduplicated(
                None,
                JobType::OrphanRepair,
                JobType::OrphanRepair.default_priority(),
                None,
            )
            .await
        {
            Ok(Some(job_id)) => {
                debug!(job_id = %job_id, "Queued periodic orphan repair");
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Failed to queue periodic orphan repair"),
        }
    }

    /// Execute one claimed job and record its outcome.
    async fn execute_job(&self, job: Job) {
        let job_id = job.id;
        let job_type = job.job_type;
        let start = Instant::now();

        let handler = {
            let handlers = self.handlers.read().await;
            handlers.get(&job_type).cloned()
        };

        let Some(handler) = handler else {
            warn!(job_id = %job_id, ?job_type, "No handler registered for job type");
            let _ = self.db.jobs.fail(job_id, "no handler registered").await;
            return;
        };

        let _ = self.event_tx.send(WorkerEvent::JobStarted { job_id, job_type });
        debug!(job_id = %job_id, ?job_type, "Executing job");

        match handler.execute(JobContext::new(job)).await {
            JobResult::Success(result) => {
                if let Err(e) = self.db.jobs.complete(job_id, result).await {
                    error!(job_id = %job_id, error = %e, "Failed to mark job completed");
                }
                info!(
                    subsystem = "jobs",
                    component = "worker",
                    job_id = %job_id,
                    job_type = ?job_type,
                    duration_ms = start.elapsed().as_millis() as u64,
                    success = true,
                    "Job completed"
                );
                let _ = self
                    .event_tx
                    .send(WorkerEvent::JobCompleted { job_id, job_type });
            }
            JobResult::Failed(error) => {
                if let Err(e) = self.db.jobs.fail(job_id, &error).await {
                    error!(job_id = %job_id, error = %e, "Failed to mark job failed");
                }
                warn!(
                    subsystem = "jobs",
                    component = "worker",
                    job_id = %job_id,
                    job_type = ?job_type,
                    error = %error,
                    "Job failed"
                );
                let _ = self.event_tx.send(WorkerEvent::JobFailed {
                    job_id,
                    job_type,
                    error,
                });
            }
        }
    }
}
