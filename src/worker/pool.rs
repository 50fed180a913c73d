//! Worker pool processing review jobs from the Redis queue.
//!
//! A pool spawns a configurable number of workers, each an independent async
//! task pulling from the shared queue. Shutdown is signalled over a broadcast
//! channel; workers finish their current job before stopping.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::metrics;
use crate::queue::{QueueError, ReviewJob, ReviewQueue};

use super::{JobHandler, WorkerError};

/// Errors that can occur in the worker pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Failed to talk to the job queue.
    #[error("Queue connection failed: {0}")]
    QueueConnection(#[from] QueueError),

    /// Pool is already running.
    #[error("Pool is already running")]
    AlreadyRunning,

    /// Pool is not running.
    #[error("Pool is not running")]
    NotRunning,

    /// Shutdown timed out.
    #[error("Shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),
}

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker tasks to spawn.
    pub num_workers: usize,
    /// How long a dequeue blocks when the queue is empty.
    pub poll_interval: Duration,
    /// Maximum time allowed for processing a single job.
    pub job_timeout: Duration,
    /// Timeout for graceful shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            num_workers: 4,
            poll_interval: Duration::from_secs(1),
            job_timeout: Duration::from_secs(300),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl WorkerPoolConfig {
    /// Creates a configuration with the specified number of workers.
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers,
            ..Default::default()
        }
    }

    /// Sets the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the job timeout.
    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    /// Sets the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Statistics about the worker pool.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    pub num_workers: usize,
    pub active_workers: usize,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub average_job_duration: Duration,
}

impl PoolStats {
    /// Total number of jobs processed, completed and failed.
    pub fn total_processed(&self) -> u64 {
        self.jobs_completed + self.jobs_failed
    }

    /// Success rate as a percentage.
    pub fn success_rate(&self) -> f64 {
        let total = self.total_processed();
        if total == 0 {
            return 0.0;
        }
        (self.jobs_completed as f64 / total as f64) * 100.0
    }
}

/// Shared state for tracking pool statistics.
struct SharedPoolStats {
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    total_duration_ms: AtomicU64,
    active_workers: AtomicU64,
}

impl SharedPoolStats {
    fn new() -> Self {
        Self {
            jobs_completed: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
            total_duration_ms: AtomicU64::new(0),
            active_workers: AtomicU64::new(0),
        }
    }

    fn record_completion(&self, duration: Duration) {
        self.jobs_completed.fetch_add(1, Ordering::SeqCst);
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    fn record_failure(&self, duration: Duration) {
        self.jobs_failed.fetch_add(1, Ordering::SeqCst);
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    fn increment_active(&self) {
        self.active_workers.fetch_add(1, Ordering::SeqCst);
        metrics::worker_busy();
    }

    fn decrement_active(&self) {
        self.active_workers.fetch_sub(1, Ordering::SeqCst);
        metrics::worker_idle();
    }

    fn to_pool_stats(&self, num_workers: usize) -> PoolStats {
        let completed = self.jobs_completed.load(Ordering::SeqCst);
        let failed = self.jobs_failed.load(Ordering::SeqCst);
        let total_duration_ms = self.total_duration_ms.load(Ordering::SeqCst);
        let active = self.active_workers.load(Ordering::SeqCst);

        let total_jobs = completed + failed;
        let average_duration = if total_jobs > 0 {
            Duration::from_millis(total_duration_ms / total_jobs)
        } else {
            Duration::ZERO
        };

        PoolStats {
            num_workers,
            active_workers: active as usize,
            jobs_completed: completed,
            jobs_failed: failed,
            average_job_duration: average_duration,
        }
    }
}

/// Pool of workers processing review jobs from a shared queue.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    queue: Arc<ReviewQueue>,
    handler: Arc<dyn JobHandler>,
    shutdown_tx: broadcast::Sender<()>,
    worker_handles: Vec<JoinHandle<()>>,
    stats: Arc<SharedPoolStats>,
    is_running: AtomicBool,
}

impl WorkerPool {
    /// Creates a worker pool over an existing queue connection.
    pub fn new(
        config: WorkerPoolConfig,
        queue: Arc<ReviewQueue>,
        handler: Arc<dyn JobHandler>,
    ) -> Self {
        // Buffer size of 1 is sufficient since shutdown is sent once.
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            queue,
            handler,
            shutdown_tx,
            worker_handles: Vec::new(),
            stats: Arc::new(SharedPoolStats::new()),
            is_running: AtomicBool::new(false),
        }
    }

    /// Starts all workers.
    ///
    /// Jobs left on the processing list by a previous run are recovered
    /// first, then workers begin polling immediately.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::AlreadyRunning` if the pool is already running.
    pub async fn start(&mut self) -> Result<(), PoolError> {
        if self.is_running.load(Ordering::SeqCst) {
            return Err(PoolError::AlreadyRunning);
        }

        match self.queue.recover_pending().await {
            Ok(recovered) if recovered > 0 => {
                info!(recovered, "recovered jobs from processing list");
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "failed to recover processing jobs");
            }
        }

        for i in 0..self.config.num_workers {
            let worker = Worker::new(
                format!("worker-{}", i),
                Arc::clone(&self.queue),
                Arc::clone(&self.handler),
                self.shutdown_tx.subscribe(),
                self.config.poll_interval,
                self.config.job_timeout,
                Arc::clone(&self.stats),
            );

            let handle = tokio::spawn(async move {
                worker.run().await;
            });

            self.worker_handles.push(handle);
        }

        self.is_running.store(true, Ordering::SeqCst);
        info!(num_workers = self.config.num_workers, "worker pool started");

        Ok(())
    }

    /// Gracefully shuts down all workers.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::ShutdownTimeout` if workers do not stop within
    /// the configured timeout.
    pub async fn shutdown(&mut self) -> Result<(), PoolError> {
        if !self.is_running.load(Ordering::SeqCst) {
            return Err(PoolError::NotRunning);
        }

        info!("initiating worker pool shutdown");

        // Workers may have already stopped; a send error is fine.
        let _ = self.shutdown_tx.send(());

        let shutdown_future = async {
            for handle in self.worker_handles.drain(..) {
                if let Err(e) = handle.await {
                    error!(error = %e, "worker task panicked during shutdown");
                }
            }
        };

        match tokio::time::timeout(self.config.shutdown_timeout, shutdown_future).await {
            Ok(()) => {
                self.is_running.store(false, Ordering::SeqCst);
                info!("worker pool shutdown complete");
                Ok(())
            }
            Err(_) => {
                self.is_running.store(false, Ordering::SeqCst);
                Err(PoolError::ShutdownTimeout(self.config.shutdown_timeout))
            }
        }
    }

    /// Current pool statistics.
    pub fn stats(&self) -> PoolStats {
        self.stats.to_pool_stats(self.config.num_workers)
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    pub fn num_workers(&self) -> usize {
        self.config.num_workers
    }

    pub fn queue(&self) -> &Arc<ReviewQueue> {
        &self.queue
    }
}

/// A single worker pulling jobs from the queue.
pub struct Worker {
    id: String,
    queue: Arc<ReviewQueue>,
    handler: Arc<dyn JobHandler>,
    shutdown_rx: broadcast::Receiver<()>,
    poll_interval: Duration,
    job_timeout: Duration,
    stats: Arc<SharedPoolStats>,
}

impl Worker {
    fn new(
        id: String,
        queue: Arc<ReviewQueue>,
        handler: Arc<dyn JobHandler>,
        shutdown_rx: broadcast::Receiver<()>,
        poll_interval: Duration,
        job_timeout: Duration,
        stats: Arc<SharedPoolStats>,
    ) -> Self {
        Self {
            id,
            queue,
            handler,
            shutdown_rx,
            poll_interval,
            job_timeout,
            stats,
        }
    }

    /// Main worker loop: poll, process, repeat until shutdown.
    async fn run(mut self) {
        info!(worker_id = %self.id, "worker started");

        loop {
            match self.shutdown_rx.try_recv() {
                Ok(()) | Err(broadcast::error::TryRecvError::Closed) => {
                    info!(worker_id = %self.id, "worker received shutdown signal");
                    break;
                }
                Err(broadcast::error::TryRecvError::Lagged(_)) => {
                    // Missed signals can only be shutdown; check again.
                    continue;
                }
                Err(broadcast::error::TryRecvError::Empty) => {}
            }

            match self.queue.dequeue(self.poll_interval).await {
                Ok(Some(job)) => {
                    self.process_job(job).await;
                }
                Ok(None) => {
                    // The dequeue already waited poll_interval.
                    debug!(worker_id = %self.id, "no jobs available");
                }
                Err(e) => {
                    error!(worker_id = %self.id, error = %e, "failed to dequeue job");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }

        info!(worker_id = %self.id, "worker stopped");
    }

    /// Processes a single dequeued job.
    async fn process_job(&self, mut job: ReviewJob) {
        let job_id = job.id;
        let start_time = Instant::now();

        info!(
            worker_id = %self.id,
            job_id = %job_id,
            review_id = job.review_id,
            attempt = job.attempts + 1,
            "processing review job"
        );

        self.stats.increment_active();
        job.increment_attempts();

        let result = tokio::time::timeout(self.job_timeout, self.handler.handle(&job)).await;
        let duration = start_time.elapsed();

        self.stats.decrement_active();

        let result = match result {
            Ok(inner) => inner,
            Err(_) => Err(WorkerError::Transient(format!(
                "job timed out after {:?}",
                self.job_timeout
            ))),
        };

        match result {
            Ok(()) => {
                if let Err(e) = self.queue.complete(job_id).await {
                    error!(worker_id = %self.id, job_id = %job_id, error = %e, "failed to mark job complete");
                }
                self.stats.record_completion(duration);
                metrics::record_review("completed", duration.as_secs_f64());
                info!(
                    worker_id = %self.id,
                    job_id = %job_id,
                    review_id = job.review_id,
                    duration_ms = duration.as_millis() as u64,
                    "job completed"
                );
            }
            Err(e) => {
                self.stats.record_failure(duration);

                if !e.is_permanent() && job.should_retry() {
                    warn!(
                        worker_id = %self.id,
                        job_id = %job_id,
                        error = %e,
                        remaining_attempts = job.remaining_attempts(),
                        "job failed, requeueing for retry"
                    );
                    metrics::record_review("failed", duration.as_secs_f64());

                    if let Err(requeue_err) = self.queue.requeue(&job).await {
                        error!(
                            worker_id = %self.id,
                            job_id = %job_id,
                            error = %requeue_err,
                            "failed to requeue job"
                        );
                    }
                } else {
                    error!(
                        worker_id = %self.id,
                        job_id = %job_id,
                        error = %e,
                        permanent = e.is_permanent(),
                        "job failed, moving to dead letter list"
                    );
                    metrics::record_review("dead_letter", duration.as_secs_f64());

                    if let Err(dlq_err) = self.queue.dead_letter(&job, &e.to_string()).await {
                        error!(
                            worker_id = %self.id,
                            job_id = %job_id,
                            error = %dlq_err,
                            "failed to move job to dead letter list"
                        );
                    }
                }
            }
        }
    }

    /// The worker's id.
    pub fn id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_pool_config_default() {
        let config = WorkerPoolConfig::default();

        assert_eq!(config.num_workers, 4);
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.job_timeout, Duration::from_secs(300));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_worker_pool_config_builder() {
        let config = WorkerPoolConfig::new(8)
            .with_poll_interval(Duration::from_secs(5))
            .with_job_timeout(Duration::from_secs(600))
            .with_shutdown_timeout(Duration::from_secs(120));

        assert_eq!(config.num_workers, 8);
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.job_timeout, Duration::from_secs(600));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_pool_stats_default() {
        let stats = PoolStats::default();

        assert_eq!(stats.total_processed(), 0);
        assert!((stats.success_rate() - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_pool_stats_calculations() {
        let stats = PoolStats {
            num_workers: 4,
            active_workers: 2,
            jobs_completed: 80,
            jobs_failed: 20,
            average_job_duration: Duration::from_secs(60),
        };

        assert_eq!(stats.total_processed(), 100);
        assert!((stats.success_rate() - 80.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_shared_pool_stats() {
        let stats = SharedPoolStats::new();

        stats.record_completion(Duration::from_secs(10));
        stats.record_completion(Duration::from_secs(20));
        stats.record_failure(Duration::from_secs(5));

        let pool_stats = stats.to_pool_stats(4);

        assert_eq!(pool_stats.num_workers, 4);
        assert_eq!(pool_stats.jobs_completed, 2);
        assert_eq!(pool_stats.jobs_failed, 1);
        // Average: (10000 + 20000 + 5000) / 3 ms.
        assert!(pool_stats.average_job_duration.as_millis() > 11000);
        assert!(pool_stats.average_job_duration.as_millis() < 12000);
    }

    #[test]
    fn test_shared_pool_stats_active_workers() {
        let stats = SharedPoolStats::new();

        assert_eq!(stats.active_workers.load(Ordering::SeqCst), 0);

        stats.increment_active();
        stats.increment_active();
        assert_eq!(stats.active_workers.load(Ordering::SeqCst), 2);

        stats.decrement_active();
        assert_eq!(stats.active_workers.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_pool_error_display() {
        let err = PoolError::AlreadyRunning;
        assert!(err.to_string().contains("already running"));

        let err = PoolError::ShutdownTimeout(Duration::from_secs(30));
        assert!(err.to_string().contains("30"));
    }
}
