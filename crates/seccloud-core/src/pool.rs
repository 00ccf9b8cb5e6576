//! Shared background worker pool.
//!
//! Deferred uploads and slice deletions run here so foreground filesystem
//! calls never wait on the network.
//!
//! # Design
//!
//! - Fixed number of named worker threads
//! - Bounded submission queue (reject-fast when full)
//! - Panicking jobs are contained and counted as failures
//! - `shutdown()` stops intake; queued jobs still run before workers exit

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, trace, warn};

/// Default number of worker threads.
pub const DEFAULT_WORKER_THREADS: usize = 4;

/// Default capacity of the submission queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Statistics for the pool.
#[derive(Debug, Default)]
pub struct PoolStats {
    /// Number of jobs accepted.
    pub jobs_submitted: AtomicU64,
    /// Number of jobs that ran to completion.
    pub jobs_completed: AtomicU64,
    /// Number of jobs that panicked.
    pub jobs_panicked: AtomicU64,
    /// Number of jobs rejected because the queue was full.
    pub jobs_rejected: AtomicU64,
    /// Jobs accepted but not yet finished.
    pub queue_depth: AtomicU64,
    /// Total execution time in nanoseconds.
    pub total_execution_nanos: AtomicU64,
}

impl PoolStats {
    fn record_submit(&self) {
        self.jobs_submitted.fetch_add(1, Ordering::Relaxed);
        self.queue_depth.fetch_add(1, Ordering::Relaxed);
    }

    fn record_complete(&self, success: bool, duration: Duration) {
        self.queue_depth.fetch_sub(1, Ordering::Relaxed);
        if success {
            self.jobs_completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.jobs_panicked.fetch_add(1, Ordering::Relaxed);
        }
        #[allow(clippy::cast_possible_truncation)]
        let nanos = duration.as_nanos() as u64;
        self.total_execution_nanos.fetch_add(nanos, Ordering::Relaxed);
    }

    fn record_reject(&self) {
        self.jobs_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Average execution time of finished jobs.
    pub fn avg_execution_time(&self) -> Duration {
        let finished =
            self.jobs_completed.load(Ordering::Relaxed) + self.jobs_panicked.load(Ordering::Relaxed);
        if finished == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(self.total_execution_nanos.load(Ordering::Relaxed) / finished)
    }
}

/// Configuration for the pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of worker threads.
    pub threads: usize,
    /// Capacity of the submission queue.
    pub queue_capacity: usize,
    /// Prefix for worker thread names.
    pub thread_name: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            threads: DEFAULT_WORKER_THREADS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            thread_name: "seccloud-worker".to_string(),
        }
    }
}

impl PoolConfig {
    #[must_use]
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }
}

/// Error when submitting to the pool.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    /// Queue is full; the caller should retry later.
    #[error("worker queue full (capacity: {capacity})")]
    QueueFull { capacity: usize },
    /// The pool has been shut down.
    #[error("worker pool has been shut down")]
    Shutdown,
}

/// Fixed-size thread pool with a bounded queue.
///
/// `Send + Sync`; share it behind an `Arc`.
pub struct WorkerPool {
    /// Dropped on shutdown so workers drain the queue and exit.
    submit_tx: RwLock<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown: AtomicBool,
    stats: Arc<PoolStats>,
    config: PoolConfig,
}

impl WorkerPool {
    /// Create a pool with default configuration.
    pub fn new() -> std::io::Result<Self> {
        Self::with_config(PoolConfig::default())
    }

    /// Create a pool with custom configuration.
    ///
    /// Fails only if a worker thread cannot be spawned.
    pub fn with_config(config: PoolConfig) -> std::io::Result<Self> {
        let threads = config.threads.max(1);
        let (submit_tx, submit_rx) = bounded::<Job>(config.queue_capacity.max(1));
        let stats = Arc::new(PoolStats::default());

        let mut workers = Vec::with_capacity(threads);
        for worker_id in 0..threads {
            let rx = submit_rx.clone();
            let stats = Arc::clone(&stats);
            let handle = thread::Builder::new()
                .name(format!("{}-{worker_id}", config.thread_name))
                .spawn(move || worker_loop(worker_id, &rx, &stats))?;
            workers.push(handle);
        }

        info!(
            threads,
            capacity = config.queue_capacity,
            "Worker pool started"
        );

        Ok(Self {
            submit_tx: RwLock::new(Some(submit_tx)),
            workers: Mutex::new(workers),
            shutdown: AtomicBool::new(false),
            stats,
            config,
        })
    }

    /// Queue `job` for execution without blocking.
    pub fn submit<F>(&self, job: F) -> Result<(), SubmitError>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(SubmitError::Shutdown);
        }
        let guard = self.submit_tx.read();
        let Some(tx) = guard.as_ref() else {
            return Err(SubmitError::Shutdown);
        };

        // Count before sending so a fast worker never sees depth underflow.
        self.stats.record_submit();
        match tx.try_send(Box::new(job)) {
            Ok(()) => {
                trace!("Job submitted to worker pool");
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                self.stats.queue_depth.fetch_sub(1, Ordering::Relaxed);
                self.stats.jobs_submitted.fetch_sub(1, Ordering::Relaxed);
                self.stats.record_reject();
                warn!(
                    capacity = self.config.queue_capacity,
                    "Worker queue full, rejecting job"
                );
                Err(SubmitError::QueueFull {
                    capacity: self.config.queue_capacity,
                })
            }
            Err(TrySendError::Disconnected(_)) => {
                self.stats.queue_depth.fetch_sub(1, Ordering::Relaxed);
                self.stats.jobs_submitted.fetch_sub(1, Ordering::Relaxed);
                error!("Worker channel disconnected");
                Err(SubmitError::Shutdown)
            }
        }
    }

    /// Queue `job`, waiting for queue space when the queue is full.
    ///
    /// Fails only once the pool has shut down. Must not be called from a job
    /// running on this pool, since that worker could be the one it waits on.
    pub fn submit_blocking<F>(&self, job: F) -> Result<(), SubmitError>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(SubmitError::Shutdown);
        }
        // Send on a clone so a blocked caller never holds up `shutdown`.
        let Some(tx) = self.submit_tx.read().clone() else {
            return Err(SubmitError::Shutdown);
        };

        self.stats.record_submit();
        if tx.send(Box::new(job)).is_err() {
            self.stats.queue_depth.fetch_sub(1, Ordering::Relaxed);
            self.stats.jobs_submitted.fetch_sub(1, Ordering::Relaxed);
            error!("Worker channel disconnected");
            return Err(SubmitError::Shutdown);
        }
        trace!("Job submitted to worker pool");
        Ok(())
    }

    /// Queue `job` and return a receiver for its result.
    ///
    /// The receiver disconnects without a value if the job panics.
    pub fn submit_with_result<T, F>(&self, job: F) -> Result<Receiver<T>, SubmitError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (tx, rx) = bounded(1);
        self.submit(move || {
            // Receiver may be gone; the job still counts as run.
            let _ = tx.send(job());
        })?;
        Ok(rx)
    }

    /// Like [`submit_with_result`](Self::submit_with_result), but waits for
    /// queue space instead of rejecting.
    pub fn submit_blocking_with_result<T, F>(&self, job: F) -> Result<Receiver<T>, SubmitError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (tx, rx) = bounded(1);
        self.submit_blocking(move || {
            let _ = tx.send(job());
        })?;
        Ok(rx)
    }

    /// Pool statistics.
    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }

    /// Jobs accepted but not yet finished.
    pub fn queue_depth(&self) -> u64 {
        self.stats.queue_depth.load(Ordering::Relaxed)
    }

    /// Configured worker count.
    pub fn threads(&self) -> usize {
        self.config.threads
    }

    /// Whether the pool still accepts jobs.
    pub fn is_running(&self) -> bool {
        !self.shutdown.load(Ordering::Acquire)
    }

    /// Stop accepting jobs. Already queued jobs still run.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(pending = self.queue_depth(), "Initiating worker pool shutdown");
        self.submit_tx.write().take();
    }

    /// Shut down and wait for workers to drain the queue and exit.
    pub fn wait(&self) {
        self.shutdown();
        debug!("Waiting for pool workers to finish");
        let workers = std::mem::take(&mut *self.workers.lock());
        let current = thread::current().id();
        for handle in workers {
            // A job that triggers shutdown must not join its own thread.
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                error!("Worker thread panicked outside a job");
            }
        }
        info!("Worker pool shutdown complete");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Signal shutdown but don't wait; workers finish the queue on their own.
        self.shutdown();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .field("queue_depth", &self.queue_depth())
            .finish_non_exhaustive()
    }
}

/// Worker thread main loop. Exits once the queue is empty and disconnected.
fn worker_loop(worker_id: usize, rx: &Receiver<Job>, stats: &PoolStats) {
    debug!(worker_id, "Worker started");

    while let Ok(job) = rx.recv() {
        let start = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(job));
        let elapsed = start.elapsed();

        if outcome.is_err() {
            error!(worker_id, "Background job panicked");
        }
        stats.record_complete(outcome.is_ok(), elapsed);
        trace!(
            worker_id,
            elapsed_ms = elapsed.as_millis(),
            success = outcome.is_ok(),
            "Job completed"
        );
    }

    debug!(worker_id, "Worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;

    fn small_pool(threads: usize, capacity: usize) -> WorkerPool {
        WorkerPool::with_config(
            PoolConfig::default()
                .with_threads(threads)
                .with_capacity(capacity),
        )
        .unwrap()
    }

    #[test]
    fn test_config_builder() {
        let config = PoolConfig::default().with_threads(8).with_capacity(512);
        assert_eq!(config.threads, 8);
        assert_eq!(config.queue_capacity, 512);
        assert_eq!(PoolConfig::default().threads, DEFAULT_WORKER_THREADS);
    }

    #[test]
    fn test_jobs_run() {
        let pool = small_pool(2, 16);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let counter = Arc::clone(&counter);
            pool.submit(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        pool.wait();
        assert_eq!(counter.load(Ordering::SeqCst), 10);
        assert_eq!(pool.stats().jobs_completed.load(Ordering::Relaxed), 10);
        assert_eq!(pool.queue_depth(), 0);
    }

    #[test]
    fn test_submit_with_result() {
        let pool = small_pool(1, 4);
        let rx = pool.submit_with_result(|| 21 * 2).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 42);
    }

    #[test]
    fn test_queue_full_rejects() {
        let pool = small_pool(1, 1);
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let (started_tx, started_rx) = mpsc::channel::<()>();

        // Occupy the only worker.
        pool.submit(move || {
            started_tx.send(()).unwrap();
            let _ = release_rx.recv();
        })
        .unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        // Fill the queue.
        pool.submit(|| {}).unwrap();

        let err = pool.submit(|| {}).unwrap_err();
        assert!(matches!(err, SubmitError::QueueFull { capacity: 1 }));
        assert_eq!(pool.stats().jobs_rejected.load(Ordering::Relaxed), 1);

        release_tx.send(()).unwrap();
        pool.wait();
        assert_eq!(pool.stats().jobs_completed.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_submit_blocking_waits_for_space() {
        let pool = Arc::new(small_pool(1, 1));
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let (started_tx, started_rx) = mpsc::channel::<()>();
        let counter = Arc::new(AtomicUsize::new(0));

        pool.submit(move || {
            started_tx.send(()).unwrap();
            let _ = release_rx.recv();
        })
        .unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        pool.submit(|| {}).unwrap();

        let submitter = {
            let pool = Arc::clone(&pool);
            let counter = Arc::clone(&counter);
            thread::spawn(move || {
                pool.submit_blocking(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
            })
        };
        thread::sleep(Duration::from_millis(50));
        assert!(!submitter.is_finished());

        release_tx.send(()).unwrap();
        submitter.join().unwrap().unwrap();
        pool.wait();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(pool.stats().jobs_rejected.load(Ordering::Relaxed), 0);
        assert_eq!(pool.stats().jobs_completed.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_submit_blocking_after_shutdown() {
        let pool = small_pool(1, 1);
        pool.wait();
        assert!(matches!(pool.submit_blocking(|| {}), Err(SubmitError::Shutdown)));
        assert!(pool.submit_blocking_with_result(|| 1).is_err());
    }

    #[test]
    fn test_shutdown_rejects_and_drains() {
        let pool = small_pool(1, 16);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let counter = Arc::clone(&counter);
            pool.submit(move || {
                thread::sleep(Duration::from_millis(5));
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }

        pool.shutdown();
        assert!(!pool.is_running());
        assert!(matches!(pool.submit(|| {}), Err(SubmitError::Shutdown)));

        pool.wait();
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_panicking_job_is_contained() {
        let pool = small_pool(1, 4);
        pool.submit(|| panic!("boom")).unwrap();
        let rx = pool.submit_with_result(|| "still alive").unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "still alive");

        pool.wait();
        assert_eq!(pool.stats().jobs_panicked.load(Ordering::Relaxed), 1);
    }
}
