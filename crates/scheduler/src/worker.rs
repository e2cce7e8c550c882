//! Render worker pool.
//!
//! Worker threads pull jobs from the [`JobScheduler`], hand them to the
//! executor callback and mark them complete. Workers never touch main-loop
//! state; the executor reports back through a [`Poster`](crate::Poster).

use crate::task_queue::panic_message;
use crate::{CancellationToken, Job, JobScheduler, SchedulerError};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, warn};

/// Callback invoked for each dequeued job.
///
/// It is called for cancelled jobs too, so that it can acknowledge the
/// cancellation to the main loop. Long-running work should poll
/// `token.is_cancelled()` and return early.
pub type JobExecutor = Arc<dyn Fn(&Job, &CancellationToken) + Send + Sync>;

/// Configuration for the render worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker threads. Default: logical CPU count.
    pub num_workers: usize,

    /// Sleep between polls of an empty queue. Default: 100ms.
    pub poll_interval: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            num_workers: num_cpus(),
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl WorkerPoolConfig {
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers,
            ..Self::default()
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Pool of render worker threads.
///
/// # Example
///
/// ```
/// use pdf_viewer_scheduler::{CancellationToken, Job, JobPriority, JobScheduler, WorkerPool, WorkerPoolConfig};
/// use std::sync::Arc;
///
/// let scheduler = JobScheduler::new();
/// let executor = Arc::new(|job: &Job, token: &CancellationToken| {
///     if token.is_cancelled() {
///         return;
///     }
///     let _ = job.page;
/// });
///
/// let pool = WorkerPool::new(scheduler.clone(), executor, WorkerPoolConfig::new(1)).unwrap();
/// scheduler.submit(JobPriority::Visible, 0, 1);
/// pool.shutdown();
/// ```
pub struct WorkerPool {
    workers: Vec<Worker>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Spawn the worker threads.
    ///
    /// Fails only if the OS refuses to spawn a thread; workers spawned
    /// before the failure are stopped again.
    pub fn new(
        scheduler: JobScheduler,
        executor: JobExecutor,
        config: WorkerPoolConfig,
    ) -> Result<Self, SchedulerError> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut pool = Self {
            workers: Vec::with_capacity(config.num_workers),
            shutdown: shutdown.clone(),
        };

        for id in 0..config.num_workers.max(1) {
            let worker = Worker::spawn(
                id,
                scheduler.clone(),
                executor.clone(),
                shutdown.clone(),
                config.poll_interval,
            )?;
            pool.workers.push(worker);
        }

        debug!(workers = pool.workers.len(), "render worker pool started");
        Ok(pool)
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Signal all workers and wait for them to finish their current job.
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        for worker in self.workers.drain(..) {
            worker.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            self.stop_and_join();
        }
    }
}

struct Worker {
    id: usize,
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    fn spawn(
        id: usize,
        scheduler: JobScheduler,
        executor: JobExecutor,
        shutdown: Arc<AtomicBool>,
        poll_interval: Duration,
    ) -> Result<Self, SchedulerError> {
        let thread = thread::Builder::new()
            .name(format!("pdf-render-worker-{}", id))
            .spawn(move || Self::run(scheduler, executor, shutdown, poll_interval))
            .map_err(SchedulerError::Spawn)?;

        Ok(Self {
            id,
            thread: Some(thread),
        })
    }

    fn run(
        scheduler: JobScheduler,
        executor: JobExecutor,
        shutdown: Arc<AtomicBool>,
        poll_interval: Duration,
    ) {
        while !shutdown.load(Ordering::Acquire) {
            match scheduler.next_job() {
                Some(job) => {
                    let token = scheduler.get_cancellation_token(job.id).unwrap_or_else(|| {
                        // Cleared while in flight: treat as cancelled.
                        let token = CancellationToken::new();
                        token.cancel();
                        token
                    });
                    if let Err(payload) =
                        panic::catch_unwind(AssertUnwindSafe(|| executor(&job, &token)))
                    {
                        error!(
                            job_id = job.id,
                            page = job.page,
                            panic = panic_message(&*payload),
                            "render job panicked"
                        );
                    }
                    scheduler.complete_job(job.id);
                }
                None => thread::sleep(poll_interval),
            }
        }
    }

    fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!(worker = self.id, "render worker panicked");
            }
        }
    }
}

fn num_cpus() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::JobPriority;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    fn wait_until(deadline: Duration, done: impl Fn() -> bool) {
        let start = Instant::now();
        while !done() && start.elapsed() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_worker_pool_config() {
        let config = WorkerPoolConfig::default();
        assert!(config.num_workers > 0);
        assert_eq!(config.poll_interval, Duration::from_millis(100));

        let config = WorkerPoolConfig::new(4).with_poll_interval(Duration::from_millis(5));
        assert_eq!(config.num_workers, 4);
        assert_eq!(config.poll_interval, Duration::from_millis(5));
    }

    #[test]
    fn test_worker_pool_executes_jobs() {
        let scheduler = JobScheduler::new();
        let executed = Arc::new(AtomicUsize::new(0));
        let counter = executed.clone();
        let executor = Arc::new(move |_job: &Job, _token: &CancellationToken| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let config = WorkerPoolConfig::new(2).with_poll_interval(Duration::from_millis(5));
        let pool = WorkerPool::new(scheduler.clone(), executor, config).unwrap();
        assert_eq!(pool.num_workers(), 2);

        for page in 0..5 {
            scheduler.submit(JobPriority::Visible, page, 1);
        }
        wait_until(Duration::from_secs(5), || executed.load(Ordering::SeqCst) == 5);
        assert_eq!(executed.load(Ordering::SeqCst), 5);

        pool.shutdown();
        assert_eq!(scheduler.stats().jobs_completed, 5);
    }

    #[test]
    fn test_worker_sees_cancelled_token() {
        let scheduler = JobScheduler::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let record = seen.clone();
        let executor = Arc::new(move |job: &Job, token: &CancellationToken| {
            record.lock().push((job.page, token.is_cancelled()));
        });

        let (_, token) = scheduler.submit(JobPriority::Visible, 8, 1);
        token.cancel();

        let config = WorkerPoolConfig::new(1).with_poll_interval(Duration::from_millis(5));
        let pool = WorkerPool::new(scheduler, executor, config).unwrap();
        wait_until(Duration::from_secs(5), || !seen.lock().is_empty());
        pool.shutdown();

        assert_eq!(*seen.lock(), vec![(8, true)]);
    }

    #[test]
    fn test_worker_survives_panicking_job() {
        let scheduler = JobScheduler::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let record = seen.clone();
        let executor = Arc::new(move |job: &Job, _token: &CancellationToken| {
            if job.page == 0 {
                panic!("corrupt page");
            }
            record.lock().push(job.page);
        });

        scheduler.submit(JobPriority::Visible, 0, 1);
        scheduler.submit(JobPriority::Visible, 1, 1);

        let config = WorkerPoolConfig::new(1).with_poll_interval(Duration::from_millis(5));
        let pool = WorkerPool::new(scheduler.clone(), executor, config).unwrap();
        wait_until(Duration::from_secs(5), || !seen.lock().is_empty());
        pool.shutdown();

        assert_eq!(*seen.lock(), vec![1]);
        let stats = scheduler.stats();
        assert_eq!(stats.jobs_completed, 2);
        assert_eq!(stats.pending_jobs(), 0);
    }

    #[test]
    fn test_worker_pool_priority_ordering() {
        let scheduler = JobScheduler::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let record = order.clone();
        let executor = Arc::new(move |job: &Job, _token: &CancellationToken| {
            record.lock().push(job.page);
        });

        scheduler.submit(JobPriority::Prefetch, 3, 1);
        scheduler.submit(JobPriority::Visible, 1, 1);
        scheduler.submit(JobPriority::Visible, 2, 1);

        let config = WorkerPoolConfig::new(1).with_poll_interval(Duration::from_millis(5));
        let pool = WorkerPool::new(scheduler, executor, config).unwrap();
        wait_until(Duration::from_secs(5), || order.lock().len() == 3);
        pool.shutdown();

        assert_eq!(*order.lock(), vec![1, 2, 3]);
    }

    #[test]
    fn test_drop_stops_workers() {
        let scheduler = JobScheduler::new();
        let executor = Arc::new(|_job: &Job, _token: &CancellationToken| {});
        let config = WorkerPoolConfig::new(2).with_poll_interval(Duration::from_millis(5));
        let pool = WorkerPool::new(scheduler, executor, config).unwrap();
        assert!(!pool.is_shutting_down());
        drop(pool);
    }
}
