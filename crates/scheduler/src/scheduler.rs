//! Render job scheduler
//!
//! Owns the priority queue and the cancellation registry. The main loop
//! submits and cancels; worker threads pull jobs and complete them.

use crate::cancel::{CancellationRegistry, CancellationToken};
use crate::priority::{Job, JobId, JobPriority, PriorityQueue};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::trace;

/// Job scheduler statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub jobs_submitted: u64,
    pub jobs_completed: u64,
    /// Jobs removed from the queue before a worker picked them up
    pub jobs_cancelled: u64,
    pub queue_size: usize,
}

impl SchedulerStats {
    /// Jobs submitted but neither completed nor cancelled yet
    pub fn pending_jobs(&self) -> u64 {
        self.jobs_submitted - self.jobs_completed - self.jobs_cancelled
    }
}

/// Thread-safe render job scheduler
///
/// # Example
///
/// ```
/// use pdf_viewer_scheduler::{JobPriority, JobScheduler};
///
/// let scheduler = JobScheduler::new();
/// let (job_id, token) = scheduler.submit(JobPriority::Visible, 0, 1);
///
/// if let Some(job) = scheduler.next_job() {
///     assert_eq!(job.id, job_id);
///     assert!(!token.is_cancelled());
///     scheduler.complete_job(job.id);
/// }
/// ```
#[derive(Clone)]
pub struct JobScheduler {
    queue: PriorityQueue,
    stats: Arc<Mutex<SchedulerStats>>,
    cancellation: CancellationRegistry,
}

impl JobScheduler {
    pub fn new() -> Self {
        Self {
            queue: PriorityQueue::new(),
            stats: Arc::new(Mutex::new(SchedulerStats::default())),
            cancellation: CancellationRegistry::new(),
        }
    }

    /// Submit a render job with a fresh cancellation token
    pub fn submit(
        &self,
        priority: JobPriority,
        page: usize,
        generation: u64,
    ) -> (JobId, CancellationToken) {
        let token = CancellationToken::new();
        let job_id = self.submit_with_token(priority, 0, page, generation, token.clone());
        (job_id, token)
    }

    /// Submit a render job bound to a token the caller already holds
    ///
    /// Cancelling that token from outside cancels the job as well. `owner`
    /// comes back on the popped [`Job`] unchanged.
    pub fn submit_with_token(
        &self,
        priority: JobPriority,
        owner: u64,
        page: usize,
        generation: u64,
        token: CancellationToken,
    ) -> JobId {
        let job_id = self.queue.push(priority, owner, page, generation);
        self.cancellation.insert(job_id, token);
        self.stats.lock().jobs_submitted += 1;
        trace!(job_id, owner, page, generation, ?priority, "render job submitted");
        job_id
    }

    /// Pop the highest priority job
    ///
    /// Its token stays registered until `complete_job`.
    pub fn next_job(&self) -> Option<Job> {
        self.queue.pop()
    }

    pub fn complete_job(&self, job_id: JobId) {
        self.stats.lock().jobs_completed += 1;
        self.cancellation.unregister(job_id);
    }

    /// Cancel one job
    ///
    /// A queued job is removed; a running job only has its token cancelled.
    /// Returns `true` if the job was known.
    pub fn cancel_job(&self, job_id: JobId) -> bool {
        let token_cancelled = self.cancellation.cancel(job_id);
        let removed = self.queue.remove_if(|job| job.id == job_id);

        if removed > 0 {
            self.stats.lock().jobs_cancelled += removed as u64;
            self.cancellation.unregister(job_id);
            true
        } else {
            token_cancelled
        }
    }

    /// Cancel every queued job matching `predicate`
    ///
    /// Returns the jobs that were removed from the queue. Jobs already
    /// running are not affected; cancel their tokens directly.
    pub fn cancel_jobs_if<F>(&self, predicate: F) -> Vec<Job>
    where
        F: Fn(&Job) -> bool,
    {
        let matching: Vec<Job> = self
            .queue
            .jobs()
            .into_iter()
            .filter(|job| predicate(job))
            .collect();
        if matching.is_empty() {
            return matching;
        }

        let ids: Vec<JobId> = matching.iter().map(|job| job.id).collect();
        self.cancellation.cancel_many(&ids);
        let removed = self.queue.remove_if(|job| ids.contains(&job.id));
        self.stats.lock().jobs_cancelled += removed as u64;
        for id in &ids {
            self.cancellation.unregister(*id);
        }
        matching
    }

    /// Drop queued jobs for a page that scrolled out of view
    pub fn cancel_page_jobs(&self, page: usize) -> Vec<Job> {
        self.cancel_jobs_if(|job| job.page == page)
    }

    pub fn pending_jobs(&self) -> usize {
        self.queue.len()
    }

    pub fn has_pending_jobs(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Cancel everything, queued or running (document close)
    pub fn clear(&self) {
        let queued = self.queue.len();
        self.cancellation.cancel_all();
        self.queue.clear();
        self.cancellation.clear();
        if queued > 0 {
            self.stats.lock().jobs_cancelled += queued as u64;
        }
    }

    pub fn stats(&self) -> SchedulerStats {
        let mut stats = self.stats.lock().clone();
        stats.queue_size = self.queue.len();
        stats
    }

    /// Token of a queued or running job
    pub fn get_cancellation_token(&self, job_id: JobId) -> Option<CancellationToken> {
        self.cancellation.get(job_id)
    }
}

impl Default for JobScheduler {
    fn default() -> Self {
        Self::new()
    }
}
