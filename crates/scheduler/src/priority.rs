//! Priority ordering for render jobs
//!
//! Visible pages render before prefetched neighbours. Within one priority
//! level jobs come out in submission order.

use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

/// Render job priority. Higher values are dequeued first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum JobPriority {
    /// Neighbouring pages rendered ahead of scrolling
    Prefetch = 0,

    /// Pages intersecting the viewport
    Visible = 1,
}

/// Unique job identifier
pub type JobId = u64;

/// A queued request to render one page at one generation
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub priority: JobPriority,
    /// Tag of the submitter, such as the document the page belongs to
    pub owner: u64,
    /// Zero-based page index
    pub page: usize,
    /// Generation of the render request this job serves
    pub generation: u64,

    insertion_order: u64,
}

impl Job {
    pub fn new(
        id: JobId,
        priority: JobPriority,
        owner: u64,
        page: usize,
        generation: u64,
        insertion_order: u64,
    ) -> Self {
        Self {
            id,
            priority,
            owner,
            page,
            generation,
            insertion_order,
        }
    }
}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Job {}

impl PartialOrd for Job {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Job {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.priority.cmp(&other.priority) {
            // BinaryHeap is a max heap, so earlier insertions must compare greater
            Ordering::Equal => other.insertion_order.cmp(&self.insertion_order),
            other => other,
        }
    }
}

/// Thread-safe priority queue of render jobs
#[derive(Clone)]
pub struct PriorityQueue {
    state: Arc<Mutex<QueueState>>,
}

struct QueueState {
    heap: BinaryHeap<Job>,
    next_job_id: JobId,
    insertion_counter: u64,
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState {
                heap: BinaryHeap::new(),
                next_job_id: 1,
                insertion_counter: 0,
            })),
        }
    }

    /// Push a job and return the id assigned to it
    pub fn push(&self, priority: JobPriority, owner: u64, page: usize, generation: u64) -> JobId {
        let mut state = self.state.lock();
        let job_id = state.next_job_id;
        state.next_job_id += 1;

        let insertion_order = state.insertion_counter;
        state.insertion_counter += 1;

        state
            .heap
            .push(Job::new(job_id, priority, owner, page, generation, insertion_order));
        job_id
    }

    /// Pop the highest priority job
    pub fn pop(&self) -> Option<Job> {
        self.state.lock().heap.pop()
    }

    pub fn len(&self) -> usize {
        self.state.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().heap.is_empty()
    }

    pub fn clear(&self) {
        self.state.lock().heap.clear();
    }

    /// Remove every job matching `predicate`, returning how many were removed
    pub fn remove_if<F>(&self, predicate: F) -> usize
    where
        F: Fn(&Job) -> bool,
    {
        let mut state = self.state.lock();
        let before = state.heap.len();
        state.heap.retain(|job| !predicate(job));
        before - state.heap.len()
    }

    /// Snapshot of queued jobs in arbitrary order
    pub fn jobs(&self) -> Vec<Job> {
        self.state.lock().heap.iter().cloned().collect()
    }
}

impl Default for PriorityQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_visible_before_prefetch() {
        let queue = PriorityQueue::new();
        queue.push(JobPriority::Prefetch, 0, 9, 1);
        queue.push(JobPriority::Visible, 0, 2, 1);

        assert_eq!(queue.pop().map(|job| job.page), Some(2));
        assert_eq!(queue.pop().map(|job| job.page), Some(9));
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_fifo_within_priority() {
        let queue = PriorityQueue::new();
        for page in [4, 1, 7] {
            queue.push(JobPriority::Visible, 0, page, 1);
        }

        let order: Vec<usize> = std::iter::from_fn(|| queue.pop()).map(|job| job.page).collect();
        assert_eq!(order, vec![4, 1, 7]);
    }

    #[test]
    fn test_job_ids_are_unique() {
        let queue = PriorityQueue::new();
        let a = queue.push(JobPriority::Visible, 0, 0, 1);
        let b = queue.push(JobPriority::Visible, 0, 0, 2);
        assert_ne!(a, b);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_remove_if_by_page() {
        let queue = PriorityQueue::new();
        queue.push(JobPriority::Visible, 0, 1, 1);
        queue.push(JobPriority::Prefetch, 0, 1, 1);
        queue.push(JobPriority::Visible, 0, 2, 1);

        assert_eq!(queue.remove_if(|job| job.page == 1), 2);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop().map(|job| job.page), Some(2));
    }

    #[test]
    fn test_clear() {
        let queue = PriorityQueue::default();
        queue.push(JobPriority::Visible, 0, 1, 1);
        queue.clear();
        assert!(queue.is_empty());
    }
}
