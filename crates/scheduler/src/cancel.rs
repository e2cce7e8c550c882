//! Cancellation tokens and generation counters
//!
//! Render requests and background operations carry a token that the worker
//! polls, and a generation number that the main loop compares at delivery
//! time. A result whose generation is no longer current is stale and dropped.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::JobId;

/// Cancellation token for cooperative cancellation
///
/// Workers periodically check `is_cancelled()` and stop early. Clones share
/// the same underlying flag.
///
/// # Example
///
/// ```
/// use pdf_viewer_scheduler::CancellationToken;
///
/// let token = CancellationToken::new();
/// let worker_token = token.clone();
///
/// token.cancel();
/// assert!(worker_token.is_cancelled());
/// ```
#[derive(Clone, Debug)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a new, non-cancelled token
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Cancel this token and every clone of it. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry mapping job ids to their cancellation tokens
///
/// Shared between the main loop (which cancels) and the workers (which look
/// up the token of the job they just pulled).
#[derive(Clone, Default)]
pub struct CancellationRegistry {
    tokens: Arc<Mutex<HashMap<JobId, CancellationToken>>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job and return its token
    pub fn register(&self, job_id: JobId) -> CancellationToken {
        let token = CancellationToken::new();
        self.tokens.lock().insert(job_id, token.clone());
        token
    }

    /// Register a job under a token created elsewhere
    pub fn insert(&self, job_id: JobId, token: CancellationToken) {
        self.tokens.lock().insert(job_id, token);
    }

    /// Cancel a job by id. Returns `true` if the job was registered.
    pub fn cancel(&self, job_id: JobId) -> bool {
        match self.tokens.lock().get(&job_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel several jobs, returning how many were found
    pub fn cancel_many(&self, job_ids: &[JobId]) -> usize {
        let tokens = self.tokens.lock();
        job_ids
            .iter()
            .filter_map(|id| tokens.get(id))
            .inspect(|token| token.cancel())
            .count()
    }

    /// Cancel every registered job
    pub fn cancel_all(&self) -> usize {
        let tokens = self.tokens.lock();
        for token in tokens.values() {
            token.cancel();
        }
        tokens.len()
    }

    /// Forget a job once it completed or left the queue
    pub fn unregister(&self, job_id: JobId) -> bool {
        self.tokens.lock().remove(&job_id).is_some()
    }

    pub fn get(&self, job_id: JobId) -> Option<CancellationToken> {
        self.tokens.lock().get(&job_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.tokens.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.lock().is_empty()
    }

    /// Remove all tokens without cancelling them
    pub fn clear(&self) {
        self.tokens.lock().clear();
    }
}

/// Monotonic generation counters, one per key
///
/// Keys are page indices for render requests or a mode discriminant for
/// background searches. Owned by the main loop.
#[derive(Debug)]
pub struct Generations<K> {
    current: HashMap<K, u64>,
}

impl<K: Eq + Hash + Clone> Generations<K> {
    pub fn new() -> Self {
        Self {
            current: HashMap::new(),
        }
    }

    /// Start a new generation for `key` and return it
    pub fn advance(&mut self, key: &K) -> u64 {
        let generation = self.current.entry(key.clone()).or_insert(0);
        *generation += 1;
        *generation
    }

    /// Current generation for `key` (0 if never advanced)
    pub fn current(&self, key: &K) -> u64 {
        self.current.get(key).copied().unwrap_or(0)
    }

    /// True if `generation` is still the latest one issued for `key`
    pub fn is_current(&self, key: &K, generation: u64) -> bool {
        generation != 0 && self.current(key) == generation
    }
}

impl<K: Eq + Hash + Clone> Default for Generations<K> {
    fn default() -> Self {
        Self::new()
    }
}
