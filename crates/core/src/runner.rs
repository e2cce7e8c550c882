//! Background operation runner
//!
//! Long-running operations (content search, highlight export) run on their
//! own named thread. The result comes back through the task queue's
//! [`Poster`] and is delivered exactly once, on the main loop, unless the
//! launch's key has been invalidated in the meantime; a superseded result is
//! dropped before it reaches the caller.

use pdf_viewer_scheduler::{CancellationToken, Generations, Poster, TaskQueue};
use std::collections::HashMap;
use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use thiserror::Error;
use tracing::{debug, error, trace};

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("background operation panicked")]
    Panicked,

    #[error("failed to start background thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Main-loop state that owns a runner
pub trait RunnerHost<K> {
    fn runner(&mut self) -> &mut BackgroundRunner<K>;
}

/// Epoch bookkeeping for background launches, one epoch per key
#[derive(Debug)]
pub struct BackgroundRunner<K> {
    epochs: Generations<K>,
    tokens: HashMap<K, CancellationToken>,
}

impl<K> Default for BackgroundRunner<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> BackgroundRunner<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            epochs: Generations::new(),
            tokens: HashMap::new(),
        }
    }

    pub fn epoch(&self, key: &K) -> u64 {
        self.epochs.current(key)
    }

    pub fn is_running(&self, key: &K) -> bool {
        self.tokens.contains_key(key)
    }

    /// Start a new epoch for `key`, cancelling the running launch
    pub fn invalidate(&mut self, key: &K) -> u64 {
        if let Some(token) = self.tokens.remove(key) {
            token.cancel();
        }
        self.epochs.advance(key)
    }

    /// True if a result tagged with `epoch` may still be delivered
    ///
    /// Clears the running marker when it is.
    pub fn finish(&mut self, key: &K, epoch: u64) -> bool {
        if self.epochs.is_current(key, epoch) {
            self.tokens.remove(key);
            true
        } else {
            false
        }
    }

    /// Run `work` off the main loop and hand its result to `deliver`
    ///
    /// A previous launch for the same key is cancelled and its result will
    /// be discarded. `deliver` runs on the main loop at most once; it never
    /// runs if the key was invalidated first.
    pub fn launch<S, T, W, D>(&mut self, poster: &Poster<S>, key: K, name: &str, work: W, deliver: D)
    where
        S: RunnerHost<K> + 'static,
        K: std::fmt::Debug + Send + 'static,
        T: Send + 'static,
        W: FnOnce(&CancellationToken) -> T + Send + 'static,
        D: FnOnce(&mut S, &TaskQueue<S>, Result<T, RunnerError>) + Send + 'static,
    {
        let epoch = self.invalidate(&key);
        let token = CancellationToken::new();
        self.tokens.insert(key.clone(), token.clone());
        trace!(?key, epoch, "background operation launched");

        let (deliver_tx, deliver_rx) = std::sync::mpsc::channel::<D>();
        let thread_poster = poster.clone();
        let thread_key = key.clone();
        let spawned = thread::Builder::new()
            .name(format!("pdf-viewer-{name}"))
            .spawn(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| work(&token)))
                    .map_err(|_| RunnerError::Panicked);
                let Ok(deliver) = deliver_rx.recv() else {
                    return;
                };
                post_result(&thread_poster, thread_key, epoch, outcome, deliver);
            });

        match spawned {
            Ok(_) => {
                let _ = deliver_tx.send(deliver);
            }
            Err(err) => {
                error!(?key, error = %err, "could not start background operation");
                post_result(poster, key, epoch, Err(RunnerError::Spawn(err)), deliver);
            }
        }
    }
}

fn post_result<S, K, T, D>(
    poster: &Poster<S>,
    key: K,
    epoch: u64,
    outcome: Result<T, RunnerError>,
    deliver: D,
) where
    S: RunnerHost<K> + 'static,
    K: Eq + Hash + Clone + std::fmt::Debug + Send + 'static,
    T: Send + 'static,
    D: FnOnce(&mut S, &TaskQueue<S>, Result<T, RunnerError>) + Send + 'static,
{
    let posted = poster.post(move |state: &mut S, queue: &TaskQueue<S>| {
        if state.runner().finish(&key, epoch) {
            deliver(state, queue, outcome);
        } else {
            debug!(?key, epoch, "superseded background result discarded");
        }
        Ok(())
    });
    if posted.is_err() {
        debug!("main loop gone, background result dropped");
    }
}
