//! Single-threaded deferred task queue
//!
//! Event handlers never mutate structural state in place. They schedule a
//! task instead, and the task runs on the next call to
//! [`TaskQueue::run_turn`], after the handler has returned. Tasks run one at
//! a time, in the order they were scheduled, each exactly once.
//!
//! Worker threads cannot touch the queue directly. They hold a [`Poster`]
//! and send `Send` closures through a channel; the next turn drains the
//! channel onto the back of the queue.
//!
//! # Example
//!
//! ```
//! use pdf_viewer_scheduler::{SystemClock, TaskQueue};
//! use std::sync::Arc;
//!
//! let queue: TaskQueue<Vec<&'static str>> = TaskQueue::new(Arc::new(SystemClock));
//! let mut log = Vec::new();
//!
//! queue.schedule(|log, queue| {
//!     log.push("first");
//!     queue.schedule(|log, _| {
//!         log.push("next turn");
//!         Ok(())
//!     });
//!     Ok(())
//! });
//!
//! queue.run_turn(&mut log);
//! assert_eq!(log, ["first"]);
//! queue.run_turn(&mut log);
//! assert_eq!(log, ["first", "next turn"]);
//! ```

use crate::{Clock, SchedulerError};
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, trace};

/// Outcome of a deferred task. Errors are logged, never propagated.
pub type TaskResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

type LocalTask<S> = Box<dyn FnOnce(&mut S, &TaskQueue<S>) -> TaskResult>;
type RemoteTask<S> = Box<dyn FnOnce(&mut S, &TaskQueue<S>) -> TaskResult + Send>;

/// Handle to a pending timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

/// Counters describing what the queue has done so far
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskQueueStats {
    pub executed: u64,
    pub failed: u64,
    /// Tasks skipped because their owner went away
    pub dropped: u64,
    pub timers_fired: u64,
}

/// Liveness flag held by an object that deferred tasks may outlive
///
/// Dropping the `Liveness` (or calling [`revoke`](Liveness::revoke)) turns
/// every [`LiveHandle`] derived from it dead, and guarded tasks holding such
/// a handle become no-ops.
#[derive(Debug)]
pub struct Liveness {
    alive: Rc<Cell<bool>>,
}

impl Liveness {
    pub fn new() -> Self {
        Self {
            alive: Rc::new(Cell::new(true)),
        }
    }

    pub fn handle(&self) -> LiveHandle {
        LiveHandle {
            alive: Rc::clone(&self.alive),
        }
    }

    pub fn revoke(&self) {
        self.alive.set(false);
    }

    pub fn is_alive(&self) -> bool {
        self.alive.get()
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Liveness {
    fn drop(&mut self) {
        self.alive.set(false);
    }
}

#[derive(Debug, Clone)]
pub struct LiveHandle {
    alive: Rc<Cell<bool>>,
}

impl LiveHandle {
    pub fn is_alive(&self) -> bool {
        self.alive.get()
    }
}

struct Queued<S> {
    guard: Option<LiveHandle>,
    work: LocalTask<S>,
}

struct Timer<S> {
    id: TimerId,
    deadline: Instant,
    task: Queued<S>,
}

/// Cooperative FIFO executor for main-loop state `S`
pub struct TaskQueue<S> {
    clock: Arc<dyn Clock>,
    pending: RefCell<VecDeque<Queued<S>>>,
    timers: RefCell<Vec<Timer<S>>>,
    next_timer: Cell<u64>,
    sender: mpsc::Sender<RemoteTask<S>>,
    inbox: mpsc::Receiver<RemoteTask<S>>,
    stats: Cell<TaskQueueStats>,
}

impl<S: 'static> TaskQueue<S> {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let (sender, inbox) = mpsc::channel();
        Self {
            clock,
            pending: RefCell::new(VecDeque::new()),
            timers: RefCell::new(Vec::new()),
            next_timer: Cell::new(1),
            sender,
            inbox,
            stats: Cell::new(TaskQueueStats::default()),
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    /// Enqueue `work` for the next turn
    pub fn schedule<F>(&self, work: F)
    where
        F: FnOnce(&mut S, &TaskQueue<S>) -> TaskResult + 'static,
    {
        self.push(Queued {
            guard: None,
            work: Box::new(work),
        });
    }

    /// Enqueue `work`, skipping it if `owner` is dead by the time it runs
    pub fn schedule_guarded<F>(&self, owner: LiveHandle, work: F)
    where
        F: FnOnce(&mut S, &TaskQueue<S>) -> TaskResult + 'static,
    {
        self.push(Queued {
            guard: Some(owner),
            work: Box::new(work),
        });
    }

    /// Run `work` on the first turn at least `delay` from now
    pub fn schedule_after<F>(&self, delay: Duration, work: F) -> TimerId
    where
        F: FnOnce(&mut S, &TaskQueue<S>) -> TaskResult + 'static,
    {
        let id = TimerId(self.next_timer.get());
        self.next_timer.set(id.0 + 1);

        let deadline = self.clock.now() + delay;
        self.timers.borrow_mut().push(Timer {
            id,
            deadline,
            task: Queued {
                guard: None,
                work: Box::new(work),
            },
        });
        trace!(timer = id.0, delay_ms = delay.as_millis() as u64, "timer armed");
        id
    }

    /// Disarm a timer. Returns `false` if it already fired or was cancelled.
    pub fn cancel_timer(&self, id: TimerId) -> bool {
        let mut timers = self.timers.borrow_mut();
        let before = timers.len();
        timers.retain(|timer| timer.id != id);
        before != timers.len()
    }

    pub fn timer_pending(&self, id: TimerId) -> bool {
        self.timers.borrow().iter().any(|timer| timer.id == id)
    }

    /// Earliest armed deadline, for an outer loop that wants to sleep
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.borrow().iter().map(|timer| timer.deadline).min()
    }

    /// Handle for other threads to send work to this queue
    pub fn poster(&self) -> Poster<S> {
        Poster {
            sender: self.sender.clone(),
        }
    }

    /// Number of tasks ready for the next turn
    pub fn pending_len(&self) -> usize {
        self.pending.borrow().len()
    }

    /// True when nothing is queued and no timer is armed
    pub fn is_idle(&self) -> bool {
        self.drain_inbox();
        self.pending.borrow().is_empty() && self.timers.borrow().is_empty()
    }

    pub fn stats(&self) -> TaskQueueStats {
        self.stats.get()
    }

    /// Run one scheduler turn
    ///
    /// Due timers and posted results are appended first, then every task that
    /// is pending at that point runs. Tasks scheduled while the turn is in
    /// progress wait for the next turn. Returns the number of tasks run.
    pub fn run_turn(&self, state: &mut S) -> usize {
        self.promote_due_timers();
        self.drain_inbox();

        let batch = std::mem::take(&mut *self.pending.borrow_mut());
        let mut ran = 0;
        for task in batch {
            if self.execute(state, task) {
                ran += 1;
            }
        }
        ran
    }

    /// Run turns until no task is ready, at most `max_turns` times
    ///
    /// Armed timers that are not yet due do not keep this running.
    pub fn run_until_idle(&self, state: &mut S, max_turns: usize) -> usize {
        let mut ran = 0;
        for _ in 0..max_turns {
            self.promote_due_timers();
            self.drain_inbox();
            if self.pending.borrow().is_empty() {
                break;
            }
            ran += self.run_turn(state);
        }
        ran
    }

    /// Block until a worker posts something or `timeout` elapses
    pub fn wait_for_posted(&self, timeout: Duration) -> bool {
        match self.inbox.recv_timeout(timeout) {
            Ok(task) => {
                self.push_remote(task);
                true
            }
            Err(_) => false,
        }
    }

    fn push(&self, task: Queued<S>) {
        self.pending.borrow_mut().push_back(task);
    }

    fn push_remote(&self, task: RemoteTask<S>) {
        self.push(Queued {
            guard: None,
            work: task,
        });
    }

    fn drain_inbox(&self) {
        while let Ok(task) = self.inbox.try_recv() {
            self.push_remote(task);
        }
    }

    fn promote_due_timers(&self) {
        let now = self.clock.now();
        let mut due = {
            let mut timers = self.timers.borrow_mut();
            let (due, waiting): (Vec<_>, Vec<_>) =
                timers.drain(..).partition(|timer| timer.deadline <= now);
            *timers = waiting;
            due
        };
        if due.is_empty() {
            return;
        }

        due.sort_by_key(|timer| (timer.deadline, timer.id));
        let fired = due.len() as u64;
        for timer in due {
            trace!(timer = timer.id.0, "timer fired");
            self.push(timer.task);
        }
        self.bump(|stats| stats.timers_fired += fired);
    }

    fn execute(&self, state: &mut S, task: Queued<S>) -> bool {
        if let Some(guard) = &task.guard {
            if !guard.is_alive() {
                debug!("deferred task dropped, owner is gone");
                self.bump(|stats| stats.dropped += 1);
                return false;
            }
        }

        let work = task.work;
        match panic::catch_unwind(AssertUnwindSafe(|| work(state, self))) {
            Ok(Ok(())) => self.bump(|stats| stats.executed += 1),
            Ok(Err(err)) => {
                error!(error = %err, "deferred task failed");
                self.bump(|stats| stats.failed += 1);
            }
            Err(payload) => {
                error!(panic = panic_message(&*payload), "deferred task panicked");
                self.bump(|stats| stats.failed += 1);
            }
        }
        true
    }

    fn bump(&self, update: impl FnOnce(&mut TaskQueueStats)) {
        let mut stats = self.stats.get();
        update(&mut stats);
        self.stats.set(stats);
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

/// Cross-thread sender into a [`TaskQueue`]
pub struct Poster<S> {
    sender: mpsc::Sender<RemoteTask<S>>,
}

impl<S> Clone for Poster<S> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<S: 'static> Poster<S> {
    /// Send `work` to run on the main loop
    ///
    /// Fails once the queue has been dropped.
    pub fn post<F>(&self, work: F) -> Result<(), SchedulerError>
    where
        F: FnOnce(&mut S, &TaskQueue<S>) -> TaskResult + Send + 'static,
    {
        self.sender
            .send(Box::new(work))
            .map_err(|_| SchedulerError::QueueClosed)
    }
}
