//! Debounce controller
//!
//! Keeps at most one pending token per control. A new trigger cancels the
//! previous timer and replaces its payload, so a burst of input produces a
//! single invocation carrying the last payload.

use crate::task_queue::{TaskQueue, TaskResult, TimerId};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::hash::Hash;
use std::rc::Rc;
use std::time::Duration;
use tracing::trace;

type Operation<S, P> = dyn Fn(&mut S, &TaskQueue<S>, P) -> TaskResult;

/// Pending request for one control
#[derive(Debug)]
pub struct DebounceToken<P> {
    pub timer: TimerId,
    pub payload: P,
    serial: u64,
}

/// Wraps an operation so only the latest trigger per control survives
///
/// # Example
///
/// ```
/// use pdf_viewer_scheduler::{Debouncer, ManualClock, TaskQueue};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let clock = ManualClock::new();
/// let queue: TaskQueue<Vec<String>> = TaskQueue::new(Arc::new(clock.clone()));
/// let search = Debouncer::new(|runs: &mut Vec<String>, _queue: &TaskQueue<Vec<String>>, query: String| {
///     runs.push(query);
///     Ok(())
/// });
///
/// for query in ["f", "fo", "foo"] {
///     search.trigger(&queue, "search-entry", query.to_string(), Duration::from_millis(300));
/// }
///
/// let mut runs = Vec::new();
/// clock.advance(Duration::from_millis(300));
/// queue.run_turn(&mut runs);
/// assert_eq!(runs, ["foo"]);
/// ```
pub struct Debouncer<S, K, P> {
    tokens: Rc<RefCell<HashMap<K, DebounceToken<P>>>>,
    operation: Rc<Operation<S, P>>,
    next_serial: Cell<u64>,
}

impl<S, K, P> Debouncer<S, K, P>
where
    S: 'static,
    K: Eq + Hash + Clone + std::fmt::Debug + 'static,
    P: 'static,
{
    pub fn new<F>(operation: F) -> Self
    where
        F: Fn(&mut S, &TaskQueue<S>, P) -> TaskResult + 'static,
    {
        Self {
            tokens: Rc::new(RefCell::new(HashMap::new())),
            operation: Rc::new(operation),
            next_serial: Cell::new(1),
        }
    }

    /// Replace any pending request for `control` and arm a new timer
    pub fn trigger(&self, queue: &TaskQueue<S>, control: K, payload: P, delay: Duration) {
        if let Some(previous) = self.tokens.borrow_mut().remove(&control) {
            queue.cancel_timer(previous.timer);
            trace!(?control, "debounce superseded");
        }

        let serial = self.next_serial.get();
        self.next_serial.set(serial + 1);

        let tokens = Rc::clone(&self.tokens);
        let operation = Rc::clone(&self.operation);
        let key = control.clone();
        let timer = queue.schedule_after(delay, move |state, queue| {
            let payload = {
                let mut tokens = tokens.borrow_mut();
                match tokens.get(&key) {
                    Some(token) if token.serial == serial => {
                        tokens.remove(&key).map(|token| token.payload)
                    }
                    _ => None,
                }
            };
            match payload {
                Some(payload) => operation(state, queue, payload),
                None => Ok(()),
            }
        });

        self.tokens.borrow_mut().insert(
            control,
            DebounceToken {
                timer,
                payload,
                serial,
            },
        );
    }

    /// Drop the pending request for `control` without firing it
    pub fn cancel(&self, queue: &TaskQueue<S>, control: &K) -> bool {
        match self.tokens.borrow_mut().remove(control) {
            Some(token) => {
                queue.cancel_timer(token.timer);
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self, control: &K) -> bool {
        self.tokens.borrow().contains_key(control)
    }

    pub fn pending_payload(&self, control: &K) -> Option<P>
    where
        P: Clone,
    {
        self.tokens
            .borrow()
            .get(control)
            .map(|token| token.payload.clone())
    }
}
