use thiserror::Error;

/// Errors raised by the scheduler crate.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("task queue is gone")]
    QueueClosed,
}
