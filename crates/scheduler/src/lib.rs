//! PDF Viewer Scheduler Library
//!
//! Main-loop scheduling primitives for the viewer.
//!
//! - [`TaskQueue`]: single-threaded deferred executor with timers and a
//!   cross-thread [`Poster`] for worker results
//! - [`Debouncer`]: keeps only the latest request per control
//! - [`JobScheduler`] and [`WorkerPool`]: prioritized, cancellable render
//!   jobs executed off the main loop
//! - [`CancellationToken`] and [`Generations`]: cooperative cancellation and
//!   stale-result detection
//!
//! # Example
//!
//! ```
//! use pdf_viewer_scheduler::{JobPriority, JobScheduler};
//!
//! let scheduler = JobScheduler::new();
//! let (_job_id, token) = scheduler.submit(JobPriority::Visible, 4, 1);
//!
//! // Page 4 scrolled out of view before a worker got to it
//! let dropped = scheduler.cancel_page_jobs(4);
//! assert_eq!(dropped.len(), 1);
//! assert!(token.is_cancelled());
//! ```

mod cancel;
mod clock;
mod debounce;
mod error;
mod priority;
mod scheduler;
mod task_queue;
mod worker;

pub use cancel::{CancellationRegistry, CancellationToken, Generations};
pub use clock::{Clock, ManualClock, SystemClock};
pub use debounce::{DebounceToken, Debouncer};
pub use error::SchedulerError;
pub use priority::{Job, JobId, JobPriority};
pub use scheduler::{JobScheduler, SchedulerStats};
pub use task_queue::{
    LiveHandle, Liveness, Poster, TaskQueue, TaskQueueStats, TaskResult, TimerId,
};
pub use worker::{JobExecutor, WorkerPool, WorkerPoolConfig};
