//! Worker-side concurrency: the iteration gate, the timeout watchdog, the
//! worker task and the factory that builds it.

pub mod factory;
pub mod gate;
pub mod signal;
pub mod task;
pub mod watchdog;

use std::fmt;

use crate::error::LoaderError;

pub use factory::TaskFactory;
pub use gate::IterationGate;
pub use signal::{Signal, TaskControl};
pub use task::{QueueContext, TerminationPolicy, WorkerTask};
pub use watchdog::TimeoutWatchdog;

/// Opaque worker handle, issued when the task is created and unique within
/// its queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub u32);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "w{}", self.0)
    }
}

/// Result of one `WorkerTask::execute` round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Finished,
    Paused,
    Cancelled,
}

/// Per-worker lifecycle notifications, consumed by the loader's aggregation.
/// Called on the worker thread; implementations must not block.
pub trait TaskListener: Send + Sync {
    fn on_pause(&self, worker: WorkerId);

    /// Terminal: the worker finished, was cancelled, or panicked.
    fn on_finish(&self, worker: WorkerId, error: Option<LoaderError>);
}
