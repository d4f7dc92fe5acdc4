//! Queue orchestration: lifecycle state machine, ramp-up launcher and the
//! per-caller queue registry.

pub mod handler;
pub mod listener;
pub mod ramp_up;
pub mod state;

pub use handler::{HandlerRegistry, QueueHandler};
pub use listener::{LoggingListener, QueueListener};
pub use ramp_up::{RampUpQueueLoader, RampUpQueueLoaderBuilder};
pub use state::QueueState;

use crate::error::LoaderError;

/// Lifecycle operations of one load queue.
pub trait QueueLoader: Send + Sync {
    fn name(&self) -> &str;

    fn state(&self) -> QueueState;

    /// Build and park the workers. Valid only from NOT_STARTED.
    fn schedule(&self, synchronized_iterations: bool) -> Result<(), LoaderError>;

    /// Release the launch groups. Valid only from SCHEDULED.
    fn start(&self) -> Result<(), LoaderError>;

    /// Release the next round. Valid only from PAUSED.
    fn resume(&self) -> Result<(), LoaderError>;

    /// Hard stop. A no-op on a FINISHED queue.
    fn cancel(&self);

    fn wait_until_finished(&self);

    /// `true` if the queue paused, `false` if it finished (or never ran).
    fn wait_until_paused(&self) -> bool;
}
