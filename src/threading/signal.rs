//! signal.rs
//! Cooperative interruption for worker threads.
//!
//! Rust threads cannot be interrupted from outside, so every worker carries a
//! `Signal`: a sticky flag plus a condvar. Interruptible sleeps wait on the
//! condvar and return early once the flag is raised; blocking actions poll it
//! through their `InvocationContext`.

use std::{
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use super::WorkerId;
use crate::error::ActionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("interrupted")]
pub struct Interrupted;

impl From<Interrupted> for ActionError {
    fn from(_: Interrupted) -> Self {
        ActionError::Interrupted
    }
}

#[derive(Debug, Default)]
pub struct Signal {
    flag: AtomicBool,
    lock: Mutex<()>,
    wake: Condvar,
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag and wake any sleeper.
    pub fn interrupt(&self) {
        let _guard = self.lock.lock();
        self.flag.store(true, Ordering::SeqCst);
        self.wake.notify_all();
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Clear the flag, returning whether it was set.
    pub fn take(&self) -> bool {
        self.flag.swap(false, Ordering::SeqCst)
    }

    /// Sleep for `duration` unless interrupted first. The flag stays raised
    /// after an interrupted sleep; callers decide whether to `take` it.
    /// A duration too large for an `Instant` sleeps until interrupted.
    pub fn sleep(&self, duration: Duration) -> Result<(), Interrupted> {
        let deadline = Instant::now().checked_add(duration);
        let mut guard = self.lock.lock();
        loop {
            if self.flag.load(Ordering::SeqCst) {
                return Err(Interrupted);
            }
            match deadline {
                Some(deadline) if Instant::now() >= deadline => return Ok(()),
                Some(deadline) => {
                    self.wake.wait_until(&mut guard, deadline);
                }
                None => self.wake.wait(&mut guard),
            }
        }
    }
}

/// Shared handle to one worker's control flags. The watchdog and the loader
/// hold clones; the worker thread reads them between blocking points.
#[derive(Debug)]
pub struct TaskControl {
    worker: WorkerId,
    signal: Signal,
    timed_out: AtomicBool,
    timed_out_secs: AtomicU64,
    timeouts: AtomicU64,
    cancelled: AtomicBool,
    externally_interrupted: AtomicBool,
    alive: AtomicBool,
}

impl TaskControl {
    pub fn new(worker: WorkerId) -> Self {
        Self {
            worker,
            signal: Signal::new(),
            timed_out: AtomicBool::new(false),
            timed_out_secs: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            cancelled: AtomicBool::new(false),
            externally_interrupted: AtomicBool::new(false),
            alive: AtomicBool::new(true),
        }
    }

    pub fn worker(&self) -> WorkerId {
        self.worker
    }

    pub fn signal(&self) -> &Signal {
        &self.signal
    }

    /// Watchdog path: flag the timeout first, then interrupt, so the worker
    /// can tell the two interrupt sources apart.
    pub fn time_out(&self, elapsed_secs: u64) {
        self.timed_out_secs.store(elapsed_secs, Ordering::SeqCst);
        self.timed_out.store(true, Ordering::SeqCst);
        self.timeouts.fetch_add(1, Ordering::SeqCst);
        self.signal.interrupt();
    }

    /// Iterations the watchdog has timed out over this worker's life.
    pub fn timeout_count(&self) -> u64 {
        self.timeouts.load(Ordering::SeqCst)
    }

    pub fn is_timed_out(&self) -> bool {
        self.timed_out.load(Ordering::SeqCst)
    }

    /// Clears the timeout flag, returning the elapsed seconds it was set with.
    pub fn take_timeout(&self) -> Option<u64> {
        self.timed_out
            .swap(false, Ordering::SeqCst)
            .then(|| self.timed_out_secs.load(Ordering::SeqCst))
    }

    /// Caller path: request a hard stop.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.signal.interrupt();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn mark_externally_interrupted(&self) {
        self.externally_interrupted.store(true, Ordering::SeqCst);
    }

    pub fn is_externally_interrupted(&self) -> bool {
        self.externally_interrupted.load(Ordering::SeqCst)
    }

    pub fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::SeqCst);
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}
