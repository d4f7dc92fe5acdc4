//! watchdog.rs
//! Per-queue iteration timeout monitor.
//!
//! Workers report the start and end of every iteration. A background thread
//! wakes in short slices, finds iterations that have been running longer than
//! the timeout, flags them as timed out and interrupts them. Only workers with
//! a recorded start time are candidates, so a worker sleeping between
//! iterations is never touched.

use std::{
    collections::HashMap,
    sync::Arc,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use log::{debug, info};
use parking_lot::Mutex;

use super::{TaskControl, WorkerId};
use crate::error::LoaderError;

pub const DEFAULT_POLL_SLICE: Duration = Duration::from_millis(1000);

#[derive(Debug)]
struct Entry {
    control: Arc<TaskControl>,
    started: Option<Instant>,
}

#[derive(Debug, Default)]
struct WatchState {
    entries: HashMap<WorkerId, Entry>,
    // earliest start time among entries that are mid-iteration
    next_check: Option<Instant>,
    queue_over: bool,
}

impl WatchState {
    fn recompute_next_check(&mut self) {
        self.next_check = self.entries.values().filter_map(|e| e.started).min();
    }
}

pub struct TimeoutWatchdog {
    queue: String,
    timeout: Duration,
    poll_slice: Duration,
    state: Mutex<WatchState>,
    stop_tx: Sender<()>,
    stop_rx: Receiver<()>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TimeoutWatchdog {
    pub fn new(queue: &str, timeout: Duration, poll_slice: Duration) -> Arc<Self> {
        let (stop_tx, stop_rx) = channel::bounded(1);
        Arc::new(Self {
            queue: queue.to_string(),
            timeout,
            poll_slice: poll_slice.max(Duration::from_millis(1)),
            state: Mutex::new(WatchState::default()),
            stop_tx,
            stop_rx,
            handle: Mutex::new(None),
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Register a worker before it runs, so the watchdog does not consider
    /// the queue over while workers are still parked at the gate.
    pub fn track(&self, control: Arc<TaskControl>) {
        let mut state = self.state.lock();
        state.entries.entry(control.worker()).or_insert(Entry {
            control,
            started: None,
        });
    }

    pub fn on_iteration_start(&self, control: &Arc<TaskControl>, started: Instant) {
        let mut state = self.state.lock();
        if state.next_check.is_none_or(|next| started < next) {
            state.next_check = Some(started);
        }
        state
            .entries
            .entry(control.worker())
            .or_insert_with(|| Entry {
                control: control.clone(),
                started: None,
            })
            .started = Some(started);
    }

    pub fn on_iteration_end(&self, worker: WorkerId) {
        let mut state = self.state.lock();
        let cleared = match state.entries.get_mut(&worker) {
            Some(entry) => entry.started.take(),
            None => return,
        };
        if cleared.is_some() && cleared == state.next_check {
            state.recompute_next_check();
        }
    }

    pub fn on_worker_shutdown(&self, worker: WorkerId) {
        let mut state = self.state.lock();
        if state.entries.remove(&worker).is_some() {
            state.recompute_next_check();
            state.queue_over = state.entries.is_empty();
        }
    }

    pub fn is_queue_over(&self) -> bool {
        self.state.lock().queue_over
    }

    pub fn next_check(&self) -> Option<Instant> {
        self.state.lock().next_check
    }

    pub fn tracked_workers(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Spawn the monitor thread. A second call is a no-op.
    pub fn start(self: &Arc<Self>) -> Result<(), LoaderError> {
        let mut handle = self.handle.lock();
        if handle.is_some() {
            return Ok(());
        }
        let name = format!("{}-watchdog", self.queue);
        let watchdog = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(name.clone())
            .spawn(move || watchdog.run())
            .map_err(|source| LoaderError::Spawn { name, source })?;
        *handle = Some(spawned);
        info!(
            "Iteration timeout watchdog for queue '{}' started with a {} seconds timeout",
            self.queue,
            self.timeout.as_secs()
        );
        Ok(())
    }

    /// Ask the monitor thread to exit and wait for it.
    pub fn stop(&self) {
        let _ = self.stop_tx.try_send(());
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }

    fn run(&self) {
        loop {
            let wait = {
                let state = self.state.lock();
                if state.queue_over {
                    break;
                }
                match state.next_check {
                    Some(started) => started
                        .checked_add(self.timeout)
                        .map_or(self.poll_slice, |due| {
                            due.saturating_duration_since(Instant::now())
                                .min(self.poll_slice)
                        }),
                    None => self.poll_slice,
                }
            };
            if !wait.is_zero() {
                match self.stop_rx.recv_timeout(wait) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {}
                }
            }
            self.scan(Instant::now());
        }
        debug!("Iteration timeout watchdog for queue '{}' exiting", self.queue);
    }

    /// One pass over the tracked workers. Returns how many were timed out.
    fn scan(&self, now: Instant) -> usize {
        let timeout = self.timeout;
        let mut timed_out = 0;
        let mut next_check: Option<Instant> = None;

        let mut state = self.state.lock();
        state.entries.retain(|worker, entry| {
            let control = &entry.control;
            if !control.is_alive() || control.is_externally_interrupted() {
                debug!("No longer watching worker {worker}");
                return false;
            }
            // flag is cleared by the worker before its next iteration
            if control.is_timed_out() {
                return true;
            }
            if let Some(started) = entry.started {
                let elapsed = now.saturating_duration_since(started);
                if elapsed >= timeout {
                    entry.started = None;
                    control.time_out(elapsed.as_secs());
                    timed_out += 1;
                } else if next_check.is_none_or(|next| started < next) {
                    next_check = Some(started);
                }
            }
            true
        });
        state.next_check = next_check;
        if state.entries.is_empty() {
            state.queue_over = true;
        }
        timed_out
    }
}
