//! gate.rs
//! Repeating start barrier shared by one launch group.
//!
//! The launcher calls `release()` once per iteration; each worker calls
//! `await_turn()` before it starts one. A worker that loops back before the
//! next release is parked on the look-ahead slot instead of running twice in
//! the same iteration.

use std::collections::HashSet;

use parking_lot::{Condvar, Mutex};

use super::{TaskControl, WorkerId, signal::Interrupted};

#[derive(Debug, Default)]
struct Slot {
    running: bool,
    processed: HashSet<WorkerId>,
}

#[derive(Debug)]
struct GateState {
    // None until the first release
    counter: Option<usize>,
    slots: Vec<Slot>,
    aborted: bool,
}

#[derive(Debug)]
pub struct IterationGate {
    state: Mutex<GateState>,
    released: Condvar,
}

impl Default for IterationGate {
    fn default() -> Self {
        Self::new()
    }
}

impl IterationGate {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GateState {
                counter: None,
                slots: vec![Slot::default()],
                aborted: false,
            }),
            released: Condvar::new(),
        }
    }

    /// Start the next iteration for every worker of the group.
    pub fn release(&self) {
        let mut state = self.state.lock();
        let current = state.counter.map_or(0, |c| c + 1);

        // one slot ahead of the current iteration, for fast workers
        while state.slots.len() < current + 2 {
            state.slots.push(Slot::default());
        }
        state.counter = Some(current);
        if current > 0 {
            // free the finished iteration, not just empty it
            state.slots[current - 1].processed = HashSet::new();
        }
        state.slots[current].running = true;
        self.released.notify_all();
    }

    /// Block until this worker may run its next iteration. Returns
    /// `Err(Interrupted)` if the gate is aborted or the worker is cancelled.
    pub fn await_turn(&self, control: &TaskControl) -> Result<(), Interrupted> {
        let worker = control.worker();
        let mut state = self.state.lock();

        let current = state.counter.unwrap_or(0);
        let slot = if state.slots[current].processed.insert(worker) {
            current
        } else {
            // already ran in this iteration, queue up for the next one
            let next = current + 1;
            if state.slots.len() <= next {
                state.slots.push(Slot::default());
            }
            state.slots[next].processed.insert(worker);
            next
        };

        loop {
            if state.aborted || control.is_cancelled() {
                return Err(Interrupted);
            }
            if state.slots[slot].running {
                return Ok(());
            }
            self.released.wait(&mut state);
        }
    }

    /// Wake every parked worker with `Err(Interrupted)`; later calls to
    /// `await_turn` fail immediately.
    pub fn abort(&self) {
        let mut state = self.state.lock();
        state.aborted = true;
        self.released.notify_all();
    }

    /// Number of releases issued so far.
    pub fn iteration(&self) -> usize {
        self.state.lock().counter.map_or(0, |c| c + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
        thread,
        time::Duration,
    };

    #[test]
    fn test_slow_worker_passes_without_blocking() {
        let gate = IterationGate::new();
        let control = TaskControl::new(WorkerId(0));
        gate.release();
        assert!(gate.await_turn(&control).is_ok());
        assert_eq!(gate.iteration(), 1);
    }

    #[test]
    fn test_fast_worker_waits_for_next_release() {
        let gate = Arc::new(IterationGate::new());
        let control = Arc::new(TaskControl::new(WorkerId(0)));
        let runs = Arc::new(AtomicUsize::new(0));

        gate.release();
        gate.await_turn(&control).unwrap();
        runs.fetch_add(1, Ordering::SeqCst);

        let worker = {
            let (gate, control, runs) = (gate.clone(), control.clone(), runs.clone());
            thread::spawn(move || {
                gate.await_turn(&control).unwrap();
                runs.fetch_add(1, Ordering::SeqCst);
            })
        };
        thread::sleep(Duration::from_millis(100));
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        gate.release();
        worker.join().unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_abort_wakes_parked_worker() {
        let gate = Arc::new(IterationGate::new());
        let control = Arc::new(TaskControl::new(WorkerId(5)));
        let worker = {
            let (gate, control) = (gate.clone(), control.clone());
            thread::spawn(move || gate.await_turn(&control))
        };
        thread::sleep(Duration::from_millis(50));
        gate.abort();
        assert_eq!(worker.join().unwrap(), Err(Interrupted));
    }

    #[test]
    fn test_cancelled_worker_is_refused() {
        let gate = IterationGate::new();
        let control = TaskControl::new(WorkerId(2));
        gate.release();
        control.cancel();
        assert_eq!(gate.await_turn(&control), Err(Interrupted));
    }

    #[test]
    fn test_release_frees_previous_iteration() {
        let gate = IterationGate::new();
        gate.release();
        for id in 0..1000 {
            gate.await_turn(&TaskControl::new(WorkerId(id))).unwrap();
        }
        assert_eq!(gate.state.lock().slots[0].processed.len(), 1000);

        gate.release();
        let state = gate.state.lock();
        assert!(state.slots[0].processed.is_empty());
        assert_eq!(state.slots[0].processed.capacity(), 0);
    }
}
