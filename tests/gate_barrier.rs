//! Barrier property of `IterationGate`: with one release per round and
//! randomised worker delays, every worker runs exactly once per release and
//! never runs ahead of the release counter.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    thread,
    time::Duration,
};

use crossbeam::channel::unbounded;
use load_queue::threading::{IterationGate, TaskControl, WorkerId};
use proptest::prelude::*;

fn run_rounds(delays_us: Vec<Vec<u64>>, rounds: usize) -> Vec<u32> {
    let workers = delays_us.len();
    let gate = Arc::new(IterationGate::new());
    let counts: Arc<Vec<AtomicU32>> = Arc::new((0..workers).map(|_| AtomicU32::new(0)).collect());
    let (done_tx, done_rx) = unbounded::<(usize, usize)>();

    let handles: Vec<_> = delays_us
        .into_iter()
        .enumerate()
        .map(|(w, delays)| {
            let gate = gate.clone();
            let counts = counts.clone();
            let done_tx = done_tx.clone();
            thread::spawn(move || {
                let control = TaskControl::new(WorkerId(w as u32));
                for delay in delays.into_iter().take(rounds) {
                    gate.await_turn(&control).unwrap();
                    thread::sleep(Duration::from_micros(delay));
                    counts[w].fetch_add(1, Ordering::SeqCst);
                    let _ = done_tx.send((w, gate.iteration()));
                }
            })
        })
        .collect();

    for round in 1..=rounds {
        gate.release();
        for _ in 0..workers {
            let (_, iteration) = done_rx.recv().unwrap();
            assert_eq!(iteration, round);
        }
    }
    for handle in handles {
        handle.join().unwrap();
    }
    counts.iter().map(|c| c.load(Ordering::SeqCst)).collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn every_worker_runs_once_per_release(
        (rounds, delays) in (1usize..5).prop_flat_map(|rounds| {
            (
                Just(rounds),
                prop::collection::vec(prop::collection::vec(0u64..2_000, rounds), 1..6),
            )
        })
    ) {
        let counts = run_rounds(delays, rounds);
        prop_assert!(counts.iter().all(|&c| c as usize == rounds));
    }
}

#[test]
fn test_aborted_gate_releases_parked_workers() {
    let gate = Arc::new(IterationGate::new());
    let parked: Vec<_> = (0..4)
        .map(|w| {
            let gate = gate.clone();
            thread::spawn(move || gate.await_turn(&TaskControl::new(WorkerId(w))).is_err())
        })
        .collect();
    thread::sleep(Duration::from_millis(50));
    gate.abort();
    for handle in parked {
        assert!(handle.join().unwrap());
    }
}
