/*
This benchmark measures how the iteration gate behaves as the launch group
grows: every worker thread waits for its turn ROUNDS times on one shared
gate while the releasing thread keeps advancing the iteration counter,
so we can compare the cost of a release/await cycle across group sizes.
*/

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

use load_queue::threading::{IterationGate, TaskControl, WorkerId};
use std::{
    hint::black_box,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
};

//Workers sharing one gate (one launch group)
const GROUP_SIZES: &[usize] = &[2, 4, 8, 16];

//Iterations each worker waits for
const ROUNDS: usize = 200;

fn bench_gate_contention(c: &mut Criterion) {
    let mut group = c.benchmark_group("iteration_gate_release");

    for &workers in GROUP_SIZES {
        group.bench_with_input(BenchmarkId::from_parameter(workers), &workers, |b, &workers| {
            b.iter(|| {
                let gate = Arc::new(IterationGate::new());
                let done = Arc::new(AtomicUsize::new(0));
                let mut handles = Vec::with_capacity(workers);

                for w in 0..workers {
                    let gate = Arc::clone(&gate);
                    let done = Arc::clone(&done);
                    handles.push(thread::spawn(move || {
                        let control = TaskControl::new(WorkerId(w as u32));
                        for _ in 0..ROUNDS {
                            if gate.await_turn(&control).is_err() {
                                break;
                            }
                            black_box(control.worker());
                        }
                        done.fetch_add(1, Ordering::Release);
                    }));
                }

                //keep releasing until every worker got all its rounds
                while done.load(Ordering::Acquire) < workers {
                    gate.release();
                    thread::yield_now();
                }

                for h in handles {
                    let _ = h.join();
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_gate_contention);
criterion_main!(benches);
