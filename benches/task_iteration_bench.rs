/*
This benchmark measures the engine's own per-iteration overhead: argument
generation and binding, checkpoint emission, statistics and pacing around
an action that does nothing. Compared with and without data providers.
*/

use criterion::{BatchSize, Criterion, criterion_group, criterion_main};

use load_queue::{
    ActionError, LoaderError,
    action::{
        Action, ActionOutput, ActionRequest, ArgumentValue, InvocationContext,
        data::{DataProvider, ListDataProvider, RangeDataProvider, SharedProviders},
    },
    pattern::{ExecutionPattern, Pacing},
    telemetry::{ExecutionStatistics, NullSink},
    threading::{IterationGate, QueueContext, TaskFactory, TaskListener, WorkerId},
};
use std::{hint::black_box, sync::Arc};

const ITERATIONS: u32 = 1_000;

struct Noop;

impl Action for Noop {
    fn invoke(
        &mut self,
        _action: &str,
        args: &[ArgumentValue],
        _ctx: &InvocationContext<'_>,
    ) -> Result<ActionOutput, ActionError> {
        black_box(args);
        Ok(ActionOutput::default())
    }
}

struct Quiet;

impl TaskListener for Quiet {
    fn on_pause(&self, _: WorkerId) {}
    fn on_finish(&self, _: WorkerId, _: Option<LoaderError>) {}
}

fn factory(providers: Vec<Box<dyn DataProvider>>) -> TaskFactory {
    let queue = Arc::new(QueueContext {
        name: "bench".into(),
        requests: vec![
            ActionRequest::new("noop", "login").with_argument("user", "nobody"),
            ActionRequest::new("noop", "browse").with_argument("page", "0"),
        ],
        providers: SharedProviders::new(providers),
        sink: Arc::new(NullSink),
        statistics: Arc::new(ExecutionStatistics::new()),
    });
    let actions = |_: &str| -> Result<Box<dyn Action>, ActionError> { Ok(Box::new(Noop)) };
    TaskFactory::new(
        queue,
        ExecutionPattern::invocations(ITERATIONS, Pacing::default()),
        false,
        Arc::new(actions),
        None,
        Arc::new(Quiet),
    )
}

fn bench_task_iterations(c: &mut Criterion) {
    let mut group = c.benchmark_group("worker_task_execute");

    group.bench_function("no_providers", |b| {
        let tasks = factory(Vec::new());
        b.iter_batched(
            || tasks.create(WorkerId(0), Arc::new(IterationGate::new()), 0),
            |task| {
                if let Ok(mut task) = task {
                    black_box(task.execute());
                }
            },
            BatchSize::SmallInput,
        )
    });

    group.bench_function("with_providers", |b| {
        let tasks = factory(vec![
            Box::new(RangeDataProvider::new("user", 1, 10_000, Some("user{}".into()))),
            Box::new(ListDataProvider::new(
                "page",
                vec!["home".into(), "cart".into(), "checkout".into()],
            )),
        ]);
        b.iter_batched(
            || tasks.create(WorkerId(0), Arc::new(IterationGate::new()), 0),
            |task| {
                if let Ok(mut task) = task {
                    black_box(task.execute());
                }
            },
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

criterion_group!(benches, bench_task_iterations);
criterion_main!(benches);
