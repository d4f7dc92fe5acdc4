//! End-to-end lifecycle of a ramp-up queue: grouping, pausing, cancelling,
//! timeouts and the per-caller handler.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::{Duration, Instant},
};

use load_queue::{
    ActionError, LoaderError, QueueHandler, QueueListener, QueueLoader, QueueState,
    RampUpQueueLoader, ThreadingPattern,
    action::{
        Action, ActionFactory, ActionOutput, ActionRequest, ArgumentValue, InvocationContext,
        simulated::{COMPONENT, SimulatedConfig, simulated_factory},
    },
    config::EngineConfig,
    telemetry::NullSink,
};
use parking_lot::Mutex;

#[derive(Default)]
struct Recorder {
    starts: AtomicU32,
    pauses: AtomicU32,
    finishes: AtomicU32,
    errors: Mutex<Vec<String>>,
}

impl QueueListener for Recorder {
    fn on_start(&self, _queue: &str) {
        self.starts.fetch_add(1, Ordering::SeqCst);
    }

    fn on_pause(&self, _queue: &str) {
        self.pauses.fetch_add(1, Ordering::SeqCst);
    }

    fn on_finish(&self, _queue: &str, error: Option<&LoaderError>) {
        self.finishes.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = error {
            self.errors.lock().push(e.to_string());
        }
    }
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn fast() -> Arc<dyn ActionFactory> {
    Arc::new(simulated_factory(SimulatedConfig {
        min_latency_ms: 1,
        max_latency_ms: 2,
        failure_percent: 0,
    }))
}

fn queue(
    name: &str,
    pattern: ThreadingPattern,
    actions: Arc<dyn ActionFactory>,
    action: &str,
    recorder: &Arc<Recorder>,
) -> RampUpQueueLoader {
    RampUpQueueLoader::builder(name, pattern, actions)
        .request(ActionRequest::new(COMPONENT, action))
        .sink(Arc::new(NullSink))
        .listener(recorder.clone())
        .config(EngineConfig {
            watchdog_poll_ms: 100,
            ..EngineConfig::default()
        })
        .build()
}

/// Remembers when each worker first got to run.
struct FirstStart(Arc<Mutex<HashMap<u32, Instant>>>);

impl Action for FirstStart {
    fn invoke(
        &mut self,
        _action: &str,
        _args: &[ArgumentValue],
        ctx: &InvocationContext<'_>,
    ) -> Result<ActionOutput, ActionError> {
        self.0.lock().entry(ctx.worker().0).or_insert_with(Instant::now);
        Ok(ActionOutput::default())
    }
}

#[test]
fn test_ramp_up_staggers_groups() {
    init_logging();
    let seen: Arc<Mutex<HashMap<u32, Instant>>> = Arc::default();
    let shared = seen.clone();
    let factory = move |_: &str| -> Result<Box<dyn Action>, ActionError> {
        Ok(Box::new(FirstStart(shared.clone())))
    };

    let recorder = Arc::new(Recorder::default());
    let pattern = ThreadingPattern::ramp_up(10, true, 1, 0, 500, 3);
    assert_eq!(pattern.start.group_sizes(), vec![3, 3, 3, 1]);
    let loader = queue("ramp", pattern, Arc::new(factory), "record", &recorder);
    loader.schedule(false).unwrap();
    loader.start().unwrap();
    assert_eq!(loader.state(), QueueState::Finished);
    loader.join_workers();

    let seen = seen.lock();
    assert_eq!(seen.len(), 10);
    // workers are numbered in group order: [0..3), [3..6), [6..9), [9]
    let group_start = |ids: std::ops::Range<u32>| ids.map(|id| seen[&id]).min().unwrap();
    let starts = [
        group_start(0..3),
        group_start(3..6),
        group_start(6..9),
        group_start(9..10),
    ];
    for pair in starts.windows(2) {
        // a few ms of slack for thread wake-up of the first group
        assert!(pair[1].duration_since(pair[0]) >= Duration::from_millis(480));
    }
}

#[test]
fn test_rate_quota_smaller_than_threads_fails() {
    let recorder = Arc::new(Recorder::default());
    let pattern = ThreadingPattern::all_at_once(5, false, 10, 0)
        .with_execution_speed(1, 3)
        .unwrap();
    let loader = queue("rate", pattern, fast(), "transfer", &recorder);
    let err = loader.schedule(false).unwrap_err();
    assert!(matches!(
        err,
        LoaderError::RateDistribution {
            executions: 3,
            threads: 5
        }
    ));
    assert_eq!(loader.state(), QueueState::NotStarted);
}

#[test]
fn test_cancel_is_idempotent() {
    init_logging();
    let recorder = Arc::new(Recorder::default());
    let pattern = ThreadingPattern::fixed_duration_all_at_once(3, false, 60, 50);
    let loader = queue("cancel", pattern, fast(), "transfer", &recorder);
    loader.schedule(false).unwrap();
    loader.start().unwrap();
    assert_eq!(loader.state(), QueueState::Running);

    loader.cancel();
    assert_eq!(loader.state(), QueueState::Finished);
    loader.cancel();
    loader.wait_until_finished();

    let started = Instant::now();
    loader.join_workers();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(recorder.finishes.load(Ordering::SeqCst), 1);
}

#[test]
fn test_synchronized_round_trip() {
    init_logging();
    let recorder = Arc::new(Recorder::default());
    let pattern = ThreadingPattern::all_at_once(3, false, 2, 0);
    let loader = queue("sync", pattern, fast(), "transfer", &recorder);
    loader.schedule(true).unwrap();
    loader.start().unwrap();

    assert!(loader.wait_until_paused());
    assert_eq!(loader.state(), QueueState::Paused);
    assert_eq!(loader.statistics().totals(), (3, 0));

    loader.resume().unwrap();
    assert!(!loader.wait_until_paused());
    assert_eq!(loader.state(), QueueState::Finished);
    loader.join_workers();

    assert_eq!(recorder.starts.load(Ordering::SeqCst), 1);
    assert_eq!(recorder.pauses.load(Ordering::SeqCst), 1);
    assert_eq!(recorder.finishes.load(Ordering::SeqCst), 1);
    assert_eq!(loader.statistics().totals(), (6, 0));
}

#[test]
fn test_blocking_start_returns_finished() {
    let recorder = Arc::new(Recorder::default());
    let pattern = ThreadingPattern::all_at_once(2, true, 3, 0);
    let loader = queue("blocking", pattern, fast(), "transfer", &recorder);
    loader.schedule(false).unwrap();
    loader.start().unwrap();
    assert_eq!(loader.state(), QueueState::Finished);
    assert!(loader.start().is_err());
    loader.join_workers();
    assert_eq!(loader.statistics().totals(), (6, 0));
}

#[test]
fn test_hanging_iterations_time_out() {
    init_logging();
    let recorder = Arc::new(Recorder::default());
    let pattern = ThreadingPattern::all_at_once(1, false, 2, 0).with_iteration_timeout(1);
    let loader = queue("timeout", pattern, fast(), "hang", &recorder);
    loader.schedule(false).unwrap();

    let started = Instant::now();
    loader.start().unwrap();
    loader.wait_until_finished();
    loader.join_workers();

    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(2));
    assert!(elapsed < Duration::from_secs(10));
    assert_eq!(loader.statistics().totals(), (0, 2));
    assert_eq!(loader.timed_out_iterations(), 2);
    assert!(recorder.errors.lock().is_empty());
}

#[test]
fn test_sleep_between_iterations_is_not_timed_out() {
    let recorder = Arc::new(Recorder::default());
    // 1s timeout, 1.5s between iterations
    let pattern = ThreadingPattern::all_at_once(1, false, 2, 1500).with_iteration_timeout(1);
    let loader = queue("idle", pattern, fast(), "transfer", &recorder);
    loader.schedule(false).unwrap();
    loader.start().unwrap();
    loader.wait_until_finished();
    loader.join_workers();
    assert_eq!(loader.statistics().totals(), (2, 0));
    // the monitor kept running through the 1.5s sleep without firing
    assert_eq!(loader.timed_out_iterations(), 0);
}

struct Exploding;

impl Action for Exploding {
    fn invoke(
        &mut self,
        _action: &str,
        _args: &[ArgumentValue],
        _ctx: &InvocationContext<'_>,
    ) -> Result<ActionOutput, ActionError> {
        panic!("action bug");
    }
}

#[test]
fn test_worker_panic_reaches_on_finish() {
    let recorder = Arc::new(Recorder::default());
    let factory = |_: &str| -> Result<Box<dyn Action>, ActionError> { Ok(Box::new(Exploding)) };
    let loader = queue(
        "panic",
        ThreadingPattern::all_at_once(2, true, 1, 0),
        Arc::new(factory),
        "boom",
        &recorder,
    );
    loader.schedule(false).unwrap();
    loader.start().unwrap();
    loader.join_workers();

    assert_eq!(loader.state(), QueueState::Finished);
    let errors = recorder.errors.lock();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("action bug"));
}

#[test]
fn test_handler_rejects_unfinished_duplicate() {
    let handler = QueueHandler::new();
    let recorder = Arc::new(Recorder::default());
    let pattern = ThreadingPattern::all_at_once(1, false, 1, 0);

    handler
        .schedule_queue(queue("dup", pattern, fast(), "transfer", &recorder), false)
        .unwrap();
    let err = handler
        .schedule_queue(queue("dup", pattern, fast(), "transfer", &recorder), false)
        .unwrap_err();
    assert!(matches!(err, LoaderError::QueueAlreadyExists { .. }));

    handler.start_queue("dup").unwrap();
    handler.wait_until_queue_finish("dup");
    assert!(!handler.is_queue_present("dup"));

    handler
        .execute_queue(queue("dup", pattern, fast(), "transfer", &recorder))
        .unwrap();
    handler.wait_until_all_queues_finish();
    assert_eq!(handler.running_queues_count(), 0);
}
