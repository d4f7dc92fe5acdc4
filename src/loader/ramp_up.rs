//! ramp_up.rs
//! The queue orchestrator.
//!
//! Workers are split into launch groups of `threads_per_step`, each group
//! sharing one `IterationGate`. `start` releases the groups one ramp-up
//! interval apart; `resume` does the same for the next synchronized round.
//! Worker pause/finish reports are counted down per round and folded into a
//! single queue-level transition.

use std::{
    sync::Arc,
    thread::{self, JoinHandle},
};

use log::{debug, error, info};
use parking_lot::{Condvar, Mutex};

use super::{
    QueueLoader,
    listener::{QueueListener, notify_all},
    state::QueueState,
};
use crate::{
    action::{
        ActionFactory, ActionRequest,
        data::{DataProvider, SharedProviders},
        simulated::simulated_factory,
    },
    config::{EngineConfig, QueueDefinition},
    error::LoaderError,
    pattern::{NUMBER_THREADS_TOKEN, ThreadingPattern, even_load},
    telemetry::{ExecutionStatistics, LogSink, TelemetrySink},
    threading::{
        IterationGate, QueueContext, Signal, TaskControl, TaskFactory, TaskListener,
        TimeoutWatchdog, WorkerId, WorkerTask,
    },
};

pub struct RampUpQueueLoaderBuilder {
    name: String,
    pattern: ThreadingPattern,
    actions: Arc<dyn ActionFactory>,
    requests: Vec<ActionRequest>,
    providers: Vec<Box<dyn DataProvider>>,
    sink: Arc<dyn TelemetrySink>,
    listeners: Vec<Arc<dyn QueueListener>>,
    config: EngineConfig,
}

impl RampUpQueueLoaderBuilder {
    pub fn request(mut self, request: ActionRequest) -> Self {
        self.requests.push(request);
        self
    }

    pub fn requests(mut self, requests: impl IntoIterator<Item = ActionRequest>) -> Self {
        self.requests.extend(requests);
        self
    }

    pub fn data_provider(mut self, provider: Box<dyn DataProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn listener(mut self, listener: Arc<dyn QueueListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> RampUpQueueLoader {
        let mut pattern = self.pattern;
        let pacing = pattern.execution.pacing().normalized();
        *pattern.execution.pacing_mut() = pacing;

        let queue = Arc::new(QueueContext {
            name: self.name.clone(),
            requests: self.requests,
            providers: SharedProviders::new(self.providers),
            sink: self.sink,
            statistics: Arc::new(ExecutionStatistics::new()),
        });

        RampUpQueueLoader {
            inner: Arc::new(LoaderInner {
                name: self.name,
                pattern,
                config: self.config,
                queue,
                actions: self.actions,
                listeners: self.listeners,
                stagger: Signal::new(),
                lifecycle: Mutex::new(Lifecycle::default()),
                changed: Condvar::new(),
            }),
        }
    }
}

/// Mutable queue state, guarded by one lock.
struct Lifecycle {
    state: QueueState,
    groups: Vec<Arc<IterationGate>>,
    controls: Vec<Arc<TaskControl>>,
    workers: Vec<JoinHandle<()>>,
    launcher: Option<JoinHandle<()>>,
    watchdog: Option<Arc<TimeoutWatchdog>>,

    // workers that have not reported finish yet
    active: usize,
    // reports still expected in the current round
    countdown: usize,
    paused_this_round: usize,
    first_error: Option<LoaderError>,
    finish_fired: bool,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self {
            state: QueueState::NotStarted,
            groups: Vec::new(),
            controls: Vec::new(),
            workers: Vec::new(),
            launcher: None,
            watchdog: None,
            active: 0,
            countdown: 0,
            paused_this_round: 0,
            first_error: None,
            finish_fired: false,
        }
    }
}

enum RoundEnd {
    Pause,
    Finish,
}

struct LoaderInner {
    name: String,
    pattern: ThreadingPattern,
    config: EngineConfig,
    queue: Arc<QueueContext>,
    actions: Arc<dyn ActionFactory>,
    listeners: Vec<Arc<dyn QueueListener>>,
    // interrupted on cancel to cut the ramp-up short
    stagger: Signal,
    lifecycle: Mutex<Lifecycle>,
    changed: Condvar,
}

pub struct RampUpQueueLoader {
    inner: Arc<LoaderInner>,
}

impl RampUpQueueLoader {
    pub fn builder(
        name: impl Into<String>,
        pattern: ThreadingPattern,
        actions: Arc<dyn ActionFactory>,
    ) -> RampUpQueueLoaderBuilder {
        RampUpQueueLoaderBuilder {
            name: name.into(),
            pattern,
            actions,
            requests: Vec::new(),
            providers: Vec::new(),
            sink: Arc::new(LogSink),
            listeners: Vec::new(),
            config: EngineConfig::default(),
        }
    }

    /// A loader running `definition` against the simulated component.
    pub fn from_definition(
        definition: &QueueDefinition,
        sink: Arc<dyn TelemetrySink>,
    ) -> RampUpQueueLoaderBuilder {
        let providers = definition.data_providers.iter().map(|p| p.build());
        let mut builder = Self::builder(
            definition.name.clone(),
            definition.pattern,
            Arc::new(simulated_factory(definition.simulated)),
        )
        .requests(definition.actions.iter().cloned())
        .sink(sink)
        .config(definition.engine.clone());
        for provider in providers {
            builder = builder.data_provider(provider);
        }
        builder
    }

    pub fn pattern(&self) -> &ThreadingPattern {
        &self.inner.pattern
    }

    pub fn statistics(&self) -> Arc<ExecutionStatistics> {
        self.inner.queue.statistics.clone()
    }

    /// Whether the queue met its configured pass rate so far.
    pub fn is_passed(&self) -> bool {
        self.inner
            .queue
            .statistics
            .is_passed(self.inner.pattern.pass_rate_percent)
    }

    /// Iterations the watchdog has timed out so far, over all workers.
    pub fn timed_out_iterations(&self) -> u64 {
        self.inner
            .lifecycle
            .lock()
            .controls
            .iter()
            .map(|control| control.timeout_count())
            .sum()
    }

    /// Wait for every worker thread and the launcher to exit. `cancel` does
    /// not do this on its own.
    pub fn join_workers(&self) {
        let (workers, launcher) = {
            let mut lifecycle = self.inner.lifecycle.lock();
            (
                std::mem::take(&mut lifecycle.workers),
                lifecycle.launcher.take(),
            )
        };
        for handle in launcher.into_iter().chain(workers) {
            if handle.join().is_err() {
                error!("A thread of load queue '{}' panicked", self.inner.name);
            }
        }
    }
}

impl QueueLoader for RampUpQueueLoader {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn state(&self) -> QueueState {
        self.inner.lifecycle.lock().state
    }

    fn schedule(&self, synchronized_iterations: bool) -> Result<(), LoaderError> {
        self.inner.schedule(&self.inner, synchronized_iterations)
    }

    fn start(&self) -> Result<(), LoaderError> {
        self.inner.start(&self.inner)
    }

    fn resume(&self) -> Result<(), LoaderError> {
        self.inner.resume()
    }

    fn cancel(&self) {
        self.inner.cancel();
    }

    fn wait_until_finished(&self) {
        self.inner.wait_until_finished();
    }

    fn wait_until_paused(&self) -> bool {
        self.inner.wait_until_paused()
    }
}

impl Drop for RampUpQueueLoader {
    // parked workers would otherwise wait on their gates forever
    fn drop(&mut self) {
        let state = self.inner.lifecycle.lock().state;
        if matches!(
            state,
            QueueState::Scheduled | QueueState::Running | QueueState::Paused
        ) {
            self.inner.cancel();
        }
    }
}

impl LoaderInner {
    fn invalid_state(&self, operation: &'static str, state: QueueState) -> LoaderError {
        LoaderError::InvalidState {
            queue: self.name.clone(),
            operation,
            state,
        }
    }

    fn schedule(&self, this: &Arc<Self>, synchronized: bool) -> Result<(), LoaderError> {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state != QueueState::NotStarted {
            return Err(self.invalid_state("schedule", lifecycle.state));
        }
        self.pattern.validate()?;

        let threads = self.pattern.thread_count();
        let shares = if self.pattern.execution.pacing().has_rate_limit() {
            let quota = self.pattern.execution.executions_per_time_frame();
            if threads > quota {
                return Err(LoaderError::RateDistribution {
                    executions: quota,
                    threads,
                });
            }
            even_load(quota, threads)
        } else {
            vec![0; threads as usize]
        };

        let watchdog = self
            .pattern
            .start
            .iteration_timeout()
            .map(|timeout| TimeoutWatchdog::new(&self.name, timeout, self.config.watchdog_poll()));

        self.queue.providers.warn_unused_parameters(&self.queue.requests);

        let listener: Arc<dyn TaskListener> = this.clone();
        let factory = TaskFactory::new(
            self.queue.clone(),
            self.pattern.execution,
            synchronized,
            self.actions.clone(),
            watchdog.clone(),
            listener,
        );

        // build everything first so a bad component spawns nothing
        let mut groups = Vec::new();
        let mut tasks: Vec<WorkerTask> = Vec::with_capacity(threads as usize);
        let mut next_id = 0u32;
        for size in self.pattern.start.group_sizes() {
            let gate = Arc::new(IterationGate::new());
            for _ in 0..size {
                let share = shares.get(next_id as usize).copied().unwrap_or(0);
                tasks.push(factory.create(WorkerId(next_id), gate.clone(), share)?);
                next_id += 1;
            }
            groups.push(gate);
        }

        let controls: Vec<Arc<TaskControl>> = tasks.iter().map(|t| t.control().clone()).collect();
        let mut workers = Vec::with_capacity(tasks.len());
        for task in tasks {
            match self.spawn_worker(task) {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    for control in &controls {
                        control.cancel();
                    }
                    for gate in &groups {
                        gate.abort();
                    }
                    return Err(e);
                }
            }
        }

        lifecycle.groups = groups;
        lifecycle.controls = controls;
        lifecycle.workers = workers;
        lifecycle.watchdog = watchdog;
        lifecycle.active = threads as usize;
        lifecycle.state = QueueState::Scheduled;
        drop(lifecycle);
        self.changed.notify_all();

        info!(
            "Scheduled load queue '{}' : {}{}",
            self.name,
            self.pattern
                .description()
                .replace(NUMBER_THREADS_TOKEN, &threads.to_string()),
            if synchronized { ", synchronized iterations" } else { "" }
        );
        Ok(())
    }

    fn spawn_worker(&self, task: WorkerTask) -> Result<JoinHandle<()>, LoaderError> {
        let name = format!("{}-{}", self.name, task.id());
        let builder = if self.config.name_worker_threads {
            thread::Builder::new().name(name.clone())
        } else {
            thread::Builder::new()
        };
        builder
            .spawn(move || task.run())
            .map_err(|source| LoaderError::Spawn { name, source })
    }

    fn start(&self, this: &Arc<Self>) -> Result<(), LoaderError> {
        let watchdog = {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.state != QueueState::Scheduled {
                return Err(self.invalid_state("start", lifecycle.state));
            }
            lifecycle.state = QueueState::Running;
            lifecycle.countdown = lifecycle.active;
            lifecycle.paused_this_round = 0;
            lifecycle.watchdog.clone()
        };
        self.changed.notify_all();
        info!("Starting load queue '{}'", self.name);
        notify_all(&self.listeners, &self.name, "start", |l| l.on_start(&self.name));

        if let Some(watchdog) = watchdog {
            if let Err(e) = watchdog.start() {
                error!("Could not start the timeout watchdog of load queue '{}': {e}", self.name);
                self.cancel();
                return Err(e);
            }
        }

        let start = &self.pattern.start;
        if start.block_until_completion || start.ramp_up_interval_ms == 0 {
            self.launch_groups();
        } else {
            let name = format!("{}-launcher", self.name);
            let inner = Arc::clone(this);
            let spawned = thread::Builder::new()
                .name(name.clone())
                .spawn(move || inner.launch_groups());
            match spawned {
                Ok(handle) => self.lifecycle.lock().launcher = Some(handle),
                Err(source) => {
                    error!("Could not spawn the launcher of load queue '{}'", self.name);
                    self.cancel();
                    return Err(LoaderError::Spawn { name, source });
                }
            }
        }

        if start.block_until_completion {
            self.wait_until_finished();
        }
        Ok(())
    }

    /// Release every group, one ramp-up interval apart.
    fn launch_groups(&self) {
        let groups = self.lifecycle.lock().groups.clone();
        let interval = self.pattern.start.ramp_up_interval();
        let count = groups.len();

        for (i, gate) in groups.iter().enumerate() {
            if self.lifecycle.lock().finish_fired {
                return;
            }
            debug!("Load queue '{}' releasing group {} of {count}", self.name, i + 1);
            gate.release();
            if i + 1 < count && self.stagger.sleep(interval).is_err() {
                debug!("Ramp-up of load queue '{}' interrupted", self.name);
                return;
            }
        }
    }

    fn resume(&self) -> Result<(), LoaderError> {
        {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.state != QueueState::Paused {
                return Err(self.invalid_state("resume", lifecycle.state));
            }
            lifecycle.state = QueueState::Running;
            lifecycle.countdown = lifecycle.active;
            lifecycle.paused_this_round = 0;
        }
        self.changed.notify_all();
        info!("Resuming load queue '{}'", self.name);
        self.launch_groups();
        Ok(())
    }

    fn cancel(&self) {
        let (controls, groups) = {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.finish_fired
                || matches!(lifecycle.state, QueueState::NotStarted | QueueState::Finished)
            {
                return;
            }
            lifecycle.finish_fired = true;
            (lifecycle.controls.clone(), lifecycle.groups.clone())
        };
        info!("Cancelling load queue '{}'", self.name);
        self.stagger.interrupt();
        for control in &controls {
            control.cancel();
        }
        for gate in &groups {
            gate.abort();
        }
        self.finish();
    }

    /// One worker's end-of-round report.
    fn report(&self, paused: bool, error: Option<LoaderError>) {
        let end = {
            let mut lifecycle = self.lifecycle.lock();
            if !paused {
                lifecycle.active = lifecycle.active.saturating_sub(1);
                if lifecycle.first_error.is_none() {
                    lifecycle.first_error = error;
                }
            }
            if lifecycle.state != QueueState::Running || lifecycle.finish_fired {
                return;
            }
            lifecycle.countdown = lifecycle.countdown.saturating_sub(1);
            if paused {
                lifecycle.paused_this_round += 1;
            }
            if lifecycle.countdown > 0 {
                return;
            }
            if lifecycle.paused_this_round > 0 {
                RoundEnd::Pause
            } else {
                lifecycle.finish_fired = true;
                RoundEnd::Finish
            }
        };
        match end {
            RoundEnd::Pause => self.pause(),
            RoundEnd::Finish => self.finish(),
        }
    }

    fn pause(&self) {
        info!("Load queue '{}' paused", self.name);
        notify_all(&self.listeners, &self.name, "pause", |l| l.on_pause(&self.name));
        {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.state == QueueState::Running && !lifecycle.finish_fired {
                lifecycle.state = QueueState::Paused;
            }
        }
        self.changed.notify_all();
    }

    fn finish(&self) {
        let (watchdog, error) = {
            let mut lifecycle = self.lifecycle.lock();
            (lifecycle.watchdog.take(), lifecycle.first_error.take())
        };
        if let Some(watchdog) = watchdog {
            watchdog.stop();
        }
        info!("Load queue '{}' finished", self.name);
        notify_all(&self.listeners, &self.name, "finish", |l| {
            l.on_finish(&self.name, error.as_ref())
        });
        {
            let mut lifecycle = self.lifecycle.lock();
            lifecycle.state = QueueState::Finished;
            lifecycle.first_error = error;
        }
        self.changed.notify_all();
    }

    fn wait_until_finished(&self) {
        let mut lifecycle = self.lifecycle.lock();
        while lifecycle.state.is_in_progress() {
            self.changed.wait(&mut lifecycle);
        }
    }

    fn wait_until_paused(&self) -> bool {
        let mut lifecycle = self.lifecycle.lock();
        while lifecycle.state == QueueState::Running {
            self.changed.wait(&mut lifecycle);
        }
        lifecycle.state == QueueState::Paused
    }
}

impl TaskListener for LoaderInner {
    fn on_pause(&self, _worker: WorkerId) {
        self.report(true, None);
    }

    fn on_finish(&self, worker: WorkerId, error: Option<LoaderError>) {
        debug!("Worker {worker} of load queue '{}' is done", self.name);
        self.report(false, error);
    }
}
