//! task.rs
//! One worker's repeated execution of the queue's action list.
//!
//! A task is driven in rounds: `run` waits at the gate, calls `execute`, and
//! either parks again (PAUSED, synchronized mode) or exits. Counters, the
//! start time and the rate window survive across rounds.

use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    time::{Duration, Instant},
};

use log::{debug, error, warn};
use rand::random_range;

use super::{
    IterationGate, TaskControl, TaskListener, TaskOutcome, TimeoutWatchdog, WorkerId,
    signal::Interrupted,
};
use crate::{
    action::{Action, ActionRequest, ArgumentValue, InvocationContext, data::SharedProviders},
    error::{ActionError, LoaderError},
    pattern::Pacing,
    telemetry::{
        Checkpoint, CheckpointResult, ExecutionStatistics, QUEUE_EXECUTION_TIME,
        TIME_BETWEEN_ITERATIONS, TelemetrySink, report,
    },
};

/// When a worker stops iterating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationPolicy {
    Invocations { total: u32 },
    Deadline { duration: Duration },
}

/// State shared read-only by every worker of one queue.
pub struct QueueContext {
    pub name: String,
    pub requests: Vec<ActionRequest>,
    pub providers: SharedProviders,
    pub sink: Arc<dyn TelemetrySink>,
    pub statistics: Arc<ExecutionStatistics>,
}

pub struct WorkerTask {
    id: WorkerId,
    control: Arc<TaskControl>,
    queue: Arc<QueueContext>,
    gate: Arc<IterationGate>,
    watchdog: Option<Arc<TimeoutWatchdog>>,
    listener: Arc<dyn TaskListener>,
    policy: TerminationPolicy,
    pacing: Pacing,
    synchronized: bool,

    // one instance per distinct component, `slots[i]` indexes it for request i
    actions: Vec<Box<dyn Action>>,
    slots: Vec<usize>,

    completed: u32,
    iterations_started: u64,
    started_at: Option<Instant>,
    frame_start: Instant,
    frame_count: u32,
}

impl WorkerTask {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        control: Arc<TaskControl>,
        queue: Arc<QueueContext>,
        gate: Arc<IterationGate>,
        watchdog: Option<Arc<TimeoutWatchdog>>,
        listener: Arc<dyn TaskListener>,
        policy: TerminationPolicy,
        pacing: Pacing,
        synchronized: bool,
        actions: Vec<Box<dyn Action>>,
        slots: Vec<usize>,
    ) -> Self {
        Self {
            id: control.worker(),
            control,
            queue,
            gate,
            watchdog,
            listener,
            policy,
            pacing,
            synchronized,
            actions,
            slots,
            completed: 0,
            iterations_started: 0,
            started_at: None,
            frame_start: Instant::now(),
            frame_count: 0,
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn control(&self) -> &Arc<TaskControl> {
        &self.control
    }

    pub fn policy(&self) -> TerminationPolicy {
        self.policy
    }

    pub fn pacing(&self) -> &Pacing {
        &self.pacing
    }

    /// Iterations that ran to the end of the action list or failed in it.
    pub fn completed(&self) -> u32 {
        self.completed
    }

    /// Thread body. Returns once the task finished, was cancelled or
    /// panicked; the listener has been told by then.
    pub fn run(mut self) {
        let error = loop {
            if self.gate.await_turn(&self.control).is_err() {
                self.control.mark_externally_interrupted();
                break None;
            }
            match panic::catch_unwind(AssertUnwindSafe(|| self.execute())) {
                Ok(TaskOutcome::Paused) => self.listener.on_pause(self.id),
                Ok(TaskOutcome::Finished) | Ok(TaskOutcome::Cancelled) => break None,
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    error!("Worker {} of queue '{}' panicked: {message}", self.id, self.queue.name);
                    break Some(LoaderError::WorkerPanicked {
                        queue: self.queue.name.clone(),
                        worker: self.id.0,
                        message,
                    });
                }
            }
        };

        if let Some(watchdog) = &self.watchdog {
            watchdog.on_worker_shutdown(self.id);
        }
        self.control.set_alive(false);
        self.listener.on_finish(self.id, error);
    }

    /// One round: iterate until the policy is satisfied, a pause is due, or
    /// the task is cancelled.
    pub fn execute(&mut self) -> TaskOutcome {
        let started_at = match self.started_at {
            Some(started_at) => started_at,
            None => {
                let now = Instant::now();
                self.started_at = Some(now);
                self.frame_start = now;
                now
            }
        };
        match self.policy {
            TerminationPolicy::Invocations { total } => self.execute_invocations(total),
            // a duration past what an Instant can hold has no deadline
            TerminationPolicy::Deadline { duration } => {
                self.execute_until(started_at.checked_add(duration))
            }
        }
    }

    fn execute_invocations(&mut self, total: u32) -> TaskOutcome {
        while self.completed < total {
            if self.control.is_cancelled() {
                return TaskOutcome::Cancelled;
            }
            if self.invoke_actions().is_err() {
                return TaskOutcome::Cancelled;
            }
            self.completed += 1;
            if self.completed >= total {
                break;
            }
            if self.pace(None).is_err() {
                return TaskOutcome::Cancelled;
            }
            if self.synchronized {
                return TaskOutcome::Paused;
            }
        }
        TaskOutcome::Finished
    }

    fn execute_until(&mut self, end: Option<Instant>) -> TaskOutcome {
        let before_end = || end.is_none_or(|end| Instant::now() < end);
        while before_end() {
            if self.control.is_cancelled() {
                return TaskOutcome::Cancelled;
            }
            if self.invoke_actions().is_err() {
                return TaskOutcome::Cancelled;
            }
            self.completed += 1;
            if !before_end() {
                break;
            }
            match self.pace(end) {
                Err(Interrupted) => return TaskOutcome::Cancelled,
                // no time left for another iteration
                Ok(false) => break,
                Ok(true) => {}
            }
            if self.synchronized {
                return TaskOutcome::Paused;
            }
        }
        TaskOutcome::Finished
    }

    /// Runs the action list once. `Err` only when the worker was interrupted
    /// for a reason other than an iteration timeout.
    fn invoke_actions(&mut self) -> Result<(), Interrupted> {
        self.iterations_started += 1;
        debug!(
            "Starting '{}' queue for {}th time on worker {}",
            self.queue.name, self.iterations_started, self.id
        );

        let queue = Arc::clone(&self.queue);
        let mut provided = if queue.providers.is_empty() {
            Vec::new()
        } else {
            queue.providers.generate()
        };
        let arguments: Vec<Vec<ArgumentValue>> =
            queue.requests.iter().map(|r| r.bind(&mut provided)).collect();

        if let Some(watchdog) = &self.watchdog {
            watchdog.on_iteration_start(&self.control, Instant::now());
        }
        let result = self.run_actions(&queue, &arguments);
        if let Some(watchdog) = &self.watchdog {
            watchdog.on_iteration_end(self.id);
        }

        match result {
            Ok(queue_ms) => {
                let mut total = Checkpoint::new(&queue.name, self.id, QUEUE_EXECUTION_TIME);
                total.response_ms = queue_ms;
                report(queue.sink.queue_execution_time(&total));
            }
            Err(ActionError::Interrupted) => match self.control.take_timeout() {
                Some(secs) => {
                    self.control.signal().take();
                    if self.control.is_cancelled() {
                        self.control.mark_externally_interrupted();
                        return Err(Interrupted);
                    }
                    error!("Iteration timed out in {secs} seconds - skipping to next iteration");
                }
                None => {
                    self.control.mark_externally_interrupted();
                    return Err(Interrupted);
                }
            },
            Err(e) => {
                error!("Exception caught during invocation - skipping to next iteration: {e}");
            }
        }

        // a timeout may land after the last action already returned
        if !self.control.is_cancelled() && self.control.take_timeout().is_some() {
            self.control.signal().take();
        }
        Ok(())
    }

    /// Invoke every request once; returns the accumulated queue time in ms.
    fn run_actions(
        &mut self,
        queue: &QueueContext,
        arguments: &[Vec<ArgumentValue>],
    ) -> Result<u64, ActionError> {
        let batch = queue.sink.is_batch_mode();
        let mut queue_ms = 0u64;

        for (i, request) in queue.requests.iter().enumerate() {
            let name = request.checkpoint_name();
            let mut checkpoint = Checkpoint::new(&queue.name, self.id, name);
            checkpoint.transfer_unit = request.transfer_unit.as_deref();

            if request.register_execution && !batch {
                report(queue.sink.start_checkpoint(&checkpoint));
            }
            let started = Instant::now();
            let ctx = InvocationContext::new(self.id, self.iterations_started, self.control.signal());
            let outcome = self.actions[self.slots[i]].invoke(&request.action, &arguments[i], &ctx);
            let response_ms = started.elapsed().as_millis() as u64;

            match outcome {
                Ok(output) => {
                    if !request.register_execution {
                        continue;
                    }
                    checkpoint.response_ms = response_ms;
                    if request.transfer_unit.is_some() {
                        checkpoint.transfer_size = output.transfer_size;
                    }
                    if batch {
                        report(queue.sink.insert_checkpoint(&checkpoint));
                    } else {
                        report(queue.sink.end_checkpoint(&checkpoint));
                    }
                    if request.register_in_queue_time {
                        queue_ms += response_ms;
                    }
                    queue.statistics.register_result(name, true, Some(response_ms));
                }
                Err(e) => {
                    if request.register_execution {
                        checkpoint.result = CheckpointResult::Failed;
                        if batch {
                            report(queue.sink.insert_checkpoint(&checkpoint));
                        } else {
                            report(queue.sink.end_checkpoint(&checkpoint));
                        }
                        queue.statistics.register_result(name, false, None);

                        let mut total = Checkpoint::new(&queue.name, self.id, QUEUE_EXECUTION_TIME);
                        total.response_ms = queue_ms;
                        total.result = CheckpointResult::Failed;
                        report(queue.sink.queue_execution_time(&total));
                    }
                    return Err(e);
                }
            }
        }
        Ok(queue_ms)
    }

    /// Delay then rate limit. `Ok(false)` means the known end time leaves no
    /// room for another iteration.
    fn pace(&mut self, end: Option<Instant>) -> Result<bool, Interrupted> {
        let interval = self.next_interval();
        if past_end(interval, end) {
            return Ok(false);
        }
        if !interval.is_zero() {
            self.sleep(interval)?;
            if self.pacing.interval_range().is_some() && self.pacing.interval_ms == 0 {
                let mut checkpoint = Checkpoint::new(&self.queue.name, self.id, TIME_BETWEEN_ITERATIONS);
                checkpoint.response_ms = interval.as_millis() as u64;
                report(self.queue.sink.insert_checkpoint(&checkpoint));
            }
        }
        if self.pacing.has_rate_limit() && self.evaluate_speed_progress(end)? {
            return Ok(false);
        }
        Ok(true)
    }

    fn next_interval(&self) -> Duration {
        if self.pacing.interval_ms > 0 {
            Duration::from_millis(self.pacing.interval_ms)
        } else if let Some((min, max)) = self.pacing.interval_range() {
            Duration::from_millis(random_range(min..max))
        } else {
            Duration::ZERO
        }
    }

    /// Time-frame throttling. Returns `true` when sleeping out the frame
    /// would pass the end time, i.e. the task should stop.
    fn evaluate_speed_progress(&mut self, end: Option<Instant>) -> Result<bool, Interrupted> {
        self.frame_count += 1;
        let quota = self.pacing.executions_per_time_frame;
        let frame = self.pacing.time_frame();
        let elapsed = self.frame_start.elapsed();

        if elapsed < frame {
            if self.frame_count >= quota {
                let remaining = frame - elapsed;
                if past_end(remaining, end) {
                    return Ok(true);
                }
                self.sleep(remaining)?;
                self.frame_start = Instant::now();
                self.frame_count = 0;
            }
        } else {
            if self.frame_count < quota {
                warn!(
                    "We were not able to execute the requested {quota} iterations for {} seconds, but only {} iterations",
                    frame.as_secs(),
                    self.frame_count
                );
            }
            self.frame_start = Instant::now();
            self.frame_count = 0;
        }
        Ok(false)
    }

    /// Sleep between iterations. Only a cancellation cuts it short; any other
    /// interrupt is cleared and the sleep resumes.
    fn sleep(&self, duration: Duration) -> Result<(), Interrupted> {
        let deadline = Instant::now().checked_add(duration);
        loop {
            // checked on every pass, `take` below may have swallowed its interrupt
            if self.control.is_cancelled() {
                return Err(Interrupted);
            }
            let remaining = deadline.map_or(Duration::MAX, |deadline| {
                deadline.saturating_duration_since(Instant::now())
            });
            match self.control.signal().sleep(remaining) {
                Ok(()) => return Ok(()),
                Err(Interrupted) if self.control.is_cancelled() => return Err(Interrupted),
                Err(Interrupted) => {
                    self.control.signal().take();
                    self.control.take_timeout();
                }
            }
        }
    }
}

/// Whether waiting `wait` from now reaches `end`. An unrepresentable instant
/// is past any end.
fn past_end(wait: Duration, end: Option<Instant>) -> bool {
    end.is_some_and(|end| Instant::now().checked_add(wait).is_none_or(|next| next >= end))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
