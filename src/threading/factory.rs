//! factory.rs
//! Builds worker tasks from the queue's execution pattern.

use std::{collections::HashMap, sync::Arc, time::Duration};

use super::{
    IterationGate, QueueContext, TaskControl, TaskListener, TerminationPolicy, TimeoutWatchdog,
    WorkerId, WorkerTask,
};
use crate::{
    action::{Action, ActionFactory},
    error::LoaderError,
    pattern::ExecutionPattern,
};

pub struct TaskFactory {
    queue: Arc<QueueContext>,
    execution: ExecutionPattern,
    synchronized: bool,
    actions: Arc<dyn ActionFactory>,
    watchdog: Option<Arc<TimeoutWatchdog>>,
    listener: Arc<dyn TaskListener>,
}

impl TaskFactory {
    pub fn new(
        queue: Arc<QueueContext>,
        execution: ExecutionPattern,
        synchronized: bool,
        actions: Arc<dyn ActionFactory>,
        watchdog: Option<Arc<TimeoutWatchdog>>,
        listener: Arc<dyn TaskListener>,
    ) -> Self {
        Self {
            queue,
            execution,
            synchronized,
            actions,
            watchdog,
            listener,
        }
    }

    pub fn termination_policy(execution: &ExecutionPattern) -> TerminationPolicy {
        match *execution {
            ExecutionPattern::FixedInvocations { iterations, .. } => {
                TerminationPolicy::Invocations { total: iterations }
            }
            ExecutionPattern::FixedDuration { duration_secs, .. } => TerminationPolicy::Deadline {
                duration: Duration::from_secs(duration_secs),
            },
        }
    }

    /// One task bound to `gate`. `executions_per_time_frame` is this
    /// worker's share of the queue-wide rate quota.
    pub fn create(
        &self,
        worker: WorkerId,
        gate: Arc<IterationGate>,
        executions_per_time_frame: u32,
    ) -> Result<WorkerTask, LoaderError> {
        let (actions, slots) = self.instantiate_actions()?;

        let mut pacing = *self.execution.pacing();
        if pacing.has_rate_limit() {
            pacing.executions_per_time_frame = executions_per_time_frame;
        }

        let control = Arc::new(TaskControl::new(worker));
        if let Some(watchdog) = &self.watchdog {
            watchdog.track(control.clone());
        }

        Ok(WorkerTask::new(
            control,
            self.queue.clone(),
            gate,
            self.watchdog.clone(),
            self.listener.clone(),
            Self::termination_policy(&self.execution),
            pacing,
            self.synchronized,
            actions,
            slots,
        ))
    }

    fn instantiate_actions(&self) -> Result<(Vec<Box<dyn Action>>, Vec<usize>), LoaderError> {
        let mut instances: Vec<Box<dyn Action>> = Vec::new();
        let mut by_component: HashMap<&str, usize> = HashMap::new();
        let mut slots = Vec::with_capacity(self.queue.requests.len());

        for request in &self.queue.requests {
            let component = request.component.as_str();
            let slot = match by_component.get(component) {
                Some(&slot) => slot,
                None => {
                    let instance = self.actions.create(component).map_err(|source| {
                        LoaderError::ActionInstantiation {
                            component: component.to_string(),
                            source,
                        }
                    })?;
                    instances.push(instance);
                    by_component.insert(component, instances.len() - 1);
                    instances.len() - 1
                }
            };
            slots.push(slot);
        }
        Ok((instances, slots))
    }
}
