//! Contracts between the engine and whatever actually performs the work.
//!
//! The engine never looks inside an action. It asks an [`ActionFactory`] for
//! one [`Action`] instance per component per worker, binds provided argument
//! values onto the [`ActionRequest`]s and calls [`Action::invoke`] once per
//! request per iteration.

pub mod data;
pub mod simulated;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    error::ActionError,
    threading::{WorkerId, signal::Signal},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgumentValue {
    pub name: String,
    pub value: String,
}

impl ArgumentValue {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

fn default_true() -> bool {
    true
}

/// One entry of a queue's ordered action list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub component: String,
    pub action: String,
    #[serde(default)]
    pub arguments: Vec<ArgumentValue>,
    /// Record a checkpoint and statistics for this action.
    #[serde(default = "default_true")]
    pub register_execution: bool,
    /// Add this action's response time to the queue execution time.
    #[serde(default = "default_true")]
    pub register_in_queue_time: bool,
    /// Unit of the transfer size the action reports, if any.
    #[serde(default)]
    pub transfer_unit: Option<String>,
}

impl ActionRequest {
    pub fn new(component: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            action: action.into(),
            arguments: Vec::new(),
            register_execution: true,
            register_in_queue_time: true,
            transfer_unit: None,
        }
    }

    pub fn with_argument(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.arguments.push(ArgumentValue::new(name, value));
        self
    }

    pub fn with_transfer_unit(mut self, unit: impl Into<String>) -> Self {
        self.transfer_unit = Some(unit.into());
        self
    }

    pub fn parameter_names(&self) -> impl Iterator<Item = &str> {
        self.arguments.iter().map(|a| a.name.as_str())
    }

    /// The request's arguments with provided values substituted. Each
    /// provided value is consumed by the first argument it binds to, so a
    /// parameter used by two actions needs two providers.
    pub fn bind(&self, provided: &mut Vec<ArgumentValue>) -> Vec<ArgumentValue> {
        self.arguments
            .iter()
            .map(|arg| match provided.iter().position(|p| p.name == arg.name) {
                Some(i) => provided.remove(i),
                None => arg.clone(),
            })
            .collect()
    }

    /// Checkpoint name used for telemetry.
    pub fn checkpoint_name(&self) -> &str {
        &self.action
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActionOutput {
    pub transfer_size: u64,
}

/// What an action can see of the worker invoking it.
pub struct InvocationContext<'a> {
    worker: WorkerId,
    iteration: u64,
    signal: &'a Signal,
}

impl<'a> InvocationContext<'a> {
    pub fn new(worker: WorkerId, iteration: u64, signal: &'a Signal) -> Self {
        Self {
            worker,
            iteration,
            signal,
        }
    }

    pub fn worker(&self) -> WorkerId {
        self.worker
    }

    /// One-based iteration number of the invoking worker.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn is_interrupted(&self) -> bool {
        self.signal.is_set()
    }

    pub fn check_interrupted(&self) -> Result<(), ActionError> {
        if self.signal.is_set() {
            Err(ActionError::Interrupted)
        } else {
            Ok(())
        }
    }

    /// Interruptible sleep for actions that wait on something.
    pub fn sleep(&self, duration: Duration) -> Result<(), ActionError> {
        Ok(self.signal.sleep(duration)?)
    }
}

/// An instance of one action component, owned by a single worker.
///
/// Blocking implementations must poll the context and return
/// `ActionError::Interrupted` promptly once it reports an interrupt.
pub trait Action: Send {
    fn invoke(
        &mut self,
        action: &str,
        arguments: &[ArgumentValue],
        ctx: &InvocationContext<'_>,
    ) -> Result<ActionOutput, ActionError>;
}

pub trait ActionFactory: Send + Sync {
    fn create(&self, component: &str) -> Result<Box<dyn Action>, ActionError>;
}

impl<F> ActionFactory for F
where
    F: Fn(&str) -> Result<Box<dyn Action>, ActionError> + Send + Sync,
{
    fn create(&self, component: &str) -> Result<Box<dyn Action>, ActionError> {
        self(component)
    }
}
