//! error.rs
//! Error taxonomy for the load-queue engine.
//!
//! - `LoaderError`: configuration and lifecycle errors, returned synchronously
//!   from schedule/start/resume and the queue handler.
//! - `ActionError`: per-invocation failures; never abort a queue.
//! - `TelemetryError`: sink failures; logged and swallowed.
//! - `ConfigError`: YAML / IO problems while loading definitions.

use thiserror::Error;

use crate::loader::state::QueueState;

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("cannot {operation} load queue '{queue}' while it is {state}")]
    InvalidState {
        queue: String,
        operation: &'static str,
        state: QueueState,
    },

    #[error("invalid threading pattern: {0}")]
    InvalidPattern(String),

    #[error(
        "cannot evenly distribute {executions} iterations per time frame to {threads} threads; \
         iterations per time frame must be at least as many as threads"
    )]
    RateDistribution { executions: u32, threads: u32 },

    #[error("load queue '{name}' already exists and is {state}")]
    QueueAlreadyExists { name: String, state: QueueState },

    #[error("no load queue named '{0}'")]
    NoSuchQueue(String),

    #[error("could not instantiate component '{component}': {source}")]
    ActionInstantiation {
        component: String,
        #[source]
        source: ActionError,
    },

    #[error("failed to spawn thread '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("worker {worker} of queue '{queue}' panicked: {message}")]
    WorkerPanicked {
        queue: String,
        worker: u32,
        message: String,
    },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ActionError {
    #[error("action invocation was interrupted")]
    Interrupted,

    #[error("action failed: {0}")]
    Failed(String),

    #[error("no action '{action}' in component '{component}'")]
    NoSuchAction { component: String, action: String },
}

impl ActionError {
    pub fn is_interrupted(&self) -> bool {
        matches!(self, ActionError::Interrupted)
    }
}

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("telemetry sink is closed")]
    Closed,

    #[error("telemetry queue full, event dropped")]
    QueueFull,

    #[error("telemetry sink failure: {0}")]
    Sink(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Loader(#[from] LoaderError),
}
