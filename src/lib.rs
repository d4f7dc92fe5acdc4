//! # load_queue
//!
//! Execution core of a load-test agent: drives a population of worker threads
//! through repeated invocations of an action list, ramping them up in groups,
//! optionally holding them in lock-step rounds, timing out stuck iterations,
//! and reporting a single queue-level lifecycle
//! (NOT_STARTED → SCHEDULED → RUNNING ⇄ PAUSED → FINISHED).
//!
//! ## Layout
//! - `pattern`: start/execution patterns and their pacing rules.
//! - `threading`: iteration gate, timeout watchdog, worker task, task factory.
//! - `loader`: the ramp-up orchestrator, listeners, the per-caller handler.
//! - `action`: contracts for the work itself plus a simulated component.
//! - `telemetry`: checkpoint sinks and per-queue statistics.
//! - `config`: YAML engine and queue definitions.

pub mod action;
pub mod config;
pub mod error;
pub mod loader;
pub mod pattern;
pub mod telemetry;
pub mod threading;

pub use error::{ActionError, ConfigError, LoaderError, TelemetryError};
pub use loader::{
    HandlerRegistry, QueueHandler, QueueListener, QueueLoader, QueueState, RampUpQueueLoader,
};
pub use pattern::{ExecutionPattern, Pacing, StartPattern, ThreadingPattern};
