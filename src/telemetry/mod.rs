//! Checkpoint telemetry consumed by worker tasks.
//!
//! Sinks receive checkpoint start/end/insert events keyed by action name plus
//! a per-iteration queue execution time. Sink failures are logged by the
//! caller and never abort a queue.

pub mod csv_sink;
pub mod statistics;

use std::{
    fmt,
    time::{SystemTime, UNIX_EPOCH},
};

use log::{debug, error};
use serde::Serialize;

use crate::{error::TelemetryError, threading::WorkerId};

pub use csv_sink::CsvCheckpointSink;
pub use statistics::ExecutionStatistics;

/// Aggregate checkpoint for one full pass over the action list.
pub const QUEUE_EXECUTION_TIME: &str = "Queue execution time";
/// Checkpoint recorded for every varying sleep between iterations.
pub const TIME_BETWEEN_ITERATIONS: &str = "[Time between queue executions]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CheckpointResult {
    Passed,
    Failed,
}

impl fmt::Display for CheckpointResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckpointResult::Passed => f.write_str("PASSED"),
            CheckpointResult::Failed => f.write_str("FAILED"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint<'a> {
    pub queue: &'a str,
    pub worker: WorkerId,
    pub name: &'a str,
    /// Milliseconds since the epoch at which the measured span started.
    pub timestamp_ms: u64,
    pub response_ms: u64,
    pub transfer_size: u64,
    pub transfer_unit: Option<&'a str>,
    pub result: CheckpointResult,
}

impl<'a> Checkpoint<'a> {
    pub fn new(queue: &'a str, worker: WorkerId, name: &'a str) -> Self {
        Self {
            queue,
            worker,
            name,
            timestamp_ms: epoch_millis(),
            response_ms: 0,
            transfer_size: 0,
            transfer_unit: None,
            result: CheckpointResult::Passed,
        }
    }
}

pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

pub trait TelemetrySink: Send + Sync {
    /// Batch sinks get one `insert_checkpoint` per action instead of a
    /// start/end pair.
    fn is_batch_mode(&self) -> bool {
        false
    }

    fn start_checkpoint(&self, checkpoint: &Checkpoint<'_>) -> Result<(), TelemetryError>;

    fn end_checkpoint(&self, checkpoint: &Checkpoint<'_>) -> Result<(), TelemetryError>;

    fn insert_checkpoint(&self, checkpoint: &Checkpoint<'_>) -> Result<(), TelemetryError>;

    fn queue_execution_time(&self, checkpoint: &Checkpoint<'_>) -> Result<(), TelemetryError> {
        self.insert_checkpoint(checkpoint)
    }
}

/// Log and swallow a sink failure.
pub fn report(result: Result<(), TelemetryError>) {
    if let Err(e) = result {
        error!("Checkpoint telemetry failed: {e}");
    }
}

/// Writes every event to the `debug` log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl TelemetrySink for LogSink {
    fn start_checkpoint(&self, c: &Checkpoint<'_>) -> Result<(), TelemetryError> {
        debug!("[{}] {} start checkpoint '{}'", c.queue, c.worker, c.name);
        Ok(())
    }

    fn end_checkpoint(&self, c: &Checkpoint<'_>) -> Result<(), TelemetryError> {
        debug!(
            "[{}] {} end checkpoint '{}' {} in {} ms",
            c.queue, c.worker, c.name, c.result, c.response_ms
        );
        Ok(())
    }

    fn insert_checkpoint(&self, c: &Checkpoint<'_>) -> Result<(), TelemetryError> {
        debug!(
            "[{}] {} checkpoint '{}' {} in {} ms",
            c.queue, c.worker, c.name, c.result, c.response_ms
        );
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl TelemetrySink for NullSink {
    fn start_checkpoint(&self, _: &Checkpoint<'_>) -> Result<(), TelemetryError> {
        Ok(())
    }

    fn end_checkpoint(&self, _: &Checkpoint<'_>) -> Result<(), TelemetryError> {
        Ok(())
    }

    fn insert_checkpoint(&self, _: &Checkpoint<'_>) -> Result<(), TelemetryError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_result_display() {
        assert_eq!(CheckpointResult::Passed.to_string(), "PASSED");
        assert_eq!(CheckpointResult::Failed.to_string(), "FAILED");
    }

    #[test]
    fn test_default_queue_time_goes_through_insert() {
        struct Failing;
        impl TelemetrySink for Failing {
            fn start_checkpoint(&self, _: &Checkpoint<'_>) -> Result<(), TelemetryError> {
                Ok(())
            }
            fn end_checkpoint(&self, _: &Checkpoint<'_>) -> Result<(), TelemetryError> {
                Ok(())
            }
            fn insert_checkpoint(&self, _: &Checkpoint<'_>) -> Result<(), TelemetryError> {
                Err(TelemetryError::Sink("disk full".into()))
            }
        }
        let checkpoint = Checkpoint::new("q", WorkerId(0), QUEUE_EXECUTION_TIME);
        assert!(Failing.queue_execution_time(&checkpoint).is_err());
        // swallowed
        report(Failing.queue_execution_time(&checkpoint));
    }
}
