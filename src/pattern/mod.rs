//! Declarative load shapes.
//!
//! A queue is described by two values fixed at schedule time:
//! - [`StartPattern`]: how many threads, how they ramp up, whether the caller
//!   blocks, and the optional per-iteration timeout.
//! - [`ExecutionPattern`]: how long each thread keeps iterating (a fixed count
//!   or a fixed duration) plus the [`Pacing`] between iterations.
//!
//! [`ThreadingPattern`] bundles both, the way a front end ships them.

pub mod distribution;
pub mod threading;

pub use distribution::{even_load, group_sizes};
pub use threading::{NUMBER_THREADS_TOKEN, ThreadingPattern};

use std::time::Duration;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::LoaderError;

/// Inter-iteration delay and time-frame throttling shared by both execution
/// patterns. Intervals are milliseconds, the time frame is seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Pacing {
    #[serde(default)]
    pub interval_ms: u64,
    #[serde(default)]
    pub min_interval_ms: Option<u64>,
    #[serde(default)]
    pub max_interval_ms: Option<u64>,
    #[serde(default)]
    pub executions_per_time_frame: u32,
    #[serde(default)]
    pub time_frame_secs: u64,
}

impl Pacing {
    /// Constant sleep between iterations.
    pub fn constant(interval_ms: u64) -> Self {
        Self {
            interval_ms,
            ..Self::default()
        }
    }

    /// Uniformly random sleep in `[min, max)` between iterations.
    pub fn varying(min_interval_ms: u64, max_interval_ms: u64) -> Self {
        Self {
            min_interval_ms: Some(min_interval_ms),
            max_interval_ms: Some(max_interval_ms),
            ..Self::default()
        }
        .normalized()
    }

    /// Cap all threads together at `executions` iterations per `time_frame_secs`.
    pub fn with_execution_speed(
        mut self,
        time_frame_secs: u64,
        executions: u32,
    ) -> Result<Self, LoaderError> {
        if executions < 1 {
            return Err(LoaderError::InvalidPattern(format!(
                "can't distribute {executions} iterations per time frame"
            )));
        }
        if time_frame_secs < 1 {
            return Err(LoaderError::InvalidPattern(format!(
                "{time_frame_secs} seconds is not a valid time frame"
            )));
        }
        self.executions_per_time_frame = executions;
        self.time_frame_secs = time_frame_secs;
        Ok(self)
    }

    /// Applies the interval rules: a reversed range is swapped, an empty
    /// range collapses into a constant interval, a half-specified range is
    /// dropped.
    pub fn normalized(mut self) -> Self {
        match (self.min_interval_ms, self.max_interval_ms) {
            (Some(min), Some(max)) if min > max => {
                warn!("Switching the provided minimum '{min}' and maximum '{max}' intervals between iterations");
                self.min_interval_ms = Some(max);
                self.max_interval_ms = Some(min);
            }
            (Some(min), Some(max)) if min == max => {
                warn!("Same minimum and maximum interval between iterations: {max}");
                self.interval_ms = min;
                self.min_interval_ms = None;
                self.max_interval_ms = None;
            }
            (Some(_), Some(_)) | (None, None) => {}
            _ => {
                warn!("Ignoring a varying interval with only one bound set");
                self.min_interval_ms = None;
                self.max_interval_ms = None;
            }
        }
        self
    }

    /// The `[min, max)` range when a varying interval is configured.
    pub fn interval_range(&self) -> Option<(u64, u64)> {
        match (self.min_interval_ms, self.max_interval_ms) {
            (Some(min), Some(max)) if min < max => Some((min, max)),
            _ => None,
        }
    }

    pub fn has_rate_limit(&self) -> bool {
        self.executions_per_time_frame > 0 && self.time_frame_secs > 0
    }

    pub fn time_frame(&self) -> Duration {
        Duration::from_secs(self.time_frame_secs)
    }
}

/// How long each worker keeps iterating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionPattern {
    FixedInvocations {
        iterations: u32,
        #[serde(default)]
        pacing: Pacing,
    },
    FixedDuration {
        duration_secs: u64,
        #[serde(default)]
        pacing: Pacing,
    },
}

impl ExecutionPattern {
    pub fn invocations(iterations: u32, pacing: Pacing) -> Self {
        ExecutionPattern::FixedInvocations { iterations, pacing }
    }

    pub fn duration(duration_secs: u64, pacing: Pacing) -> Self {
        ExecutionPattern::FixedDuration {
            duration_secs,
            pacing,
        }
    }

    pub fn pacing(&self) -> &Pacing {
        match self {
            ExecutionPattern::FixedInvocations { pacing, .. }
            | ExecutionPattern::FixedDuration { pacing, .. } => pacing,
        }
    }

    pub fn pacing_mut(&mut self) -> &mut Pacing {
        match self {
            ExecutionPattern::FixedInvocations { pacing, .. }
            | ExecutionPattern::FixedDuration { pacing, .. } => pacing,
        }
    }

    pub fn executions_per_time_frame(&self) -> u32 {
        self.pacing().executions_per_time_frame
    }

    pub fn validate(&self) -> Result<(), LoaderError> {
        match self {
            ExecutionPattern::FixedInvocations { iterations: 0, .. } => Err(
                LoaderError::InvalidPattern("iteration count must be positive".into()),
            ),
            ExecutionPattern::FixedDuration { duration_secs: 0, .. } => Err(
                LoaderError::InvalidPattern("duration must be positive".into()),
            ),
            _ => Ok(()),
        }
    }
}

fn default_threads_per_step() -> u32 {
    1
}

/// Thread population shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartPattern {
    pub thread_count: u32,
    #[serde(default = "default_threads_per_step")]
    pub threads_per_step: u32,
    #[serde(default)]
    pub ramp_up_interval_ms: u64,
    #[serde(default)]
    pub block_until_completion: bool,
    /// Seconds; zero disables the watchdog.
    #[serde(default)]
    pub iteration_timeout_secs: u32,
}

impl StartPattern {
    pub fn all_at_once(thread_count: u32, block_until_completion: bool) -> Self {
        Self {
            thread_count,
            threads_per_step: thread_count.max(1),
            ramp_up_interval_ms: 0,
            block_until_completion,
            iteration_timeout_secs: 0,
        }
    }

    pub fn ramp_up(
        thread_count: u32,
        threads_per_step: u32,
        ramp_up_interval_ms: u64,
        block_until_completion: bool,
    ) -> Self {
        Self {
            thread_count,
            threads_per_step,
            ramp_up_interval_ms,
            block_until_completion,
            iteration_timeout_secs: 0,
        }
    }

    pub fn ramp_up_interval(&self) -> Duration {
        Duration::from_millis(self.ramp_up_interval_ms)
    }

    pub fn iteration_timeout(&self) -> Option<Duration> {
        (self.iteration_timeout_secs > 0)
            .then(|| Duration::from_secs(u64::from(self.iteration_timeout_secs)))
    }

    pub fn validate(&self) -> Result<(), LoaderError> {
        if self.thread_count == 0 {
            return Err(LoaderError::InvalidPattern(
                "thread count must be a positive integer".into(),
            ));
        }
        if self.ramp_up_interval_ms > 0 {
            if self.threads_per_step == 0 {
                return Err(LoaderError::InvalidPattern(
                    "thread count per step must be a positive integer".into(),
                ));
            }
            if self.threads_per_step > self.thread_count {
                return Err(LoaderError::InvalidPattern(format!(
                    "thread count per step ({}) exceeds the total thread count ({})",
                    self.threads_per_step, self.thread_count
                )));
            }
        }
        Ok(())
    }

    /// Sizes of the launch groups, in launch order.
    pub fn group_sizes(&self) -> Vec<u32> {
        group_sizes(
            self.thread_count,
            self.threads_per_step,
            self.ramp_up_interval_ms,
        )
    }
}
