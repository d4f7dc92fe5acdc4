//! ThreadingPattern: the start and execution patterns travelling together,
//! with the human-readable description and multi-host distribution.

use log::warn;
use serde::{Deserialize, Serialize};

use super::{ExecutionPattern, Pacing, StartPattern, distribution::even_load};
use crate::error::LoaderError;

/// Placeholder put in descriptions instead of the per-host thread count, so
/// the total across hosts can be substituted by whoever aggregates them.
pub const NUMBER_THREADS_TOKEN: &str = "<number_threads>";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThreadingPattern {
    pub start: StartPattern,
    pub execution: ExecutionPattern,
    /// Queue passes if at least this percentage of action invocations pass.
    #[serde(default)]
    pub pass_rate_percent: f32,
}

impl ThreadingPattern {
    pub fn new(start: StartPattern, execution: ExecutionPattern) -> Self {
        Self {
            start,
            execution,
            pass_rate_percent: 0.0,
        }
    }

    pub fn all_at_once(
        thread_count: u32,
        block_until_completion: bool,
        iterations: u32,
        interval_ms: u64,
    ) -> Self {
        Self::new(
            StartPattern::all_at_once(thread_count, block_until_completion),
            ExecutionPattern::invocations(iterations, Pacing::constant(interval_ms)),
        )
    }

    pub fn ramp_up(
        thread_count: u32,
        block_until_completion: bool,
        iterations: u32,
        interval_ms: u64,
        ramp_up_interval_ms: u64,
        threads_per_step: u32,
    ) -> Self {
        Self::new(
            StartPattern::ramp_up(
                thread_count,
                threads_per_step,
                ramp_up_interval_ms,
                block_until_completion,
            ),
            ExecutionPattern::invocations(iterations, Pacing::constant(interval_ms)),
        )
    }

    pub fn fixed_duration_all_at_once(
        thread_count: u32,
        block_until_completion: bool,
        duration_secs: u64,
        interval_ms: u64,
    ) -> Self {
        Self::new(
            StartPattern::all_at_once(thread_count, block_until_completion),
            ExecutionPattern::duration(duration_secs, Pacing::constant(interval_ms)),
        )
    }

    pub fn fixed_duration_ramp_up(
        thread_count: u32,
        block_until_completion: bool,
        duration_secs: u64,
        interval_ms: u64,
        ramp_up_interval_ms: u64,
        threads_per_step: u32,
    ) -> Self {
        Self::new(
            StartPattern::ramp_up(
                thread_count,
                threads_per_step,
                ramp_up_interval_ms,
                block_until_completion,
            ),
            ExecutionPattern::duration(duration_secs, Pacing::constant(interval_ms)),
        )
    }

    /// Replace the constant interval with a varying `[min, max)` one.
    pub fn with_interval_range(mut self, min_interval_ms: u64, max_interval_ms: u64) -> Self {
        let pacing = self.execution.pacing_mut();
        let varying = Pacing::varying(min_interval_ms, max_interval_ms);
        pacing.interval_ms = varying.interval_ms;
        pacing.min_interval_ms = varying.min_interval_ms;
        pacing.max_interval_ms = varying.max_interval_ms;
        self
    }

    pub fn with_execution_speed(
        mut self,
        time_frame_secs: u64,
        executions_per_time_frame: u32,
    ) -> Result<Self, LoaderError> {
        let pacing = self.execution.pacing_mut();
        *pacing = pacing.with_execution_speed(time_frame_secs, executions_per_time_frame)?;
        Ok(self)
    }

    pub fn with_iteration_timeout(mut self, timeout_secs: u32) -> Self {
        self.start.iteration_timeout_secs = timeout_secs;
        self
    }

    pub fn with_pass_rate(mut self, percent: f32) -> Result<Self, LoaderError> {
        if !(0.0..=100.0).contains(&percent) {
            return Err(LoaderError::InvalidPattern(format!(
                "queue pass rate {percent} must be a number between 0 and 100"
            )));
        }
        self.pass_rate_percent = percent;
        Ok(self)
    }

    pub fn thread_count(&self) -> u32 {
        self.start.thread_count
    }

    pub fn validate(&self) -> Result<(), LoaderError> {
        self.start.validate()?;
        self.execution.validate()
    }

    pub fn description(&self) -> String {
        let start = &self.start;
        let mut description = if start.ramp_up_interval_ms > 0 {
            format!(
                "Ramp up - {NUMBER_THREADS_TOKEN} total threads, {} threads every {} ms",
                start.threads_per_step, start.ramp_up_interval_ms
            )
        } else {
            format!("All at once - {NUMBER_THREADS_TOKEN} threads")
        };

        let pacing = self.execution.pacing();
        match self.execution {
            ExecutionPattern::FixedInvocations { iterations, .. } => {
                description.push_str(&format!(", {iterations}"));
                if let Some((min, max)) = pacing.interval_range() {
                    description.push_str(&format!(
                        " iterations with {min} to {max} ms varying interval"
                    ));
                } else if pacing.interval_ms > 0 {
                    description.push_str(&format!(
                        " iterations with {} ms interval",
                        pacing.interval_ms
                    ));
                } else {
                    description.push_str(" continuous iterations");
                }
            }
            ExecutionPattern::FixedDuration { duration_secs, .. } => {
                description.push_str(&format!(", {duration_secs} secs duration"));
                if let Some((min, max)) = pacing.interval_range() {
                    description.push_str(&format!(", {min} to {max} ms varying interval"));
                } else if pacing.interval_ms > 0 {
                    description.push_str(&format!(", {} ms interval", pacing.interval_ms));
                }
            }
        }
        if pacing.has_rate_limit() {
            description.push_str(&format!(
                ", {} iterations per {} secs",
                pacing.executions_per_time_frame, pacing.time_frame_secs
            ));
        }
        if start.iteration_timeout_secs > 0 {
            description.push_str(&format!(
                ", {} secs iteration timeout",
                start.iteration_timeout_secs
            ));
        }
        if self.pass_rate_percent > 0.0 {
            description.push_str(&format!(
                ", pass if {}% of the iterations pass",
                self.pass_rate_percent
            ));
        }
        description
    }

    /// Split this pattern across `hosts` agents. Falls back to a single host
    /// when there is not enough work to give every host a share.
    pub fn distribute(&self, hosts: u32) -> Result<Vec<ThreadingPattern>, LoaderError> {
        if hosts == 0 {
            return Err(LoaderError::InvalidPattern(
                "cannot distribute a pattern over zero hosts".into(),
            ));
        }
        let threads = self.start.thread_count;
        let pacing = *self.execution.pacing();

        if threads < hosts {
            warn!("Cannot distribute just {threads} threads on {hosts} hosts, all work will be done by one host");
            return Ok(vec![*self]);
        }
        if pacing.has_rate_limit() && pacing.executions_per_time_frame < hosts {
            warn!(
                "Cannot distribute just {} iterations per time frame on {hosts} hosts, all work will be done by one host",
                pacing.executions_per_time_frame
            );
            return Ok(vec![*self]);
        }

        let ramping = self.start.ramp_up_interval_ms > 0;
        if ramping && self.start.threads_per_step < hosts {
            return Err(LoaderError::InvalidPattern(format!(
                "the thread count per step [{}] must be at least as much as the number of agents [{hosts}]",
                self.start.threads_per_step
            )));
        }

        let thread_shares = even_load(threads, hosts);
        let step_shares = even_load(self.start.threads_per_step, hosts);
        let quota_shares = even_load(pacing.executions_per_time_frame, hosts);

        let patterns = (0..hosts as usize)
            .map(|i| {
                let mut pattern = *self;
                pattern.start.thread_count = thread_shares[i];
                pattern.start.threads_per_step = if ramping {
                    step_shares[i]
                } else {
                    thread_shares[i]
                };
                if pacing.has_rate_limit() {
                    pattern.execution.pacing_mut().executions_per_time_frame = quota_shares[i];
                }
                pattern
            })
            .collect();
        Ok(patterns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ramp_up_description() {
        let pattern = ThreadingPattern::ramp_up(10, false, 5, 0, 500, 3)
            .with_iteration_timeout(20);
        assert_eq!(
            pattern.description(),
            "Ramp up - <number_threads> total threads, 3 threads every 500 ms, 5 continuous iterations, 20 secs iteration timeout"
        );
    }

    #[test]
    fn test_fixed_duration_description_with_range_and_speed() {
        let pattern = ThreadingPattern::fixed_duration_all_at_once(4, true, 60, 0)
            .with_interval_range(100, 300)
            .with_execution_speed(10, 40)
            .unwrap();
        assert_eq!(
            pattern.description(),
            "All at once - <number_threads> threads, 60 secs duration, 100 to 300 ms varying interval, 40 iterations per 10 secs"
        );
    }

    #[test]
    fn test_distribute_splits_threads_steps_and_quota() {
        let pattern = ThreadingPattern::ramp_up(10, false, 5, 0, 500, 4)
            .with_execution_speed(5, 21)
            .unwrap();
        let parts = pattern.distribute(2).unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].start.thread_count, 5);
        assert_eq!(parts[1].start.thread_count, 5);
        assert_eq!(parts[0].start.threads_per_step, 2);
        assert_eq!(parts[0].execution.executions_per_time_frame(), 11);
        assert_eq!(parts[1].execution.executions_per_time_frame(), 10);
    }

    #[test]
    fn test_distribute_falls_back_to_one_host() {
        let pattern = ThreadingPattern::all_at_once(2, false, 1, 0);
        let parts = pattern.distribute(3).unwrap();
        assert_eq!(parts, vec![pattern]);
    }

    #[test]
    fn test_distribute_rejects_small_step() {
        let pattern = ThreadingPattern::ramp_up(10, false, 1, 0, 100, 2);
        assert!(pattern.distribute(3).is_err());
    }

    #[test]
    fn test_pass_rate_bounds() {
        let pattern = ThreadingPattern::all_at_once(1, false, 1, 0);
        assert!(pattern.with_pass_rate(101.0).is_err());
        assert!(pattern.with_pass_rate(-1.0).is_err());
        assert_eq!(pattern.with_pass_rate(75.0).unwrap().pass_rate_percent, 75.0);
    }
}
