//! simulated.rs
//! A stand-in action component for demos and benches.
//! - `transfer`: busy for a random latency, occasionally fails, reports bytes
//! - `hang`: blocks until interrupted (exercises the iteration timeout)
//! - `fail`: always fails
//!
//! Latency is slept in short spin_sleep slices so an interrupt is noticed
//! within one slice.

use std::time::{Duration, Instant};

use rand::random_range;
use serde::{Deserialize, Serialize};
use spin_sleep::{SpinSleeper, SpinStrategy};

use super::{Action, ActionOutput, ArgumentValue, InvocationContext};
use crate::error::ActionError;

pub const COMPONENT: &str = "simulated";

const SLICE: Duration = Duration::from_millis(5);

fn default_min_latency() -> u64 {
    5
}

fn default_max_latency() -> u64 {
    20
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimulatedConfig {
    #[serde(default = "default_min_latency")]
    pub min_latency_ms: u64,
    #[serde(default = "default_max_latency")]
    pub max_latency_ms: u64,
    /// Chance, in percent, that a `transfer` fails.
    #[serde(default)]
    pub failure_percent: u32,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            min_latency_ms: default_min_latency(),
            max_latency_ms: default_max_latency(),
            failure_percent: 0,
        }
    }
}

pub struct SimulatedAction {
    config: SimulatedConfig,
    sleeper: SpinSleeper,
}

impl SimulatedAction {
    pub fn new(config: SimulatedConfig) -> Self {
        Self {
            config,
            sleeper: SpinSleeper::new(100_000).with_spin_strategy(SpinStrategy::YieldThread),
        }
    }

    fn busy(&self, duration: Duration, ctx: &InvocationContext<'_>) -> Result<(), ActionError> {
        // None: too long to represent, busy until interrupted
        let deadline = Instant::now().checked_add(duration);
        loop {
            ctx.check_interrupted()?;
            let now = Instant::now();
            let slice = match deadline {
                Some(deadline) if now >= deadline => return Ok(()),
                Some(deadline) => (deadline - now).min(SLICE),
                None => SLICE,
            };
            self.sleeper.sleep(slice);
        }
    }

    fn latency(&self, arguments: &[ArgumentValue]) -> Duration {
        let fixed = arguments
            .iter()
            .find(|a| a.name == "latency_ms")
            .and_then(|a| a.value.parse::<u64>().ok());
        let ms = match fixed {
            Some(ms) => ms,
            None if self.config.max_latency_ms > self.config.min_latency_ms => {
                random_range(self.config.min_latency_ms..self.config.max_latency_ms)
            }
            None => self.config.min_latency_ms,
        };
        Duration::from_millis(ms)
    }
}

impl Action for SimulatedAction {
    fn invoke(
        &mut self,
        action: &str,
        arguments: &[ArgumentValue],
        ctx: &InvocationContext<'_>,
    ) -> Result<ActionOutput, ActionError> {
        match action {
            "transfer" => {
                self.busy(self.latency(arguments), ctx)?;
                if self.config.failure_percent > 0
                    && random_range(0..100) < self.config.failure_percent
                {
                    return Err(ActionError::Failed(format!(
                        "simulated failure in iteration {} of worker {}",
                        ctx.iteration(),
                        ctx.worker()
                    )));
                }
                Ok(ActionOutput {
                    transfer_size: random_range(512..4096),
                })
            }
            "hang" => loop {
                ctx.sleep(Duration::from_secs(1))?;
            },
            "fail" => Err(ActionError::Failed("requested failure".into())),
            other => Err(ActionError::NoSuchAction {
                component: COMPONENT.into(),
                action: other.into(),
            }),
        }
    }
}

/// Factory closure producing `SimulatedAction`s for the `simulated`
/// component and refusing everything else.
pub fn simulated_factory(
    config: SimulatedConfig,
) -> impl Fn(&str) -> Result<Box<dyn Action>, ActionError> + Send + Sync {
    move |component: &str| {
        if component == COMPONENT {
            Ok(Box::new(SimulatedAction::new(config)) as Box<dyn Action>)
        } else {
            Err(ActionError::Failed(format!("unknown component '{component}'")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{action::ActionFactory, threading::{WorkerId, signal::Signal}};

    #[test]
    fn test_transfer_respects_fixed_latency() {
        let mut action = SimulatedAction::new(SimulatedConfig::default());
        let signal = Signal::new();
        let ctx = InvocationContext::new(WorkerId(0), 1, &signal);
        let started = Instant::now();
        let output = action
            .invoke("transfer", &[ArgumentValue::new("latency_ms", "30")], &ctx)
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(30));
        assert!(output.transfer_size >= 512);
    }

    #[test]
    fn test_interrupted_transfer_returns_quickly() {
        let mut action = SimulatedAction::new(SimulatedConfig::default());
        let signal = Signal::new();
        signal.interrupt();
        let ctx = InvocationContext::new(WorkerId(0), 1, &signal);
        let result = action.invoke("hang", &[], &ctx);
        assert_eq!(result, Err(ActionError::Interrupted));
    }

    #[test]
    fn test_unknown_action_and_component() {
        let factory = simulated_factory(SimulatedConfig::default());
        assert!(factory.create("nope").is_err());
        let mut action = factory.create(COMPONENT).unwrap();
        let signal = Signal::new();
        let ctx = InvocationContext::new(WorkerId(0), 1, &signal);
        assert!(matches!(
            action.invoke("dance", &[], &ctx),
            Err(ActionError::NoSuchAction { .. })
        ));
    }
}
