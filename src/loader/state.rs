//! state.rs
//! Queue lifecycle states.

use std::fmt;

use serde::Serialize;

/// NOT_STARTED -> SCHEDULED -> RUNNING <-> PAUSED -> FINISHED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueState {
    NotStarted,
    Scheduled,
    Running,
    Paused,
    Finished,
}

impl QueueState {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueState::NotStarted => "NOT_STARTED",
            QueueState::Scheduled => "SCHEDULED",
            QueueState::Running => "RUNNING",
            QueueState::Paused => "PAUSED",
            QueueState::Finished => "FINISHED",
        }
    }

    /// Started and not yet finished.
    pub fn is_in_progress(&self) -> bool {
        matches!(self, QueueState::Running | QueueState::Paused)
    }
}

impl fmt::Display for QueueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
