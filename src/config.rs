//! Engine and queue definition configuration, loaded from YAML.

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{
    action::{ActionRequest, data::DataProviderDefinition, simulated::SimulatedConfig},
    error::ConfigError,
    pattern::ThreadingPattern,
};

/// Engine-wide knobs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Watchdog sleep slice in milliseconds
    #[serde(default = "default_watchdog_poll_ms")]
    pub watchdog_poll_ms: u64,

    /// Name worker threads `<queue>-w<id>`
    #[serde(default = "default_name_worker_threads")]
    pub name_worker_threads: bool,

    /// Write checkpoints to this CSV file instead of the debug log
    #[serde(default)]
    pub checkpoint_csv: Option<PathBuf>,

    /// Send one insert per action instead of start/end pairs
    #[serde(default)]
    pub checkpoint_batch_mode: bool,
}

fn default_watchdog_poll_ms() -> u64 {
    1000
}

fn default_name_worker_threads() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            watchdog_poll_ms: default_watchdog_poll_ms(),
            name_worker_threads: default_name_worker_threads(),
            checkpoint_csv: None,
            checkpoint_batch_mode: false,
        }
    }
}

impl EngineConfig {
    pub fn watchdog_poll(&self) -> Duration {
        Duration::from_millis(self.watchdog_poll_ms)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        from_yaml_str(&read(path.as_ref())?)
    }
}

/// A complete queue as shipped by a front end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueDefinition {
    pub name: String,
    pub pattern: ThreadingPattern,
    #[serde(default)]
    pub synchronized_iterations: bool,
    pub actions: Vec<ActionRequest>,
    #[serde(default)]
    pub data_providers: Vec<DataProviderDefinition>,
    /// Behaviour of the built-in `simulated` component
    #[serde(default)]
    pub simulated: SimulatedConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

impl QueueDefinition {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::from_yaml_str(&read(path.as_ref())?)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let definition: Self = from_yaml_str(yaml)?;
        definition.pattern.validate()?;
        Ok(definition)
    }
}

fn read(path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })
}

fn from_yaml_str<T: serde::de::DeserializeOwned>(yaml: &str) -> Result<T, ConfigError> {
    Ok(serde_yaml::from_str(yaml)?)
}
