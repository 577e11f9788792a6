use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Per-submission settings.
///
/// Every field has a default, so a JSON config only needs to name what it
/// changes:
///
/// ```
/// use tuplecrab_core::config::JobConfig;
///
/// let config = JobConfig::from_json(r#"{ "instrument_counters": true }"#).unwrap();
/// assert!(config.instrument_counters);
/// assert_eq!(config.action_timeout_ms, 10_000);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    /// Job name; defaults to `<topology>_<job id>`.
    pub job_name: Option<String>,
    /// How long INITIALIZE or START may run before it is logged as slow.
    /// Twice this is the default wait for a job to start.
    pub action_timeout_ms: u64,
    /// How long callers wait for a CLOSE to complete.
    pub close_timeout_ms: u64,
    /// Splice a tuple counter after every connected output port.
    pub instrument_counters: bool,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            job_name: None,
            action_timeout_ms: 10_000,
            close_timeout_ms: 10_000,
            instrument_counters: false,
        }
    }
}

impl JobConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("invalid job config")
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read job config {}", path.display()))?;
        Self::from_json(&json)
    }

    pub fn with_job_name(mut self, name: impl Into<String>) -> Self {
        self.job_name = Some(name.into());
        self
    }

    pub fn action_timeout(&self) -> Duration {
        Duration::from_millis(self.action_timeout_ms)
    }

    /// Default wait for a submitted job to reach RUNNING.
    pub fn start_timeout(&self) -> Duration {
        self.action_timeout() * 2
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
