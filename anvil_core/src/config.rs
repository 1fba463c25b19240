use serde::{Deserialize, Serialize};
use std::{fs, path::Path, time::Duration};

use crate::error::{Error, Result};

/// Engine tuning knobs. Every field has a default so a partial YAML file is
/// enough.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JudgeConfig {
    /// Number of cases judged at once for one submission.
    pub workers: usize,
    pub sample_interval_ms: u64,
    /// Per-stream capture cap in bytes.
    pub output_limit: usize,
    pub kill_grace_ms: u64,
    pub internal_retries: u32,
    /// Stop launching cases after the first failure. Binary scoring only.
    pub short_circuit: bool,
    pub stderr_is_runtime_error: bool,
    /// Also apply RLIMIT_AS at twice the memory limit.
    pub address_space_limit: bool,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            sample_interval_ms: 10,
            output_limit: 64 << 20,
            kill_grace_ms: 500,
            internal_retries: 1,
            short_circuit: false,
            stderr_is_runtime_error: false,
            address_space_limit: false,
        }
    }
}

impl JudgeConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|_| Error::NotFound(path.to_string_lossy().to_string()))?;
        let v: Self = serde_yaml::from_str(&content)?;
        v.check_valid()?;
        Ok(v)
    }

    pub fn check_valid(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::Argument("workers must be at least 1".into()));
        }
        if self.sample_interval_ms == 0 {
            return Err(Error::Argument("sampleIntervalMs must be positive".into()));
        }
        Ok(())
    }

    /// Never zero, whatever the config says.
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms.max(1))
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }
}
