//! Engine configuration.

use serde::Deserialize;
use std::time::Duration;

/// Maximum number of live jobs when nothing else is configured.
pub const DEFAULT_MAX_JOBS: usize = 16;

/// Settings for [`crate::JobControl`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JobControlConfig {
    /// Capacity of the job table
    pub max_jobs: usize,
    /// Upper bound on how long the foreground waiter sleeps between re-checks
    pub foreground_recheck_ms: u64,
}

impl Default for JobControlConfig {
    fn default() -> Self {
        Self {
            max_jobs: DEFAULT_MAX_JOBS,
            foreground_recheck_ms: 1000,
        }
    }
}

impl JobControlConfig {
    pub fn foreground_recheck(&self) -> Duration {
        Duration::from_millis(self.foreground_recheck_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = JobControlConfig::default();
        assert_eq!(config.max_jobs, 16);
        assert_eq!(config.foreground_recheck(), Duration::from_secs(1));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: JobControlConfig = toml::from_str("max_jobs = 4").unwrap();
        assert_eq!(config.max_jobs, 4);
        assert_eq!(config.foreground_recheck_ms, 1000);
    }

    #[test]
    fn test_zero_recheck_is_clamped() {
        let config = JobControlConfig {
            foreground_recheck_ms: 0,
            ..Default::default()
        };
        assert_eq!(config.foreground_recheck(), Duration::from_millis(1));
    }
}
