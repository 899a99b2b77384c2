//! Configuration management for wlharness

use crate::error::{HarnessError, HarnessResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main harness configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Filesystem paths
    pub paths: ConfigPaths,
    /// Default run settings
    pub defaults: RunDefaults,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigPaths {
    /// Directory rendered reports are written to
    #[serde(default = "default_report_dir")]
    pub report_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunDefaults {
    /// Hard timeout applied when a run does not specify one (milliseconds)
    #[serde(default = "default_hard_timeout_ms")]
    pub hard_timeout_ms: u64,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_report_dir() -> PathBuf {
    PathBuf::from("/var/log/wlharness")
}

fn default_hard_timeout_ms() -> u64 {
    // Observed suite timeouts range 1-20 s depending on scenario
    10_000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            paths: ConfigPaths {
                report_dir: default_report_dir(),
            },
            defaults: RunDefaults {
                hard_timeout_ms: default_hard_timeout_ms(),
                log_level: default_log_level(),
            },
        }
    }
}

impl HarnessConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> HarnessResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| HarnessError::Config(format!("Failed to read config: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| HarnessError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> HarnessResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| HarnessError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path.as_ref(), content)
            .map_err(|e| HarnessError::Config(format!("Failed to write config: {}", e)))?;

        Ok(())
    }

    /// Ensure the report directory exists
    pub fn ensure_directories(&self) -> HarnessResult<()> {
        std::fs::create_dir_all(&self.paths.report_dir).map_err(|e| {
            HarnessError::Config(format!(
                "Failed to create directory {:?}: {}",
                self.paths.report_dir, e
            ))
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HarnessConfig::default();
        assert_eq!(config.defaults.hard_timeout_ms, 10_000);
        assert_eq!(config.defaults.log_level, "info");
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wlharness.toml");

        let mut config = HarnessConfig::default();
        config.defaults.hard_timeout_ms = 5_000;
        config.save(&path).unwrap();

        let loaded = HarnessConfig::load(&path).unwrap();
        assert_eq!(loaded.defaults.hard_timeout_ms, 5_000);
        assert_eq!(loaded.defaults.log_level, "info");
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.toml");
        std::fs::write(&path, "[paths]\n[defaults]\nlog_level = \"debug\"\n").unwrap();

        let loaded = HarnessConfig::load(&path).unwrap();
        assert_eq!(loaded.defaults.hard_timeout_ms, 10_000);
        assert_eq!(loaded.defaults.log_level, "debug");
    }
}
