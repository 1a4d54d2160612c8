// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 trainflow contributors

//! Configuration loading
//!
//! Loads orchestrator settings from `trainflow.toml`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::{TrainflowError, TrainflowResult};

/// Default configuration file name, looked up in the working directory
pub const CONFIG_FILE: &str = "trainflow.toml";

/// Orchestrator settings from trainflow.toml
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Root of the filesystem artifact store
    #[serde(default = "default_workspace")]
    pub workspace: PathBuf,

    /// How often running steps are polled, in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Maximum number of steps in flight at once
    #[serde(default)]
    pub max_concurrency: Option<usize>,

    /// Cache configuration
    #[serde(default)]
    pub cache: CacheSettings,
}

fn default_workspace() -> PathBuf {
    PathBuf::from(".trainflow")
}

fn default_poll_interval_ms() -> u64 {
    500
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            workspace: default_workspace(),
            poll_interval_ms: default_poll_interval_ms(),
            max_concurrency: None,
            cache: CacheSettings::default(),
        }
    }
}

/// Cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Enable the step cache
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Cache directory
    #[serde(default = "default_cache_dir")]
    pub directory: PathBuf,

    /// Lifetime of entries for steps without their own `expire_after`
    #[serde(default = "default_expire_after")]
    pub default_expire_after: String,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: default_cache_dir(),
            default_expire_after: default_expire_after(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".trainflow/cache")
}

fn default_expire_after() -> String {
    "30d".to_string()
}

impl Settings {
    /// Load settings from an explicit file, or from `trainflow.toml` if present
    pub fn load(path: Option<&Path>) -> TrainflowResult<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let default_path = Path::new(CONFIG_FILE);
                if default_path.exists() {
                    Self::from_file(default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Load settings from a TOML file
    pub fn from_file(path: &Path) -> TrainflowResult<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| TrainflowError::FileReadError {
                path: path.to_path_buf(),
                error: e.to_string(),
            })?;

        let settings = Self::from_toml(&content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings from a TOML string
    pub fn from_toml(toml: &str) -> TrainflowResult<Self> {
        toml::from_str(toml).map_err(Into::into)
    }

    fn validate(&self) -> TrainflowResult<()> {
        if self.poll_interval_ms == 0 {
            return Err(TrainflowError::InvalidConfig {
                message: "poll_interval_ms must be greater than zero".into(),
            });
        }

        if self.max_concurrency == Some(0) {
            return Err(TrainflowError::InvalidConfig {
                message: "max_concurrency must be at least 1".into(),
            });
        }

        self.default_ttl().map(|_| ())
    }

    /// Poll interval as a duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Default cache entry lifetime
    pub fn default_ttl(&self) -> TrainflowResult<Duration> {
        parse_duration(&self.cache.default_expire_after).map_err(|reason| {
            TrainflowError::InvalidConfig {
                message: format!("cache.default_expire_after: {}", reason),
            }
        })
    }
}

/// Parse a duration written as `<n><unit>`, unit one of s, m, h, d, w
pub fn parse_duration(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| format!("'{}' has no unit (expected s, m, h, d or w)", raw))?;

    let (digits, unit) = raw.split_at(split);
    let amount: u64 = digits
        .parse()
        .map_err(|_| format!("'{}' does not start with a number", raw))?;

    let seconds = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        "d" => 24 * 60 * 60,
        "w" => 7 * 24 * 60 * 60,
        other => return Err(format!("unknown duration unit '{}' in '{}'", other, raw)),
    };

    amount
        .checked_mul(seconds)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("'{}' is too long", raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("30d"), Ok(Duration::from_secs(30 * 86_400)));
        assert_eq!(parse_duration("90s"), Ok(Duration::from_secs(90)));
        assert_eq!(parse_duration(" 2h "), Ok(Duration::from_secs(7_200)));
        assert_eq!(parse_duration("1w"), Ok(Duration::from_secs(604_800)));
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert!(parse_duration("30").is_err());
        assert!(parse_duration("d").is_err());
        assert!(parse_duration("3y").is_err());
        assert!(parse_duration("99999999999999999w").is_err());
    }

    #[test]
    fn test_settings_defaults() {
        let settings = Settings::from_toml("").unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.poll_interval(), Duration::from_millis(500));
        assert!(settings.cache.enabled);
        assert_eq!(
            settings.default_ttl().unwrap(),
            Duration::from_secs(30 * 86_400)
        );
    }

    #[test]
    fn test_settings_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(
            &path,
            r#"
workspace = "/tmp/tf"
poll_interval_ms = 50
max_concurrency = 4

[cache]
enabled = false
default_expire_after = "12h"
"#,
        )
        .unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.workspace, PathBuf::from("/tmp/tf"));
        assert_eq!(settings.max_concurrency, Some(4));
        assert!(!settings.cache.enabled);
        assert_eq!(settings.default_ttl().unwrap(), Duration::from_secs(43_200));
    }

    #[test]
    fn test_settings_rejects_zero_poll_interval() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "poll_interval_ms = 0\n").unwrap();

        assert!(matches!(
            Settings::load(Some(&path)),
            Err(TrainflowError::InvalidConfig { .. })
        ));
    }
}
