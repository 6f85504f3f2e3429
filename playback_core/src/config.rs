//! Playback configuration
//!
//! Settings are read from a TOML file. Missing keys fall back to their
//! defaults so a partial file is always accepted.

use crate::error::{PlaybackError, PlaybackResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory under the user's home holding playback state
const CONFIG_DIR: &str = ".playback";

/// Default configuration file name
const CONFIG_FILE: &str = "config.toml";

/// Runtime configuration for clock, emitters and loader
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Milliseconds between clock ticks
    pub tick_period_ms: u64,
    /// Upper bound on a single emitter wait before it re-checks the clock
    pub max_sleep_ms: u64,
    /// Initial playback rate (1.0 = real time)
    pub rate: f64,
    /// Jump back to the region start when playback passes the region end
    pub region_loop: bool,
    /// Maximum number of files parsed at once (None = one worker per file)
    pub max_concurrent_loads: Option<usize>,
    /// Subscriber count reported by the logging publisher
    pub subscriber_count: usize,
    /// Suffix appended to every published channel name
    pub channel_suffix: String,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            tick_period_ms: 100,
            max_sleep_ms: 100,
            rate: 1.0,
            region_loop: false,
            max_concurrent_loads: None,
            subscriber_count: 1,
            channel_suffix: String::new(),
        }
    }
}

impl PlaybackConfig {
    /// Default location of the user configuration file
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(CONFIG_DIR)
            .join(CONFIG_FILE)
    }

    /// Load from an explicit file
    pub fn load(path: &Path) -> PlaybackResult<Self> {
        let content = fs::read_to_string(path)?;
        let config: PlaybackConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the user configuration, or defaults when none exists
    pub fn load_or_default(path: Option<&Path>) -> PlaybackResult<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let path = Self::default_path();
                if path.exists() {
                    Self::load(&path)
                } else {
                    log::debug!("no config at {}, using defaults", path.display());
                    Ok(Self::default())
                }
            }
        }
    }

    /// Save to file, creating parent directories
    pub fn save(&self, path: &Path) -> PlaybackResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> PlaybackResult<()> {
        if !(self.rate.is_finite() && self.rate > 0.0) {
            return Err(PlaybackError::InvalidRate(self.rate));
        }
        if self.tick_period_ms == 0 {
            return Err(PlaybackError::config("tick_period_ms must be greater than zero"));
        }
        if self.max_sleep_ms == 0 {
            return Err(PlaybackError::config("max_sleep_ms must be greater than zero"));
        }
        if self.max_concurrent_loads == Some(0) {
            return Err(PlaybackError::config(
                "max_concurrent_loads must be greater than zero when set",
            ));
        }
        Ok(())
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_period_ms)
    }

    pub fn max_sleep(&self) -> Duration {
        Duration::from_millis(self.max_sleep_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "rate = 4.0\nregion_loop = true\n").unwrap();

        let config = PlaybackConfig::load(&path).unwrap();
        assert_eq!(config.rate, 4.0);
        assert!(config.region_loop);
        assert_eq!(config.tick_period_ms, 100);
        assert_eq!(config.max_concurrent_loads, None);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = PlaybackConfig {
            max_concurrent_loads: Some(4),
            channel_suffix: "-replay".to_string(),
            ..Default::default()
        };
        config.save(&path).unwrap();

        assert_eq!(PlaybackConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_validation() {
        let bad_rate = PlaybackConfig {
            rate: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            bad_rate.validate(),
            Err(PlaybackError::InvalidRate(_))
        ));

        let bad_tick = PlaybackConfig {
            tick_period_ms: 0,
            ..Default::default()
        };
        assert!(matches!(bad_tick.validate(), Err(PlaybackError::Config(_))));

        assert!(PlaybackConfig::default().validate().is_ok());
    }
}
