//! Persisted monitor settings
//!
//! Stored as JSON at `<config dir>/claude-usage-monitor/settings.json`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Directory name under the platform config dir
pub const CONFIG_DIR_NAME: &str = "claude-usage-monitor";

pub const SETTINGS_FILE_NAME: &str = "settings.json";

/// Overrides the persisted refresh interval when set
pub const REFRESH_ENV_VAR: &str = "CLAUDE_USAGE_REFRESH_SECS";

/// Serializes read-modify-write of the settings file within this process
static SETTINGS_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unsupported refresh interval {0}s (expected one of 30, 60, 120, 300)")]
    UnsupportedInterval(u64),
    #[error("invalid CLAUDE_USAGE_REFRESH_SECS value {0:?}")]
    InvalidEnvValue(String),
    #[error("could not determine config directory")]
    NoConfigDir,
    #[error("failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// How often the monitor polls the usage API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub enum RefreshInterval {
    ThirtySeconds,
    OneMinute,
    #[default]
    TwoMinutes,
    FiveMinutes,
}

impl RefreshInterval {
    pub const ALL: [RefreshInterval; 4] = [
        RefreshInterval::ThirtySeconds,
        RefreshInterval::OneMinute,
        RefreshInterval::TwoMinutes,
        RefreshInterval::FiveMinutes,
    ];

    pub fn as_secs(self) -> u64 {
        match self {
            RefreshInterval::ThirtySeconds => 30,
            RefreshInterval::OneMinute => 60,
            RefreshInterval::TwoMinutes => 120,
            RefreshInterval::FiveMinutes => 300,
        }
    }

    pub fn as_duration(self) -> Duration {
        Duration::from_secs(self.as_secs())
    }
}

impl TryFrom<u64> for RefreshInterval {
    type Error = ConfigError;

    fn try_from(secs: u64) -> Result<Self, Self::Error> {
        RefreshInterval::ALL
            .into_iter()
            .find(|interval| interval.as_secs() == secs)
            .ok_or(ConfigError::UnsupportedInterval(secs))
    }
}

impl From<RefreshInterval> for u64 {
    fn from(interval: RefreshInterval) -> Self {
        interval.as_secs()
    }
}

impl fmt::Display for RefreshInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_secs() {
            secs if secs < 60 => write!(f, "{secs} seconds"),
            60 => f.write_str("1 minute"),
            secs => write!(f, "{} minutes", secs / 60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default)]
    pub refresh_interval: RefreshInterval,
}

impl Settings {
    /// Default settings file location
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join(CONFIG_DIR_NAME).join(SETTINGS_FILE_NAME))
    }

    /// Load from the default location and apply the environment override
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_env(&Self::default_path()?)
    }

    /// Load from `path` and apply the environment override
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let settings = Self::load_from(path)?;
        settings.with_env_override(std::env::var(REFRESH_ENV_VAR).ok().as_deref())
    }

    /// Load settings from `path`; a missing file yields defaults
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let _lock = SETTINGS_LOCK.lock().unwrap_or_else(PoisonError::into_inner);

        if !path.exists() {
            log::trace!("Settings file not found at {path:?}, using defaults");
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let settings: Settings =
            serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        log::trace!("Loaded settings from {path:?}: {settings:?}");
        Ok(settings)
    }

    /// Apply a raw `CLAUDE_USAGE_REFRESH_SECS` value, if any
    pub fn with_env_override(mut self, value: Option<&str>) -> Result<Self, ConfigError> {
        if let Some(raw) = value {
            let secs: u64 = raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidEnvValue(raw.to_string()))?;
            self.refresh_interval = RefreshInterval::try_from(secs)?;
            log::debug!("Refresh interval overridden from environment: {secs}s");
        }
        Ok(self)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::default_path()?)
    }

    /// Save to `path` (atomic write: temp file + rename)
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let _lock = SETTINGS_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }

        let json_content = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        let temp_path = path.with_extension("tmp");
        std::fs::write(&temp_path, json_content).map_err(io_err)?;
        std::fs::rename(&temp_path, path).map_err(io_err)?;

        log::trace!("Saved settings to {path:?}");
        Ok(())
    }
}
