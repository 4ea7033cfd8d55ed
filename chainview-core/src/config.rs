//! Serializable engine configuration.
//!
//! Every field has a default so a TOML file only needs to name what it
//! overrides:
//!
//! ```toml
//! base_url = "https://metrics.example.org/api"
//! backup_url = "https://mirror.example.org/api"
//! fresh_window_recent_secs = 30
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid config value: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Primary endpoint root; chunk URLs are `{base_url}/{path}?chunk={id}`.
    pub base_url: String,

    /// Mirror tried once after the primary fails.
    pub backup_url: Option<String>,

    /// Per-request timeout.
    pub request_timeout_secs: u64,

    /// Freshness window for the newest chunk of a series.
    pub fresh_window_recent_secs: u64,

    /// Freshness window for every older (closed) chunk.
    pub fresh_window_closed_secs: u64,

    /// Quiet period before a visible-range change recomputes active chunks.
    pub debounce_ms: u64,

    /// Rows per height-scheme chunk.
    pub height_bucket: i64,

    /// First valid year of the date scheme.
    pub date_start_year: i32,

    /// Extra neighbouring chunks kept active on each side of the visible range.
    pub margin_chunks: usize,

    /// Visible bars above which price series degrade from candles to a line.
    pub line_threshold_bars: usize,

    /// Minimum interval between two zoom-representation evaluations.
    pub zoom_throttle_ms: u64,

    /// Horizontal inset (pixels) excluded from min/max marker scans.
    pub marker_inset_px: f64,

    /// Concurrent network workers.
    pub fetch_workers: usize,

    /// Consecutive failures before a host is skipped.
    pub breaker_threshold: u32,

    /// How long a tripped host is skipped.
    pub breaker_cooldown_secs: u64,

    /// Local persistent cache directory.
    pub cache_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3110/api".to_string(),
            backup_url: None,
            request_timeout_secs: 10,
            fresh_window_recent_secs: 60,
            fresh_window_closed_secs: 60 * 60,
            debounce_ms: 100,
            height_bucket: crate::scheme::height::DEFAULT_BUCKET,
            date_start_year: 2009,
            margin_chunks: 0,
            line_threshold_bars: 300,
            zoom_throttle_ms: 50,
            marker_inset_px: 10.0,
            fetch_workers: 4,
            breaker_threshold: 3,
            breaker_cooldown_secs: 5 * 60,
            cache_dir: PathBuf::from("cache"),
        }
    }
}

impl EngineConfig {
    /// Load a TOML config file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: EngineConfig =
            toml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("base_url is empty".into()));
        }
        if self.height_bucket <= 0 {
            return Err(ConfigError::Invalid(format!(
                "height_bucket must be positive, got {}",
                self.height_bucket
            )));
        }
        if self.fetch_workers == 0 {
            return Err(ConfigError::Invalid("fetch_workers must be at least 1".into()));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn fresh_window_recent(&self) -> chrono::TimeDelta {
        chrono::TimeDelta::seconds(self.fresh_window_recent_secs as i64)
    }

    pub fn fresh_window_closed(&self) -> chrono::TimeDelta {
        chrono::TimeDelta::seconds(self.fresh_window_closed_secs as i64)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn zoom_throttle(&self) -> Duration {
        Duration::from_millis(self.zoom_throttle_ms)
    }

    pub fn breaker_cooldown(&self) -> Duration {
        Duration::from_secs(self.breaker_cooldown_secs)
    }
}
