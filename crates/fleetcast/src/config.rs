//! Coordinator configuration.
//!
//! Two kinds of configuration live here:
//!
//! - [`CoordinatorConfig`]: fixed at startup. Topics, timeouts, refresh
//!   intervals. Built in code (the server binary fills it from CLI flags).
//! - [`RuntimeConfig`]: a small JSON file the operator can edit while the
//!   service runs. Reloaded periodically.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Topics
// ---------------------------------------------------------------------------

/// The broker topics the coordinator listens and publishes on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub bootup: String,
    pub heartbeat: String,
    /// Devices register this as their last-will topic.
    pub offline: String,
    /// Shared canvas traffic in both directions.
    pub canvas: String,
    /// Weather goes to `<weather_prefix>/<routing_key>`.
    pub weather_prefix: String,
    /// Prepended to the device id to form its command topic.
    pub command_prefix: String,
}

impl Topics {
    /// The production topic set.
    pub fn production() -> Self {
        Self::with_prefix("")
    }

    /// The production topics with `debug_` in front of each, so a debug
    /// deployment can share a broker without cross-talk.
    pub fn debug() -> Self {
        Self::with_prefix("debug_")
    }

    fn with_prefix(prefix: &str) -> Self {
        Self {
            bootup: format!("{prefix}dev_bootup"),
            heartbeat: format!("{prefix}dev_heartbeat"),
            offline: format!("{prefix}device_offline"),
            canvas: format!("{prefix}etch_sketch"),
            weather_prefix: format!("{prefix}weather"),
            command_prefix: prefix.to_string(),
        }
    }

    pub fn weather(&self, routing_key: &str) -> String {
        format!("{}/{routing_key}", self.weather_prefix)
    }

    pub fn command(&self, device_id: &str) -> String {
        format!("{}{device_id}", self.command_prefix)
    }
}

impl Default for Topics {
    fn default() -> Self {
        Self::production()
    }
}

// ---------------------------------------------------------------------------
// CoordinatorConfig
// ---------------------------------------------------------------------------

/// Startup configuration for the coordinator.
///
/// `Default` gives the production values; tests usually override the
/// delays to zero.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub topics: Topics,
    /// Bound on a single publish. Exceeding it abandons the publish.
    pub publish_timeout: Duration,
    /// Pause between a bootup's data refresh and its publications.
    pub settle_delay: Duration,
    /// Pause between routing keys during a periodic refresh.
    pub refresh_spacing: Duration,
    /// Days of forecast sent to each device.
    pub forecast_days: usize,
    pub current_refresh_interval: Duration,
    pub forecast_refresh_interval: Duration,
    /// Cached current weather older than this is not published.
    pub current_validity: Duration,
    /// Cached forecast older than this is not published.
    pub forecast_validity: Duration,
    /// `None` disables periodic reloading.
    pub runtime_config_path: Option<PathBuf>,
    pub config_reload_interval: Duration,
    /// Upper bound of the random delay before each periodic task's first
    /// run.
    pub periodic_jitter: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            topics: Topics::production(),
            publish_timeout: Duration::from_secs(5),
            settle_delay: Duration::from_secs(1),
            refresh_spacing: Duration::from_secs(1),
            forecast_days: 3,
            current_refresh_interval: Duration::from_secs(30 * 60),
            forecast_refresh_interval: Duration::from_secs(360 * 60),
            current_validity: Duration::from_secs(35 * 60),
            forecast_validity: Duration::from_secs(370 * 60),
            runtime_config_path: None,
            config_reload_interval: Duration::from_secs(15 * 60),
            periodic_jitter: Duration::from_secs(30),
        }
    }
}

// ---------------------------------------------------------------------------
// RuntimeConfig
// ---------------------------------------------------------------------------

/// Errors loading the runtime config file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Operator-editable settings, loaded from JSON:
///
/// ```json
/// { "deviceVersion": "4" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfig {
    /// Firmware version advertised to devices. Kept as the raw string
    /// from the file; see [`RuntimeConfig::version_byte`].
    pub device_version: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            device_version: "1".to_string(),
        }
    }
}

impl RuntimeConfig {
    /// Version used when the configured one can't be sent.
    pub const FALLBACK_VERSION: u8 = 1;

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let bytes = std::fs::read(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_slice(&bytes).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// The version as it goes on the wire (one byte).
    ///
    /// Anything that isn't a whole number in `0..=255` falls back to
    /// [`Self::FALLBACK_VERSION`] with a warning.
    pub fn version_byte(&self) -> u8 {
        match self.device_version.trim().parse::<u8>() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(
                    configured = %self.device_version,
                    fallback = Self::FALLBACK_VERSION,
                    "invalid device version"
                );
                Self::FALLBACK_VERSION
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_topics() {
        let t = Topics::production();
        assert_eq!(t.bootup, "dev_bootup");
        assert_eq!(t.heartbeat, "dev_heartbeat");
        assert_eq!(t.offline, "device_offline");
        assert_eq!(t.canvas, "etch_sketch");
        assert_eq!(t.weather("94107"), "weather/94107");
        assert_eq!(t.command("dev0"), "dev0");
    }

    #[test]
    fn test_debug_topics_are_prefixed() {
        let t = Topics::debug();
        assert_eq!(t.bootup, "debug_dev_bootup");
        assert_eq!(t.canvas, "debug_etch_sketch");
        assert_eq!(t.weather("94107"), "debug_weather/94107");
        assert_eq!(t.command("dev0"), "debug_dev0");
    }

    #[test]
    fn test_default_config_values() {
        let c = CoordinatorConfig::default();
        assert_eq!(c.publish_timeout, Duration::from_secs(5));
        assert_eq!(c.settle_delay, Duration::from_secs(1));
        assert_eq!(c.forecast_days, 3);
        assert_eq!(c.current_validity, Duration::from_secs(35 * 60));
        assert_eq!(c.forecast_validity, Duration::from_secs(370 * 60));
    }

    #[test]
    fn test_version_byte_parses() {
        let cfg = RuntimeConfig {
            device_version: " 7 ".into(),
        };
        assert_eq!(cfg.version_byte(), 7);
    }

    #[test]
    fn test_version_byte_falls_back() {
        for bad in ["1.0.0", "", "256", "-1", "v2"] {
            let cfg = RuntimeConfig {
                device_version: bad.into(),
            };
            assert_eq!(cfg.version_byte(), RuntimeConfig::FALLBACK_VERSION, "{bad:?}");
        }
    }

    #[test]
    fn test_load_runtime_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, br#"{"deviceVersion": "12"}"#).unwrap();

        let cfg = RuntimeConfig::load(&path).unwrap();
        assert_eq!(cfg.version_byte(), 12);
    }

    #[test]
    fn test_load_missing_and_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.json");
        assert!(matches!(
            RuntimeConfig::load(&missing),
            Err(ConfigError::Read { .. })
        ));

        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, b"{\"deviceVersion\": 3}").unwrap();
        assert!(matches!(
            RuntimeConfig::load(&bad),
            Err(ConfigError::Parse { .. })
        ));
    }
}
