//! Weather source backed by a directory of JSON snapshots.
//!
//! Something outside the service (a cron job, a vendor sync script)
//! drops `<routing_key>.json` files into a directory:
//!
//! ```json
//! {
//!   "current": { "tempF": 61.4 },
//!   "forecast": [
//!     { "highTemp": 68.0, "precipPercent": 20.0, "moonIllumination": 0.42 }
//!   ]
//! }
//! ```
//!
//! Values are rounded and clamped to what the wire format carries.

use std::path::{Path, PathBuf};

use fleetcast::{CurrentConditions, FeedError, FeedSource};
use fleetcast_protocol::{ForecastDay, MoonPhase};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snapshot {
    current: Option<CurrentSnapshot>,
    #[serde(default)]
    forecast: Vec<DaySnapshot>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CurrentSnapshot {
    temp_f: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DaySnapshot {
    high_temp: f64,
    precip_percent: f64,
    #[serde(default)]
    moon_illumination: f64,
}

impl DaySnapshot {
    fn to_wire(&self) -> ForecastDay {
        ForecastDay {
            high_temp: self.high_temp.round().clamp(0.0, 255.0) as u8,
            precip_percent: self.precip_percent.round().clamp(0.0, 100.0) as u8,
            moon: MoonPhase::from_fraction(self.moon_illumination),
        }
    }
}

/// Reads `<dir>/<routing_key>.json` on every fetch.
pub struct FileFeedSource {
    dir: PathBuf,
}

impl FileFeedSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, routing_key: &str) -> Result<PathBuf, FeedError> {
        // Keys come from devices; keep them inside the directory.
        let valid = !routing_key.is_empty()
            && routing_key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(FeedError::Malformed {
                key: routing_key.to_string(),
                reason: "routing key is not a plain file name".into(),
            });
        }
        Ok(self.dir.join(format!("{routing_key}.json")))
    }

    async fn read(&self, routing_key: &str) -> Result<Snapshot, FeedError> {
        let path = self.path_for(routing_key)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(FeedError::NotFound(routing_key.to_string()));
            }
            Err(e) => {
                return Err(FeedError::Unavailable(format!("{}: {e}", path.display())));
            }
        };
        serde_json::from_slice(&bytes).map_err(|e| FeedError::Malformed {
            key: routing_key.to_string(),
            reason: e.to_string(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl FeedSource for FileFeedSource {
    async fn fetch_current(&self, routing_key: &str) -> Result<CurrentConditions, FeedError> {
        let current = self
            .read(routing_key)
            .await?
            .current
            .ok_or_else(|| FeedError::Malformed {
                key: routing_key.to_string(),
                reason: "no current conditions".into(),
            })?;
        let temp_f = current
            .temp_f
            .round()
            .clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16;
        Ok(CurrentConditions { temp_f })
    }

    async fn fetch_forecast(
        &self,
        routing_key: &str,
        days: usize,
    ) -> Result<Vec<ForecastDay>, FeedError> {
        let snapshot = self.read(routing_key).await?;
        if snapshot.forecast.is_empty() {
            return Err(FeedError::Malformed {
                key: routing_key.to_string(),
                reason: "empty forecast".into(),
            });
        }
        Ok(snapshot
            .forecast
            .iter()
            .take(days)
            .map(DaySnapshot::to_wire)
            .collect())
    }
}
