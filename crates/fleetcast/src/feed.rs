//! Weather feeds: where the data comes from and how long it stays good.
//!
//! A [`FeedSource`] produces data for a routing key on demand. The
//! [`FeedCache`] remembers the last successful fetch per key, persists it
//! so a restart doesn't trigger a fetch storm, and answers "is this still
//! fresh enough to send to a device?".

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use fleetcast_protocol::ForecastDay;
use fleetcast_registry::KeyValueStore;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

/// The two kinds of weather data, refreshed on different schedules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedKind {
    Current,
    Forecast,
}

impl fmt::Display for FeedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Current => "current",
            Self::Forecast => "forecast",
        })
    }
}

/// Current conditions for one routing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentConditions {
    /// Whole degrees Fahrenheit.
    pub temp_f: i16,
}

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// The source has nothing for this routing key.
    #[error("no feed data for {0}")]
    NotFound(String),

    /// The source exists but couldn't answer right now.
    #[error("feed source unavailable: {0}")]
    Unavailable(String),

    /// The source answered with something unusable.
    #[error("malformed feed data for {key}: {reason}")]
    Malformed { key: String, reason: String },
}

/// Produces weather data on demand.
///
/// Implementations do their own I/O; the coordinator calls them without
/// holding any lock.
pub trait FeedSource: Send + Sync + 'static {
    fn fetch_current(
        &self,
        routing_key: &str,
    ) -> impl Future<Output = Result<CurrentConditions, FeedError>> + Send;

    /// Up to `days` days, today first.
    fn fetch_forecast(
        &self,
        routing_key: &str,
        days: usize,
    ) -> impl Future<Output = Result<Vec<ForecastDay>, FeedError>> + Send;
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

/// Cached feed data for one routing key, as persisted.
///
/// Timestamps are RFC 3339 strings; an empty or unparseable one means
/// "never fetched".
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedRecord {
    pub routing_key: String,
    #[serde(default)]
    pub current: Option<CurrentConditions>,
    #[serde(default)]
    pub forecast: Vec<ForecastDay>,
    #[serde(default)]
    pub current_updated: String,
    #[serde(default)]
    pub forecast_updated: String,
}

impl FeedRecord {
    fn updated(&self, kind: FeedKind) -> Option<DateTime<Utc>> {
        let raw = match kind {
            FeedKind::Current => &self.current_updated,
            FeedKind::Forecast => &self.forecast_updated,
        };
        if raw.is_empty() {
            return None;
        }
        match DateTime::parse_from_rfc3339(raw) {
            Ok(t) => Some(t.with_timezone(&Utc)),
            Err(e) => {
                tracing::warn!(routing_key = %self.routing_key, %kind, error = %e, "unparseable feed timestamp");
                None
            }
        }
    }
}

fn timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Last-known feed data per routing key.
pub struct FeedCache<S> {
    records: HashMap<String, FeedRecord>,
    store: S,
    current_validity: Duration,
    forecast_validity: Duration,
}

impl<S: KeyValueStore> FeedCache<S> {
    /// A cache seeded from `store`. Unreadable entries are skipped; a
    /// store that can't be read at all yields an empty cache.
    pub fn load(store: S, current_validity: Duration, forecast_validity: Duration) -> Self {
        let records = match store.entries::<FeedRecord>() {
            Ok(entries) => entries.into_iter().collect(),
            Err(e) => {
                tracing::warn!(error = %e, "failed to read feed cache, starting empty");
                HashMap::new()
            }
        };
        tracing::info!(count = records.len(), "loaded feed cache");

        Self {
            records,
            store,
            current_validity,
            forecast_validity,
        }
    }

    fn validity(&self, kind: FeedKind) -> Duration {
        match kind {
            FeedKind::Current => self.current_validity,
            FeedKind::Forecast => self.forecast_validity,
        }
    }

    /// Whether `kind` data for `routing_key` was fetched within its
    /// validity window as of `now`.
    pub fn is_fresh(&self, routing_key: &str, kind: FeedKind, now: DateTime<Utc>) -> bool {
        let Some(updated) = self.records.get(routing_key).and_then(|r| r.updated(kind)) else {
            return false;
        };
        // A timestamp in the future (clock stepped back) counts as fresh.
        match (now - updated).to_std() {
            Ok(age) => age <= self.validity(kind),
            Err(_) => true,
        }
    }

    /// Current conditions, only if fresh.
    pub fn fresh_current(&self, routing_key: &str, now: DateTime<Utc>) -> Option<CurrentConditions> {
        if !self.is_fresh(routing_key, FeedKind::Current, now) {
            return None;
        }
        self.records.get(routing_key).and_then(|r| r.current)
    }

    /// The forecast, only if fresh and non-empty.
    pub fn fresh_forecast(&self, routing_key: &str, now: DateTime<Utc>) -> Option<Vec<ForecastDay>> {
        if !self.is_fresh(routing_key, FeedKind::Forecast, now) {
            return None;
        }
        self.records
            .get(routing_key)
            .map(|r| r.forecast.clone())
            .filter(|days| !days.is_empty())
    }

    pub fn record_current(&mut self, routing_key: &str, current: CurrentConditions, now: DateTime<Utc>) {
        let record = self.entry(routing_key);
        record.current = Some(current);
        record.current_updated = timestamp(now);
        self.persist(routing_key);
    }

    pub fn record_forecast(&mut self, routing_key: &str, days: Vec<ForecastDay>, now: DateTime<Utc>) {
        let record = self.entry(routing_key);
        record.forecast = days;
        record.forecast_updated = timestamp(now);
        self.persist(routing_key);
    }

    pub fn get(&self, routing_key: &str) -> Option<&FeedRecord> {
        self.records.get(routing_key)
    }

    fn entry(&mut self, routing_key: &str) -> &mut FeedRecord {
        self.records
            .entry(routing_key.to_string())
            .or_insert_with(|| FeedRecord {
                routing_key: routing_key.to_string(),
                ..FeedRecord::default()
            })
    }

    fn persist(&self, routing_key: &str) {
        let Some(record) = self.records.get(routing_key) else {
            return;
        };
        if let Err(e) = self.store.stage(routing_key, record) {
            tracing::warn!(routing_key, error = %e, "failed to stage feed data");
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use fleetcast_protocol::MoonPhase;
    use fleetcast_registry::MemoryStore;

    use super::*;

    const MIN: i64 = 60;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn cache() -> FeedCache<MemoryStore> {
        FeedCache::load(
            MemoryStore::new(),
            Duration::from_secs(35 * 60),
            Duration::from_secs(370 * 60),
        )
    }

    fn day() -> ForecastDay {
        ForecastDay {
            high_temp: 70,
            precip_percent: 10,
            moon: MoonPhase::Partial,
        }
    }

    #[test]
    fn test_never_fetched_is_stale() {
        let c = cache();
        assert!(!c.is_fresh("94107", FeedKind::Current, at(0)));
        assert_eq!(c.fresh_current("94107", at(0)), None);
    }

    #[test]
    fn test_current_validity_window() {
        let mut c = cache();
        c.record_current("94107", CurrentConditions { temp_f: 60 }, at(0));

        assert!(c.is_fresh("94107", FeedKind::Current, at(35 * MIN)));
        assert!(!c.is_fresh("94107", FeedKind::Current, at(35 * MIN + 1)));
        // Forecast was never fetched.
        assert!(!c.is_fresh("94107", FeedKind::Forecast, at(0)));
    }

    #[test]
    fn test_forecast_validity_window() {
        let mut c = cache();
        c.record_forecast("94107", vec![day()], at(0));

        assert_eq!(c.fresh_forecast("94107", at(370 * MIN)), Some(vec![day()]));
        assert_eq!(c.fresh_forecast("94107", at(370 * MIN + 1)), None);
    }

    #[test]
    fn test_empty_forecast_is_not_published() {
        let mut c = cache();
        c.record_forecast("94107", vec![], at(0));
        assert!(c.is_fresh("94107", FeedKind::Forecast, at(0)));
        assert_eq!(c.fresh_forecast("94107", at(0)), None);
    }

    #[test]
    fn test_bad_timestamp_is_stale() {
        let mut c = cache();
        c.record_current("94107", CurrentConditions { temp_f: 60 }, at(0));
        c.records.get_mut("94107").unwrap().current_updated = "garbage".into();
        assert!(!c.is_fresh("94107", FeedKind::Current, at(0)));
    }

    #[test]
    fn test_cache_reloads_from_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weather.json");
        let validity = Duration::from_secs(35 * 60);
        {
            let store = fleetcast_registry::JsonFileStore::open(&path).unwrap();
            let mut c = FeedCache::load(store, validity, validity);
            c.record_current("94107", CurrentConditions { temp_f: -3 }, at(0));
        }
        let store = fleetcast_registry::JsonFileStore::open(&path).unwrap();
        let c = FeedCache::load(store, validity, validity);
        assert_eq!(
            c.fresh_current("94107", at(MIN)),
            Some(CurrentConditions { temp_f: -3 })
        );
    }
}
