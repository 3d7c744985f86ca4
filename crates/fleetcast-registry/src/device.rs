//! Device types: what the registry knows about each board.

use chrono::{DateTime, SecondsFormat, Utc};
use fleetcast_protocol::DeviceId;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// DeviceState
// ---------------------------------------------------------------------------

/// Presence of a known device.
///
/// ```text
///   (unknown) ──bootup──→ Active ──offline──→ Inactive
///                           ↑                    │
///                           └─bootup/heartbeat───┘
/// ```
///
/// "Unknown" isn't a variant: an unknown device simply has no entry in
/// the registry. Devices are never removed, only marked inactive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Active,
    Inactive,
}

// ---------------------------------------------------------------------------
// Device
// ---------------------------------------------------------------------------

/// Everything the registry tracks for one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub id: DeviceId,
    /// Display name. Defaults to the id; updated by every bootup that
    /// reports one.
    pub name: String,
    /// The key that selects this device's weather feed (a zip code in
    /// practice). Fixed by the first bootup ever seen.
    pub routing_key: String,
    /// When we last heard from the device. `None` if never recorded or the
    /// persisted value was unreadable.
    pub last_seen: Option<DateTime<Utc>>,
    pub active: bool,
}

impl Device {
    pub fn state(&self) -> DeviceState {
        if self.active {
            DeviceState::Active
        } else {
            DeviceState::Inactive
        }
    }
}

/// Combines a bootup report with the existing entry, if any.
///
/// - `routing_key`: first write wins. A device that reboots with a
///   different key keeps the stored one.
/// - `name`: last write wins. `None` keeps the stored name (or the id for
///   a new device).
/// - `last_seen` becomes `now` and the device is active.
pub fn merge_bootup(
    existing: Option<&Device>,
    id: &DeviceId,
    routing_key: &str,
    name: Option<&str>,
    now: DateTime<Utc>,
) -> Device {
    let (routing_key, stored_name) = match existing {
        Some(device) => (device.routing_key.clone(), Some(device.name.clone())),
        None => (routing_key.to_string(), None),
    };
    let name = name
        .map(str::to_string)
        .or(stored_name)
        .unwrap_or_else(|| id.to_string());

    Device {
        id: id.clone(),
        name,
        routing_key,
        last_seen: Some(now),
        active: true,
    }
}

// ---------------------------------------------------------------------------
// DeviceRecord
// ---------------------------------------------------------------------------

/// The on-disk form of a [`Device`].
///
/// ```json
/// { "id": "dev0", "name": "Kitchen", "routingKey": "94107",
///   "active": true, "lastSeen": "2024-05-01T12:00:00Z" }
/// ```
///
/// `lastSeen` is kept as a raw string so one bad timestamp doesn't make
/// the whole record unreadable; it is parsed when converting to a
/// `Device`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub routing_key: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub last_seen: String,
}

impl From<&Device> for DeviceRecord {
    fn from(device: &Device) -> Self {
        Self {
            id: device.id.to_string(),
            name: device.name.clone(),
            routing_key: device.routing_key.clone(),
            active: device.active,
            last_seen: device
                .last_seen
                .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
                .unwrap_or_default(),
        }
    }
}

impl From<DeviceRecord> for Device {
    fn from(record: DeviceRecord) -> Self {
        let last_seen = DateTime::parse_from_rfc3339(&record.last_seen)
            .ok()
            .map(|t| t.with_timezone(&Utc));
        let name = if record.name.is_empty() {
            record.id.clone()
        } else {
            record.name
        };
        Self {
            id: DeviceId::new(record.id),
            name,
            routing_key: record.routing_key,
            last_seen,
            active: record.active,
        }
    }
}
