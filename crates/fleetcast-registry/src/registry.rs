//! The device registry: presence state machine plus persistence.
//!
//! # Concurrency note
//!
//! `DeviceRegistry` is not thread-safe by itself; it's a plain `HashMap`
//! mutated through `&mut self`. The coordinator wraps it in a
//! `tokio::sync::RwLock`. Transitions only *stage* their record in the
//! store, which never touches disk; the owner flushes the store after
//! releasing the guard.

use std::collections::{BTreeSet, HashMap};

use chrono::Utc;
use fleetcast_protocol::DeviceId;

use crate::{Device, DeviceRecord, KeyValueStore, StoreError, merge_bootup};

/// What a bootup did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootupOutcome {
    /// First time this id was seen.
    pub created: bool,
    /// The device had been inactive.
    pub reactivated: bool,
    /// The key now in effect. Differs from the reported key when the
    /// device was already registered under another one.
    pub routing_key: String,
}

/// What a heartbeat did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// No such device; nothing changed.
    Unknown,
    /// Already active; `last_seen` refreshed.
    Refreshed,
    /// Was inactive, now active again.
    Reactivated,
}

/// All known devices, keyed by id.
pub struct DeviceRegistry<S> {
    devices: HashMap<DeviceId, Device>,
    store: S,
}

impl<S: KeyValueStore> DeviceRegistry<S> {
    /// An empty registry that persists into `store`. Whatever the store
    /// already holds is ignored; use [`DeviceRegistry::load`] to resume.
    pub fn new(store: S) -> Self {
        Self {
            devices: HashMap::new(),
            store,
        }
    }

    /// A registry seeded from `store`.
    ///
    /// Records that don't parse are skipped with a warning. A record
    /// whose `lastSeen` is missing or malformed loads with `last_seen =
    /// None`. The map key wins if it disagrees with the record's `id`.
    ///
    /// # Errors
    /// Propagates a failure to read the store at all.
    pub fn load(store: S) -> Result<Self, StoreError> {
        let devices: HashMap<DeviceId, Device> = store
            .entries::<DeviceRecord>()?
            .into_iter()
            .map(|(key, record)| {
                let mut device = Device::from(record);
                device.id = DeviceId::new(key);
                (device.id.clone(), device)
            })
            .collect();

        tracing::info!(count = devices.len(), "loaded devices from store");
        Ok(Self { devices, store })
    }

    fn persist(&self, device: &Device) {
        if let Err(e) = self.store.stage(device.id.as_str(), &DeviceRecord::from(device)) {
            tracing::warn!(device_id = %device.id, error = %e, "failed to persist device");
        }
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    /// Registers a bootup: creates the device, or refreshes and reactivates
    /// it, keeping its original routing key. See [`merge_bootup`].
    pub fn bootup(
        &mut self,
        id: &DeviceId,
        routing_key: &str,
        name: Option<&str>,
    ) -> BootupOutcome {
        let existing = self.devices.get(id);
        let created = existing.is_none();
        let reactivated = existing.is_some_and(|d| !d.active);

        let device = merge_bootup(existing, id, routing_key, name, Utc::now());

        if created {
            tracing::info!(device_id = %id, routing_key = %device.routing_key, name = %device.name, "device registered");
        } else {
            if device.routing_key != routing_key {
                tracing::info!(
                    device_id = %id,
                    reported = routing_key,
                    stored = %device.routing_key,
                    "keeping stored routing key"
                );
            }
            tracing::info!(device_id = %id, reactivated, "device rebooted");
        }

        self.persist(&device);
        let outcome = BootupOutcome {
            created,
            reactivated,
            routing_key: device.routing_key.clone(),
        };
        self.devices.insert(id.clone(), device);
        outcome
    }

    /// Records a heartbeat. Unknown ids are ignored: a device has to boot
    /// up before it can be tracked.
    pub fn heartbeat(&mut self, id: &DeviceId) -> HeartbeatOutcome {
        let Some(device) = self.devices.get_mut(id) else {
            tracing::debug!(device_id = %id, "heartbeat from unknown device");
            return HeartbeatOutcome::Unknown;
        };

        device.last_seen = Some(Utc::now());
        let outcome = if device.active {
            HeartbeatOutcome::Refreshed
        } else {
            device.active = true;
            tracing::info!(device_id = %id, "device reactivated by heartbeat");
            HeartbeatOutcome::Reactivated
        };

        let device = device.clone();
        self.persist(&device);
        outcome
    }

    /// Marks a device inactive. Returns `false` for unknown ids.
    ///
    /// `last_seen` is left alone; it still says when the device was last
    /// heard from.
    pub fn offline(&mut self, id: &DeviceId) -> bool {
        let Some(device) = self.devices.get_mut(id) else {
            tracing::debug!(device_id = %id, "offline notice for unknown device");
            return false;
        };

        device.active = false;
        tracing::info!(device_id = %id, "device offline");
        let device = device.clone();
        self.persist(&device);
        true
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn get(&self, id: &DeviceId) -> Option<&Device> {
        self.devices.get(id)
    }

    /// Active devices, ordered by id.
    pub fn list_active(&self) -> Vec<Device> {
        let mut active: Vec<Device> = self
            .devices
            .values()
            .filter(|d| d.active)
            .cloned()
            .collect();
        active.sort_by(|a, b| a.id.cmp(&b.id));
        active
    }

    /// Routing keys with at least one active device, deduplicated and
    /// sorted.
    pub fn active_routing_keys(&self) -> Vec<String> {
        self.devices
            .values()
            .filter(|d| d.active)
            .map(|d| d.routing_key.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Number of known devices, active or not.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}
