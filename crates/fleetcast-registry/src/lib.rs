//! Device presence tracking for Fleetcast.
//!
//! This crate knows which devices exist, which routing key each one
//! belongs to, and whether it is currently online:
//!
//! 1. **Device model**: [`Device`], its persisted [`DeviceRecord`] form,
//!    and the pure [`merge_bootup`] rule for combining a bootup report with
//!    what we already knew.
//! 2. **Registry**: [`DeviceRegistry`], the `bootup` / `heartbeat` /
//!    `offline` state machine plus queries.
//! 3. **Storage**: the [`KeyValueStore`] trait with a JSON file
//!    implementation ([`JsonFileStore`]) and an in-memory one
//!    ([`MemoryStore`]).
//!
//! # How it fits in the stack
//!
//! ```text
//! Coordinator (above)  ← drives transitions from decoded device messages
//!     ↕
//! Registry (this crate) ← owns device state, stages every transition
//!     ↕
//! KeyValueStore         ← JSON file on disk
//! ```
//!
//! Memory is authoritative. A failed write is logged and the transition
//! stands; the next successful write catches the file up.

mod device;
mod error;
mod registry;
mod store;

pub use device::{Device, DeviceRecord, DeviceState, merge_bootup};
pub use error::StoreError;
pub use registry::{BootupOutcome, DeviceRegistry, HeartbeatOutcome};
pub use store::{JsonFileStore, KeyValueStore, MemoryStore};
