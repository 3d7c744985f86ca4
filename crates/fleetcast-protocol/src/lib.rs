//! Wire protocol for Fleetcast.
//!
//! This crate defines the bytes that devices and the coordinator exchange:
//!
//! - **Codec** ([`encode`], [`decode`], [`WireMessage`]): the
//!   `[type][length][payload]` frame and the trait typed messages implement.
//! - **Messages** ([`CurrentWeather`], [`DeviceConfig`], [`FullFrame`], ...):
//!   one struct per message kind with its fixed payload layout.
//! - **Types** ([`MessageType`], [`DeviceId`], [`ColorChannel`], ...): the
//!   small values that appear inside messages.
//! - **Errors** ([`ProtocolError`]).
//!
//! # Architecture
//!
//! The protocol layer sits between transport (topics and raw bytes) and
//! the coordinator. It doesn't know about brokers, devices or the canvas;
//! it only knows how the firmware lays out its bytes.
//!
//! ```text
//! Transport (topic, bytes) → Protocol (typed message) → Coordinator
//! ```

// ---------------------------------------------------------------------------
// Module declarations
// ---------------------------------------------------------------------------

mod codec;
mod error;
mod messages;
mod types;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use codec::{HEADER_LEN, MAX_PAYLOAD_SIZE, RawFrame, WireMessage, decode, encode};
pub use error::ProtocolError;
pub use messages::{
    CANVAS_SIZE, CanvasMessage, CurrentWeather, DeviceConfig, FULL_FRAME_PAYLOAD_LEN,
    Forecast, FullFrame, Generic, HEARTBEAT_MIN_LEN, Heartbeat, MAX_FORECAST_DAYS,
    MAX_PIXELS_PER_BATCH, PixelBatch, SyncRequest, TEMPERATURE_OFFSET, VersionNotice,
};
pub use types::{ColorChannel, DeviceId, ForecastDay, MessageType, MoonPhase, PixelUpdate};
