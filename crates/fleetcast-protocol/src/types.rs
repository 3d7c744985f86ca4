//! Core protocol types for Fleetcast's wire format.
//!
//! These are the small value types that appear inside frames: the message
//! type tag, device identity, colour channels, and the per-day forecast
//! record. The frame header lives in [`crate::codec`] and the full typed
//! messages in [`crate::messages`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ProtocolError;

// ---------------------------------------------------------------------------
// Message types
// ---------------------------------------------------------------------------

/// The first byte of every frame: which kind of message follows.
///
/// The numeric values are part of the wire contract shared with the
/// device firmware and must never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Topic-specific opaque payload.
    Generic = 0x00,
    /// Current temperature (1 byte, offset +50).
    CurrentWeather = 0x01,
    /// Multi-day forecast.
    Forecast = 0x02,
    /// Device configuration strings (sent at bootup).
    DeviceConfig = 0x03,
    /// Firmware/protocol version notice (server → device).
    Version = 0x10,
    /// Device keepalive carrying the device name.
    Heartbeat = 0x11,
    /// Device asks for the full shared canvas.
    CanvasSyncRequest = 0x20,
    /// Complete canvas state plus sequence number.
    CanvasFullFrame = 0x21,
    /// Legacy incremental pixel batch.
    CanvasPixelBatch = 0x22,
}

impl MessageType {
    /// The wire byte for this message type.
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for MessageType {
    type Error = ProtocolError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        Ok(match byte {
            0x00 => Self::Generic,
            0x01 => Self::CurrentWeather,
            0x02 => Self::Forecast,
            0x03 => Self::DeviceConfig,
            0x10 => Self::Version,
            0x11 => Self::Heartbeat,
            0x20 => Self::CanvasSyncRequest,
            0x21 => Self::CanvasFullFrame,
            0x22 => Self::CanvasPixelBatch,
            other => return Err(ProtocolError::UnknownMessageType(other)),
        })
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}(0x{:02X})", self, self.as_byte())
    }
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// The stable identity a device reports at bootup.
///
/// A newtype over `String` so a device id can't be mixed up with a
/// routing key or a topic name in function signatures. Serialized as the
/// bare string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub String);

impl DeviceId {
    /// Creates a device id from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrows the id as a `&str`.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

// ---------------------------------------------------------------------------
// Canvas types
// ---------------------------------------------------------------------------

/// One of the three bitmask layers of the shared canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorChannel {
    Red,
    Green,
    Blue,
}

impl ColorChannel {
    /// Wire byte used in pixel updates.
    pub fn as_byte(self) -> u8 {
        match self {
            Self::Red => 0,
            Self::Green => 1,
            Self::Blue => 2,
        }
    }

    /// Parses a wire byte. Returns `None` for anything but 0, 1 or 2.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Red),
            1 => Some(Self::Green),
            2 => Some(Self::Blue),
            _ => None,
        }
    }
}

/// A single "turn this pixel on" instruction from the legacy update path.
///
/// `row` and `col` are plain bytes so callers can construct out-of-range
/// updates; the canvas skips anything outside `0..16` instead of failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelUpdate {
    pub row: u8,
    pub col: u8,
    pub channel: ColorChannel,
}

impl PixelUpdate {
    pub fn new(row: u8, col: u8, channel: ColorChannel) -> Self {
        Self { row, col, channel }
    }
}

// ---------------------------------------------------------------------------
// Weather types
// ---------------------------------------------------------------------------

/// How full the moon is, quantized to the three states the display shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MoonPhase {
    /// Less than 93% illuminated.
    #[default]
    Partial,
    /// 93–99% illuminated.
    NearlyFull,
    /// Exactly full.
    Full,
}

impl MoonPhase {
    /// Quantizes an illuminated fraction (`0.0..=1.0`).
    pub fn from_fraction(fraction: f64) -> Self {
        if fraction >= 1.0 {
            Self::Full
        } else if fraction > 0.93 {
            Self::NearlyFull
        } else {
            Self::Partial
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            Self::Partial => 0,
            Self::NearlyFull => 1,
            Self::Full => 2,
        }
    }

    /// Parses a wire byte. Unknown codes are rejected.
    pub fn from_byte(byte: u8) -> Result<Self, ProtocolError> {
        match byte {
            0 => Ok(Self::Partial),
            1 => Ok(Self::NearlyFull),
            2 => Ok(Self::Full),
            other => Err(ProtocolError::OutOfRange(format!(
                "moon phase code {other}"
            ))),
        }
    }
}

/// One day of a forecast as it travels on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForecastDay {
    /// Daily high in whole °F.
    pub high_temp: u8,
    /// Chance of precipitation, 0–100.
    pub precip_percent: u8,
    pub moon: MoonPhase,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_round_trips_every_known_byte() {
        for byte in [0x00, 0x01, 0x02, 0x03, 0x10, 0x11, 0x20, 0x21, 0x22] {
            let ty = MessageType::try_from(byte).expect("known type");
            assert_eq!(ty.as_byte(), byte);
        }
    }

    #[test]
    fn test_message_type_unknown_byte_rejected() {
        assert_eq!(
            MessageType::try_from(0x7F),
            Err(ProtocolError::UnknownMessageType(0x7F))
        );
    }

    #[test]
    fn test_moon_phase_thresholds() {
        assert_eq!(MoonPhase::from_fraction(0.5), MoonPhase::Partial);
        assert_eq!(MoonPhase::from_fraction(0.93), MoonPhase::Partial);
        assert_eq!(MoonPhase::from_fraction(0.95), MoonPhase::NearlyFull);
        assert_eq!(MoonPhase::from_fraction(1.0), MoonPhase::Full);
    }

    #[test]
    fn test_color_channel_rejects_unknown_byte() {
        assert_eq!(ColorChannel::from_byte(2), Some(ColorChannel::Blue));
        assert_eq!(ColorChannel::from_byte(3), None);
    }

    #[test]
    fn test_device_id_display_is_bare_string() {
        let id = DeviceId::new("dev0");
        assert_eq!(id.to_string(), "dev0");
        assert_eq!(id.as_str(), "dev0");
    }
}
