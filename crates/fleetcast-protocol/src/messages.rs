//! Typed message payloads.
//!
//! One struct per message kind, each implementing [`WireMessage`]. The
//! layouts below are fixed by the device firmware; byte order is called
//! out explicitly wherever a field is wider than one byte.

use crate::codec::{self, MAX_PAYLOAD_SIZE, RawFrame, WireMessage};
use crate::{
    ColorChannel, DeviceId, ForecastDay, MessageType, MoonPhase, PixelUpdate,
    ProtocolError,
};

/// Offset added to °F so sub-zero temperatures fit an unsigned byte.
pub const TEMPERATURE_OFFSET: i16 = 50;

/// Largest forecast that fits a single payload: `1 + 3 * 84 = 253`.
pub const MAX_FORECAST_DAYS: usize = (MAX_PAYLOAD_SIZE - 1) / 3;

/// Canvas side length in pixels.
pub const CANVAS_SIZE: usize = 16;

/// `2` sequence bytes + three channels of sixteen `u16` rows.
pub const FULL_FRAME_PAYLOAD_LEN: usize = 2 + 3 * CANVAS_SIZE * 2;

/// Hard cap on pixels in one batch.
pub const MAX_PIXELS_PER_BATCH: usize = 32;

/// Fails with `LengthMismatch` unless `payload` is exactly `len` bytes.
fn expect_len(payload: &[u8], len: usize) -> Result<(), ProtocolError> {
    if payload.len() != len {
        return Err(ProtocolError::LengthMismatch {
            declared: len,
            available: payload.len(),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Generic
// ---------------------------------------------------------------------------

/// An opaque payload whose meaning depends on the topic it arrives on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generic {
    pub payload: Vec<u8>,
}

impl WireMessage for Generic {
    const TYPE: MessageType = MessageType::Generic;

    fn encode_payload(&self, out: &mut Vec<u8>) -> Result<(), ProtocolError> {
        out.extend_from_slice(&self.payload);
        Ok(())
    }

    fn decode_payload(payload: &[u8]) -> Result<Self, ProtocolError> {
        Ok(Self {
            payload: payload.to_vec(),
        })
    }
}

// ---------------------------------------------------------------------------
// Weather
// ---------------------------------------------------------------------------

/// Current temperature: one byte, whole °F plus [`TEMPERATURE_OFFSET`].
///
/// Representable range is `-50..=205` °F.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentWeather {
    pub temp_f: i16,
}

impl WireMessage for CurrentWeather {
    const TYPE: MessageType = MessageType::CurrentWeather;

    fn encode_payload(&self, out: &mut Vec<u8>) -> Result<(), ProtocolError> {
        let shifted = i32::from(self.temp_f) + i32::from(TEMPERATURE_OFFSET);
        let byte = u8::try_from(shifted).map_err(|_| {
            ProtocolError::OutOfRange(format!(
                "temperature {}°F outside -50..=205",
                self.temp_f
            ))
        })?;
        out.push(byte);
        Ok(())
    }

    fn decode_payload(payload: &[u8]) -> Result<Self, ProtocolError> {
        expect_len(payload, 1)?;
        Ok(Self {
            temp_f: i16::from(payload[0]) - TEMPERATURE_OFFSET,
        })
    }
}

/// Multi-day forecast: `[numDays][high][precip][moon]*`.
///
/// The encoder writes exactly the days it is given; it never pads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Forecast {
    pub days: Vec<ForecastDay>,
}

impl WireMessage for Forecast {
    const TYPE: MessageType = MessageType::Forecast;

    fn encode_payload(&self, out: &mut Vec<u8>) -> Result<(), ProtocolError> {
        if self.days.len() > MAX_FORECAST_DAYS {
            return Err(ProtocolError::PayloadTooLarge {
                size: 1 + 3 * self.days.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }
        out.push(self.days.len() as u8);
        for day in &self.days {
            out.extend_from_slice(&[
                day.high_temp,
                day.precip_percent,
                day.moon.as_byte(),
            ]);
        }
        Ok(())
    }

    fn decode_payload(payload: &[u8]) -> Result<Self, ProtocolError> {
        let Some((&count, rest)) = payload.split_first() else {
            return Err(ProtocolError::TooShort {
                needed: 1,
                actual: 0,
            });
        };
        expect_len(rest, usize::from(count) * 3)?;

        let days = rest
            .chunks_exact(3)
            .map(|day| {
                Ok(ForecastDay {
                    high_temp: day[0],
                    precip_percent: day[1],
                    moon: MoonPhase::from_byte(day[2])?,
                })
            })
            .collect::<Result<Vec<_>, ProtocolError>>()?;
        Ok(Self { days })
    }
}

// ---------------------------------------------------------------------------
// Version
// ---------------------------------------------------------------------------

/// Version notice sent to a device's command topic. Devices compare it to
/// their firmware version to decide whether to start an OTA update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionNotice {
    pub version: u8,
}

impl WireMessage for VersionNotice {
    const TYPE: MessageType = MessageType::Version;

    fn encode_payload(&self, out: &mut Vec<u8>) -> Result<(), ProtocolError> {
        out.push(self.version);
        Ok(())
    }

    fn decode_payload(payload: &[u8]) -> Result<Self, ProtocolError> {
        expect_len(payload, 1)?;
        Ok(Self {
            version: payload[0],
        })
    }
}

// ---------------------------------------------------------------------------
// Device config
// ---------------------------------------------------------------------------

/// Length-prefixed list of strings: `[count]([len][bytes])*`.
///
/// At bootup devices send at least `[device id, routing key]`, optionally
/// followed by a display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    pub strings: Vec<String>,
}

impl DeviceConfig {
    pub fn new<I, S>(strings: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            strings: strings.into_iter().map(Into::into).collect(),
        }
    }
}

impl WireMessage for DeviceConfig {
    const TYPE: MessageType = MessageType::DeviceConfig;

    fn encode_payload(&self, out: &mut Vec<u8>) -> Result<(), ProtocolError> {
        let count = u8::try_from(self.strings.len())
            .map_err(|_| ProtocolError::TooManyStrings(self.strings.len()))?;

        // Validate everything before writing so a failure leaves `out`
        // untouched.
        let mut total = 1;
        for (index, s) in self.strings.iter().enumerate() {
            if s.len() > MAX_PAYLOAD_SIZE {
                return Err(ProtocolError::StringTooLong {
                    index,
                    len: s.len(),
                });
            }
            total += 1 + s.len();
        }
        if total > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: total,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        out.reserve(total);
        out.push(count);
        for s in &self.strings {
            out.push(s.len() as u8);
            out.extend_from_slice(s.as_bytes());
        }
        Ok(())
    }

    fn decode_payload(payload: &[u8]) -> Result<Self, ProtocolError> {
        let Some((&count, mut rest)) = payload.split_first() else {
            return Err(ProtocolError::TooShort {
                needed: 1,
                actual: 0,
            });
        };

        let mut strings = Vec::with_capacity(usize::from(count));
        for element in 0..usize::from(count) {
            let Some((&len, tail)) = rest.split_first() else {
                return Err(ProtocolError::Truncated { element });
            };
            let len = usize::from(len);
            if tail.len() < len {
                return Err(ProtocolError::Truncated { element });
            }
            let (bytes, tail) = tail.split_at(len);
            let s = std::str::from_utf8(bytes)
                .map_err(|_| ProtocolError::InvalidString { element })?;
            strings.push(s.to_string());
            rest = tail;
        }
        Ok(Self { strings })
    }
}

// ---------------------------------------------------------------------------
// Heartbeat
// ---------------------------------------------------------------------------

/// Device keepalive: `[0x11][len][nameLen][name]`.
///
/// Heartbeats are validated more strictly than other frames because they
/// arrive constantly from every device: a 3-byte minimum, the exact type
/// tag, and both length fields checked against the buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heartbeat {
    pub device: DeviceId,
}

/// Smallest possible heartbeat: header plus the name-length byte.
pub const HEARTBEAT_MIN_LEN: usize = 3;

impl WireMessage for Heartbeat {
    const TYPE: MessageType = MessageType::Heartbeat;

    fn encode_payload(&self, out: &mut Vec<u8>) -> Result<(), ProtocolError> {
        let name = self.device.as_str().as_bytes();
        let len = u8::try_from(name.len()).map_err(|_| {
            ProtocolError::StringTooLong {
                index: 0,
                len: name.len(),
            }
        })?;
        out.push(len);
        out.extend_from_slice(name);
        Ok(())
    }

    fn decode_payload(payload: &[u8]) -> Result<Self, ProtocolError> {
        let Some((&name_len, rest)) = payload.split_first() else {
            return Err(ProtocolError::TooShort {
                needed: 1,
                actual: 0,
            });
        };
        let name_len = usize::from(name_len);
        if rest.len() < name_len {
            return Err(ProtocolError::LengthMismatch {
                declared: name_len,
                available: rest.len(),
            });
        }
        let name = std::str::from_utf8(&rest[..name_len])
            .map_err(|_| ProtocolError::InvalidString { element: 0 })?;
        Ok(Self {
            device: DeviceId::new(name),
        })
    }

    fn from_frame(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < HEARTBEAT_MIN_LEN {
            return Err(ProtocolError::TooShort {
                needed: HEARTBEAT_MIN_LEN,
                actual: data.len(),
            });
        }
        if data[0] != Self::TYPE.as_byte() {
            return Err(ProtocolError::UnexpectedType {
                expected: Self::TYPE.as_byte(),
                found: data[0],
            });
        }
        let frame = codec::decode(data)?;
        Self::decode_payload(frame.payload)
    }
}

// ---------------------------------------------------------------------------
// Canvas
// ---------------------------------------------------------------------------

/// "Send me the whole canvas." Any payload is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncRequest;

impl WireMessage for SyncRequest {
    const TYPE: MessageType = MessageType::CanvasSyncRequest;

    fn encode_payload(&self, _out: &mut Vec<u8>) -> Result<(), ProtocolError> {
        Ok(())
    }

    fn decode_payload(_payload: &[u8]) -> Result<Self, ProtocolError> {
        Ok(Self)
    }
}

/// The complete canvas plus its sequence number.
///
/// ```text
/// [seq: u16 BE][red: 16 × u16 LE][green: 16 × u16 LE][blue: 16 × u16 LE]
/// ```
///
/// The sequence is big-endian but the rows are little-endian. The rows
/// follow the ESP32's native order; both sides use fixed-endian
/// conversions so the layout is the same on any host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FullFrame {
    pub sequence: u16,
    pub red: [u16; CANVAS_SIZE],
    pub green: [u16; CANVAS_SIZE],
    pub blue: [u16; CANVAS_SIZE],
}

impl WireMessage for FullFrame {
    const TYPE: MessageType = MessageType::CanvasFullFrame;

    fn encode_payload(&self, out: &mut Vec<u8>) -> Result<(), ProtocolError> {
        out.reserve(FULL_FRAME_PAYLOAD_LEN);
        out.extend_from_slice(&self.sequence.to_be_bytes());
        for channel in [&self.red, &self.green, &self.blue] {
            for row in channel {
                out.extend_from_slice(&row.to_le_bytes());
            }
        }
        Ok(())
    }

    fn decode_payload(payload: &[u8]) -> Result<Self, ProtocolError> {
        expect_len(payload, FULL_FRAME_PAYLOAD_LEN)?;

        let sequence = u16::from_be_bytes([payload[0], payload[1]]);
        let mut channels = [[0u16; CANVAS_SIZE]; 3];
        for (i, pair) in payload[2..].chunks_exact(2).enumerate() {
            channels[i / CANVAS_SIZE][i % CANVAS_SIZE] =
                u16::from_le_bytes([pair[0], pair[1]]);
        }
        let [red, green, blue] = channels;
        Ok(Self {
            sequence,
            red,
            green,
            blue,
        })
    }
}

/// Legacy incremental update: `[seq: u16 BE][count][pixel]*`.
///
/// Each pixel is two bytes, `[row << 4 | col][channel]`. An older firmware
/// revision sent three raw bytes per pixel; that layout is recognised only
/// to be rejected with [`ProtocolError::LegacyPixelEncoding`].
///
/// At most [`MAX_PIXELS_PER_BATCH`] pixels are carried; the encoder drops
/// the excess, as well as pixels whose coordinates don't fit a nibble.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBatch {
    pub sequence: u16,
    pub pixels: Vec<PixelUpdate>,
}

impl WireMessage for PixelBatch {
    const TYPE: MessageType = MessageType::CanvasPixelBatch;

    fn encode_payload(&self, out: &mut Vec<u8>) -> Result<(), ProtocolError> {
        let packed: Vec<[u8; 2]> = self
            .pixels
            .iter()
            .filter(|p| usize::from(p.row) < CANVAS_SIZE && usize::from(p.col) < CANVAS_SIZE)
            .take(MAX_PIXELS_PER_BATCH)
            .map(|p| [(p.row << 4) | p.col, p.channel.as_byte()])
            .collect();

        out.extend_from_slice(&self.sequence.to_be_bytes());
        out.push(packed.len() as u8);
        for pixel in packed {
            out.extend_from_slice(&pixel);
        }
        Ok(())
    }

    fn decode_payload(payload: &[u8]) -> Result<Self, ProtocolError> {
        if payload.len() < 3 {
            return Err(ProtocolError::TooShort {
                needed: 3,
                actual: payload.len(),
            });
        }
        let sequence = u16::from_be_bytes([payload[0], payload[1]]);
        let count = usize::from(payload[2]);
        let body = &payload[3..];

        if body.len() != count * 2 {
            if count > 0 && body.len() == count * 3 {
                return Err(ProtocolError::LegacyPixelEncoding { count });
            }
            return Err(ProtocolError::LengthMismatch {
                declared: count * 2,
                available: body.len(),
            });
        }

        let pixels = body
            .chunks_exact(2)
            .take(MAX_PIXELS_PER_BATCH)
            .filter_map(|pixel| {
                let channel = ColorChannel::from_byte(pixel[1])?;
                Some(PixelUpdate::new(pixel[0] >> 4, pixel[0] & 0x0F, channel))
            })
            .collect();
        Ok(Self { sequence, pixels })
    }
}

// ---------------------------------------------------------------------------
// Dispatch helper
// ---------------------------------------------------------------------------

/// A decoded canvas-topic message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CanvasMessage {
    SyncRequest,
    FullFrame(FullFrame),
    PixelBatch(PixelBatch),
}

impl CanvasMessage {
    /// Decodes any of the three canvas message kinds.
    ///
    /// # Errors
    /// [`ProtocolError::UnexpectedType`] if the frame is some other kind.
    pub fn from_frame(data: &[u8]) -> Result<Self, ProtocolError> {
        let frame = codec::decode(data)?;
        Self::from_raw(&frame)
    }

    pub fn from_raw(frame: &RawFrame<'_>) -> Result<Self, ProtocolError> {
        match frame.kind()? {
            MessageType::CanvasSyncRequest => Ok(Self::SyncRequest),
            MessageType::CanvasFullFrame => {
                FullFrame::decode_payload(frame.payload).map(Self::FullFrame)
            }
            MessageType::CanvasPixelBatch => {
                PixelBatch::decode_payload(frame.payload).map(Self::PixelBatch)
            }
            other => Err(ProtocolError::UnexpectedType {
                expected: MessageType::CanvasFullFrame.as_byte(),
                found: other.as_byte(),
            }),
        }
    }
}
