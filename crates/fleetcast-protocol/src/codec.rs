//! Frame codec and the [`WireMessage`] trait.
//!
//! Every message exchanged with a device is a *frame*:
//!
//! ```text
//! ┌──────────┬────────────┬──────────────────────────┐
//! │ type: u8 │ length: u8 │ payload: [u8; length]    │
//! └──────────┴────────────┴──────────────────────────┘
//! ```
//!
//! The generic layer ([`encode`] / [`decode`]) only knows about this header.
//! The typed layer is the [`WireMessage`] trait: each message kind says
//! which type byte it uses and how its payload is laid out, and gets
//! `to_frame` / `from_frame` for free. This is the same "strategy" idea as
//! a serde codec, except the layouts are fixed by the device firmware
//! instead of derived.

use crate::{MessageType, ProtocolError};

/// Maximum payload size. The length field is a single byte.
pub const MAX_PAYLOAD_SIZE: usize = 255;

/// Size of the `[type][length]` header.
pub const HEADER_LEN: usize = 2;

/// A decoded frame that borrows its payload from the input buffer.
///
/// Decoding never copies: `payload` is a slice into the bytes you passed
/// to [`decode`], bounded by the declared length. Anything after that bound
/// is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawFrame<'a> {
    /// The raw type byte. Kept raw so unknown types can still be logged.
    pub msg_type: u8,
    pub payload: &'a [u8],
}

impl RawFrame<'_> {
    /// Interprets the type byte.
    ///
    /// # Errors
    /// [`ProtocolError::UnknownMessageType`] for bytes outside the table.
    pub fn kind(&self) -> Result<MessageType, ProtocolError> {
        MessageType::try_from(self.msg_type)
    }
}

/// Splits a buffer into its type byte and payload.
///
/// # Errors
/// - [`ProtocolError::TooShort`] if the buffer can't hold the 2-byte header.
/// - [`ProtocolError::LengthMismatch`] if the length byte claims more bytes
///   than follow the header.
pub fn decode(data: &[u8]) -> Result<RawFrame<'_>, ProtocolError> {
    if data.len() < HEADER_LEN {
        return Err(ProtocolError::TooShort {
            needed: HEADER_LEN,
            actual: data.len(),
        });
    }

    let msg_type = data[0];
    let length = usize::from(data[1]);
    let available = data.len() - HEADER_LEN;

    if length > available {
        return Err(ProtocolError::LengthMismatch {
            declared: length,
            available,
        });
    }
    // A u8 can't exceed the ceiling today; the check pins the contract in
    // case the header ever grows.
    if length > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::PayloadTooLarge {
            size: length,
            max: MAX_PAYLOAD_SIZE,
        });
    }

    Ok(RawFrame {
        msg_type,
        payload: &data[HEADER_LEN..HEADER_LEN + length],
    })
}

/// Builds a frame from a type byte and payload.
///
/// # Errors
/// [`ProtocolError::PayloadTooLarge`] if `payload` exceeds 255 bytes.
pub fn encode(msg_type: u8, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let length = u8::try_from(payload.len()).map_err(|_| {
        ProtocolError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD_SIZE,
        }
    })?;

    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.push(msg_type);
    frame.push(length);
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// A message kind with a fixed payload layout.
///
/// Implementors supply the type tag and the payload (de)serialization;
/// the provided methods add and strip the frame header.
///
/// ## Example
///
/// ```rust
/// use fleetcast_protocol::{CurrentWeather, WireMessage};
///
/// let frame = CurrentWeather { temp_f: 20 }.to_frame().unwrap();
/// assert_eq!(frame, vec![0x01, 0x01, 0x46]);
///
/// let decoded = CurrentWeather::from_frame(&frame).unwrap();
/// assert_eq!(decoded.temp_f, 20);
/// ```
pub trait WireMessage: Sized {
    /// The type byte this message travels under.
    const TYPE: MessageType;

    /// Appends the payload bytes (no header) to `out`.
    ///
    /// # Errors
    /// Returns an error if a field can't be represented on the wire.
    fn encode_payload(&self, out: &mut Vec<u8>) -> Result<(), ProtocolError>;

    /// Parses a payload (no header).
    ///
    /// # Errors
    /// Returns an error if the payload is malformed for this message kind.
    fn decode_payload(payload: &[u8]) -> Result<Self, ProtocolError>;

    /// Encodes the message into a complete frame.
    fn to_frame(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut payload = Vec::new();
        self.encode_payload(&mut payload)?;
        encode(Self::TYPE.as_byte(), &payload)
    }

    /// Decodes a complete frame, checking that its type byte matches.
    fn from_frame(data: &[u8]) -> Result<Self, ProtocolError> {
        let frame = decode(data)?;
        Self::from_raw(&frame)
    }

    /// Decodes an already-split frame, checking its type byte.
    fn from_raw(frame: &RawFrame<'_>) -> Result<Self, ProtocolError> {
        if frame.msg_type != Self::TYPE.as_byte() {
            return Err(ProtocolError::UnexpectedType {
                expected: Self::TYPE.as_byte(),
                found: frame.msg_type,
            });
        }
        Self::decode_payload(frame.payload)
    }
}
