//! Error types for the protocol layer.
//!
//! Each crate in Fleetcast defines its own error enum. When you see a
//! `ProtocolError`, you know the bytes themselves were wrong (too short,
//! inconsistent lengths, values that don't fit the wire format), not the
//! network or the device registry.

/// Errors that can occur while encoding or decoding frames.
///
/// Every variant describes a single rejected message. None of them are
/// fatal: the coordinator logs the error and keeps serving other devices.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// The buffer is shorter than the fixed part of the structure being
    /// decoded (the 2-byte frame header, the 3-byte heartbeat minimum, ...).
    #[error("message too short: need at least {needed} bytes, got {actual}")]
    TooShort { needed: usize, actual: usize },

    /// A length field claims more bytes than the buffer actually holds,
    /// or the payload size doesn't match what the message kind requires.
    #[error("length mismatch: declared {declared} bytes but {available} available")]
    LengthMismatch { declared: usize, available: usize },

    /// A payload exceeds the 255-byte ceiling imposed by the 1-byte
    /// length field.
    #[error("payload too large: {size} bytes exceeds maximum of {max}")]
    PayloadTooLarge { size: usize, max: usize },

    /// The type byte doesn't name any known message kind.
    #[error("unknown message type 0x{0:02X}")]
    UnknownMessageType(u8),

    /// The frame decoded fine but carries a different message kind than
    /// the caller asked for.
    #[error("unexpected message type: expected 0x{expected:02X}, got 0x{found:02X}")]
    UnexpectedType { expected: u8, found: u8 },

    /// A device-config payload ended before element `element` (0-based)
    /// could be read completely.
    #[error("payload truncated at element {element}")]
    Truncated { element: usize },

    /// A string element is not valid UTF-8.
    #[error("element {element} is not valid UTF-8")]
    InvalidString { element: usize },

    /// Too many strings to fit the 1-byte count field.
    #[error("too many strings: {0} exceeds maximum of 255")]
    TooManyStrings(usize),

    /// A single string is longer than its 1-byte length prefix allows.
    #[error("string {index} length {len} exceeds maximum of 255")]
    StringTooLong { index: usize, len: usize },

    /// A pixel batch uses the retired 3-byte-per-pixel layout.
    #[error("pixel batch of {count} uses the legacy 3-byte pixel encoding")]
    LegacyPixelEncoding { count: usize },

    /// A value can't be represented in its wire field
    /// (e.g. a temperature outside the offset byte's range).
    #[error("value out of range: {0}")]
    OutOfRange(String),
}
