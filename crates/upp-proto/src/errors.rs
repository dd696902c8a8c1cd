//! Decode errors.

use thiserror::Error;

use crate::version::ProtocolVersion;

/// Result alias for wire-format operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors produced while decoding a packet.
///
/// Encoding is infallible; every variant here describes malformed input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Input is too short to carry a version tag.
    #[error("packet too short: {len} bytes")]
    TooShort {
        /// Length of the rejected input
        len: usize,
    },

    /// The tag at offset 1 is neither Signed nor Chained.
    #[error("invalid protocol version: {0:#04x}")]
    UnknownVersion(u8),

    /// Input ended in the middle of a field.
    #[error("unexpected end of input while reading {field}")]
    Truncated {
        /// Field being read
        field: &'static str,
    },

    /// A MessagePack marker that is not valid for this field.
    #[error("unexpected marker {marker:#04x} for {field}")]
    UnexpectedMarker {
        /// Field being read
        field: &'static str,
        /// Offending marker byte
        marker: u8,
    },

    /// A fixed-size byte field has the wrong length.
    #[error("{field} has {actual} bytes, expected {expected}")]
    FieldLength {
        /// Field being read
        field: &'static str,
        /// Required length
        expected: usize,
        /// Length found on the wire
        actual: usize,
    },

    /// An integer field does not fit its type.
    #[error("{field} value {value} out of range")]
    ValueOutOfRange {
        /// Field being read
        field: &'static str,
        /// Decoded value
        value: u64,
    },

    /// Array header announces the wrong number of elements for the version.
    #[error("packet has {actual} elements, expected {expected}")]
    ElementCount {
        /// Element count required by the version tag
        expected: usize,
        /// Element count in the array header
        actual: usize,
    },

    /// Bytes remain after the packet array.
    #[error("{0} trailing bytes after packet")]
    TrailingBytes(usize),

    /// Packet decoded fine but is not the requested variant.
    #[error("type assertion failed: expected {expected:?} packet, got {actual:?}")]
    WrongVariant {
        /// Variant the caller asked for
        expected: ProtocolVersion,
        /// Variant found on the wire
        actual: ProtocolVersion,
    },
}
