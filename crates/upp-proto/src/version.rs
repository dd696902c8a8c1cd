//! Version tags and payload hints.

use std::fmt;

use crate::errors::ProtocolError;

/// Packet variant, carried as the first array element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ProtocolVersion {
    /// Signed packet
    Signed = 0x22,
    /// Signed packet that also carries the previous packet's signature
    Chained = 0x23,
}

impl ProtocolVersion {
    /// Wire value of this tag.
    pub const fn to_u8(self) -> u8 {
        self as u8
    }

    /// Parse a wire tag.
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x22 => Some(Self::Signed),
            0x23 => Some(Self::Chained),
            _ => None,
        }
    }

    /// Number of array elements a packet of this version has.
    pub const fn element_count(self) -> usize {
        match self {
            Self::Signed => 5,
            Self::Chained => 6,
        }
    }
}

impl TryFrom<u8> for ProtocolVersion {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::from_u8(value).ok_or(ProtocolError::UnknownVersion(value))
    }
}

impl From<ProtocolVersion> for u8 {
    fn from(version: ProtocolVersion) -> Self {
        version.to_u8()
    }
}

/// Payload semantics tag.
///
/// Any byte is accepted on the wire; the named constants are the values the
/// protocol assigns meaning to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Hint(pub u8);

impl Hint {
    /// Payload is opaque binary data (usually a SHA-256 hash)
    pub const BINARY: Self = Self(0x00);
    /// Disable the identity's hash
    pub const DISABLE: Self = Self(0xFA);
    /// Enable the identity's hash
    pub const ENABLE: Self = Self(0xFB);
    /// Delete the identity's hash
    pub const DELETE: Self = Self(0xFC);
}

impl From<u8> for Hint {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

impl From<Hint> for u8 {
    fn from(hint: Hint) -> Self {
        hint.0
    }
}

impl fmt::Display for Hint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::BINARY => f.write_str("binary"),
            Self::DISABLE => f.write_str("disable"),
            Self::ENABLE => f.write_str("enable"),
            Self::DELETE => f.write_str("delete"),
            Self(other) => write!(f, "{other:#04x}"),
        }
    }
}
