//! Wire format for UPPs (signed and chained protocol packages).
//!
//! A packet is a MessagePack array whose element order is fixed and whose
//! field names never appear on the wire:
//!
//! ```text
//! Signed:  [0x22, identity(16), hint, payload, signature]
//! Chained: [0x23, identity(16), prev_signature(64), hint, payload, signature]
//! ```
//!
//! The version tag is a positive fixint directly after the one-byte array
//! header, so the variant of any packet can be read at byte offset 1 without
//! parsing the rest.
//!
//! The signature is the last element on purpose. An unsigned packet ends in a
//! single `nil` byte; dropping that byte yields exactly the bytes that get
//! signed, and the signature is then re-appended as a `bin8` element (`0xC4
//! 0x40` followed by 64 raw `r ‖ s` bytes). Verification undoes this by
//! splitting off the last [`SIGNATURE_FRAME_LEN`] bytes.
//!
//! # Security
//!
//! Decoding never panics. Every length is checked against the remaining input
//! before anything is sliced, and identity and signature fields must have
//! their exact sizes.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod errors;
mod msgpack;
pub mod packet;
pub mod version;

pub use errors::{ProtocolError, Result};
pub use packet::{
    ChainedPacket, IDENTITY_LEN, Packet, SIGNATURE_FRAME_LEN, SIGNATURE_LEN, Signature,
    SignedPacket, VERSION_OFFSET, append_signature, decode_chained, decode_signed,
};
pub use version::{Hint, ProtocolVersion};
