//! Engine error types.

use thiserror::Error;
use upp_crypto::CryptoError;
use upp_proto::ProtocolError;
use uuid::Uuid;

/// Errors from signing and verifying packets.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A hash argument is not a SHA-256 digest
    #[error("invalid hash size: expected 32 bytes, got {0}")]
    InvalidHashLength(usize),

    /// Data to hash and sign is empty
    #[error("empty input")]
    EmptyInput,

    /// Packet cannot hold a signature frame
    #[error("packet is too short to be verified: {len} bytes")]
    TooShort {
        /// Input length
        len: usize,
    },

    /// Name is neither registered nor a UUID
    #[error("unknown identity {0:?}")]
    UnknownIdentity(String),

    /// The backend produced a signature of the wrong size
    #[error("backend returned a {0}-byte signature, expected 64")]
    InvalidSignatureLength(usize),

    /// Signature does not verify
    #[error("signature verification failed")]
    InvalidSignature,

    /// Key backend failure
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Malformed packet
    #[error(transparent)]
    Codec(#[from] ProtocolError),

    /// Chain bookkeeping failure
    #[error(transparent)]
    Chain(#[from] ChainError),
}

/// Errors from chain linkage checks and chain state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    /// The earlier packet is unsigned
    #[error("previous packet carries no signature")]
    MissingSignature,

    /// The later packet has no previous-signature field
    #[error("subsequent packet is not chained")]
    NotChained,

    /// A persisted last signature has the wrong size
    #[error("last signature for {id} has {len} bytes, expected 64")]
    InvalidLastSignature {
        /// Identity
        id: Uuid,
        /// Length found
        len: usize,
    },
}
