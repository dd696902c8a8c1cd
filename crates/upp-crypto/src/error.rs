//! Errors surfaced by signing backends.

use thiserror::Error;
use uuid::Uuid;

use crate::{backend::KeyKind, hsm::HsmError, keycodec::KeyCodecError};

/// Errors from key management and signing.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Caller supplied an unusable argument
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A key for the identity is already stored
    #[error("{kind} key with UUID {id} already exists")]
    KeyExists {
        /// Identity
        id: Uuid,
        /// Kind of the key that was found
        kind: KeyKind,
    },

    /// More keys for the identity than there may be
    #[error("found {count} {kind} keys with UUID {id}, expected at most one")]
    KeyConsistency {
        /// Identity
        id: Uuid,
        /// Kind of the duplicated key
        kind: KeyKind,
        /// Number of matches returned by the search
        count: usize,
    },

    /// No key of the requested kind is stored for the identity
    #[error("no {kind} key with UUID {id} found")]
    KeyNotFound {
        /// Identity
        id: Uuid,
        /// Kind of the missing key
        kind: KeyKind,
    },

    /// Key or signature bytes are malformed
    #[error(transparent)]
    KeyCodec(#[from] KeyCodecError),

    /// Software signing failed
    #[error("signing failed")]
    Signing(#[source] p256::ecdsa::Error),

    /// The backend cannot perform this operation
    #[error("{0} is not supported by this backend")]
    Unsupported(&'static str),

    /// Device access failed
    #[error(transparent)]
    Hsm(#[from] HsmError),

    /// Building a certificate request failed
    #[error("failed to create certificate signing request")]
    Csr(#[from] rcgen::Error),

    /// Serializing a key registration failed
    #[error("failed to serialize key registration")]
    Json(#[from] serde_json::Error),

    /// The keystore collaborator refused a write
    #[error("keystore: {0}")]
    Keystore(String),
}
