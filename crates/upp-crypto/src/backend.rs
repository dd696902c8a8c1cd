//! The capability every signing backend provides.

use std::fmt;

use sha2::{Digest, Sha256};
use tracing::warn;
use uuid::Uuid;

use crate::{
    error::CryptoError,
    keycodec::{self, HASH_LEN, KeyCodecError, PUBLIC_KEY_LEN, SIGNATURE_LEN},
};

/// Half of a key pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyKind {
    /// Private scalar, used for signing
    Private,
    /// Public point, used for verification
    Public,
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Private => f.write_str("private"),
            Self::Public => f.write_str("public"),
        }
    }
}

/// P-256 key management and signing, keyed by identity.
///
/// Implementations are shared between threads. Composite operations (check
/// then create, look up then sign) must be atomic with respect to other calls
/// on the same backend.
///
/// Keys and signatures use the raw layouts from [`keycodec`]: public keys are
/// `X ‖ Y`, signatures are `r ‖ s`.
pub trait Crypto: Send + Sync {
    /// Create a new key pair for `id`.
    ///
    /// Fails with [`CryptoError::KeyExists`] if either half already exists.
    fn generate_key(&self, id: Uuid) -> Result<(), CryptoError>;

    /// Import a 32-byte private scalar and its derived public key.
    fn set_key(&self, id: Uuid, private_key: &[u8]) -> Result<(), CryptoError>;

    /// Store a public key for an identity whose private key lives elsewhere.
    fn set_public_key(&self, id: Uuid, public_key: &[u8]) -> Result<(), CryptoError>;

    /// Raw public key for `id`.
    fn get_public_key(&self, id: Uuid) -> Result<[u8; PUBLIC_KEY_LEN], CryptoError>;

    /// Whether a private key is stored for `id`.
    fn private_key_exists(&self, id: Uuid) -> Result<bool, CryptoError>;

    /// Whether a public key is stored for `id`.
    fn public_key_exists(&self, id: Uuid) -> Result<bool, CryptoError>;

    /// Sign a SHA-256 digest with the private key for `id`.
    fn sign_hash(&self, id: Uuid, hash: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// DER certificate signing request for the key pair of `id`.
    fn get_csr(&self, id: Uuid, country: &str, organization: &str)
    -> Result<Vec<u8>, CryptoError>;

    /// Hash `data` with SHA-256 and sign the digest.
    fn sign(&self, id: Uuid, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if data.is_empty() {
            return Err(CryptoError::InvalidInput("empty data cannot be signed".into()));
        }
        let hash = Sha256::digest(data);
        self.sign_hash(id, &hash)
    }

    /// Verify `signature` over `data` with the public key for `id`.
    ///
    /// Verification happens in software against the stored public key. A
    /// well-formed signature that does not match is `Ok(false)`.
    fn verify(&self, id: Uuid, data: &[u8], signature: &[u8]) -> Result<bool, CryptoError> {
        if data.is_empty() {
            return Err(CryptoError::InvalidInput("empty data cannot be verified".into()));
        }
        if signature.len() != SIGNATURE_LEN {
            return Err(KeyCodecError::InvalidSignatureLength(signature.len()).into());
        }
        let public_key = keycodec::public_key_from_raw(&self.get_public_key(id)?)?;
        let hash = Sha256::digest(data);
        Ok(keycodec::verify_prehash(&public_key, &hash, signature)?)
    }

    /// Like [`Crypto::private_key_exists`], but a failed lookup counts as
    /// "present" so callers never overwrite a key they could not see.
    fn private_key_exists_or_assume(&self, id: Uuid) -> bool {
        match self.private_key_exists(id) {
            Ok(exists) => exists,
            Err(err) => {
                warn!(%id, error = %err, "private key lookup failed, assuming key exists");
                true
            },
        }
    }
}

/// Reject anything that is not a SHA-256 digest.
pub(crate) fn check_hash_len(hash: &[u8]) -> Result<(), CryptoError> {
    if hash.len() == HASH_LEN {
        Ok(())
    } else {
        Err(CryptoError::InvalidInput(format!(
            "invalid hash size: expected {HASH_LEN}, got {}",
            hash.len()
        )))
    }
}

/// Reject the nil UUID as a key identity.
pub(crate) fn check_identity(id: Uuid) -> Result<(), CryptoError> {
    if id.is_nil() {
        Err(CryptoError::InvalidInput("UUID must not be nil".into()))
    } else {
        Ok(())
    }
}
