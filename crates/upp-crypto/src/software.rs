//! Software backend over a byte keystore.
//!
//! Keys are stored as raw bytes under two labels per identity: the private
//! scalar under `"<uuid>"`, the raw public key under `"_<uuid>"`.

use std::{collections::HashMap, sync::Arc};

use p256::SecretKey;
use parking_lot::{Mutex, RwLock};
use rand::rngs::OsRng;
use tracing::{debug, info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::{
    backend::{Crypto, KeyKind, check_hash_len, check_identity},
    csr,
    error::CryptoError,
    keycodec::{self, PRIVATE_KEY_LEN, PUBLIC_KEY_LEN},
};

/// Byte storage for software keys.
pub trait Keystore: Send + Sync {
    /// Bytes stored under `label`.
    fn get_key(&self, label: &str) -> Option<Zeroizing<Vec<u8>>>;

    /// Store `key` under `label`, replacing any previous value.
    fn set_key(&self, label: &str, key: &[u8]) -> Result<(), CryptoError>;

    /// Drop whatever is stored under `label`.
    fn remove_key(&self, label: &str) -> Result<(), CryptoError>;
}

/// Keystore label of the private key for `id`.
pub fn private_label(id: Uuid) -> String {
    id.to_string()
}

/// Keystore label of the public key for `id`.
pub fn public_label(id: Uuid) -> String {
    format!("_{id}")
}

/// In-process keystore.
#[derive(Default)]
pub struct MemoryKeystore {
    keys: RwLock<HashMap<String, Zeroizing<Vec<u8>>>>,
}

impl MemoryKeystore {
    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.keys.read().len()
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.keys.read().is_empty()
    }
}

impl Keystore for MemoryKeystore {
    fn get_key(&self, label: &str) -> Option<Zeroizing<Vec<u8>>> {
        self.keys.read().get(label).cloned()
    }

    fn set_key(&self, label: &str, key: &[u8]) -> Result<(), CryptoError> {
        self.keys.write().insert(label.to_owned(), Zeroizing::new(key.to_vec()));
        Ok(())
    }

    fn remove_key(&self, label: &str) -> Result<(), CryptoError> {
        self.keys.write().remove(label);
        Ok(())
    }
}

/// [`Crypto`] implemented in process with keys held by a [`Keystore`].
pub struct SoftwareBackend<K> {
    keystore: Arc<K>,
    // Serializes check-then-write sequences
    writes: Arc<Mutex<()>>,
}

impl<K> Clone for SoftwareBackend<K> {
    fn clone(&self) -> Self {
        Self { keystore: Arc::clone(&self.keystore), writes: Arc::clone(&self.writes) }
    }
}

impl<K: Keystore> SoftwareBackend<K> {
    /// Backend over `keystore`.
    pub fn new(keystore: K) -> Self {
        Self::shared(Arc::new(keystore))
    }

    /// Backend over a keystore shared with other owners.
    pub fn shared(keystore: Arc<K>) -> Self {
        Self { keystore, writes: Arc::new(Mutex::new(())) }
    }

    /// The underlying keystore.
    pub fn keystore(&self) -> &Arc<K> {
        &self.keystore
    }

    fn ensure_absent(&self, id: Uuid) -> Result<(), CryptoError> {
        if self.keystore.get_key(&private_label(id)).is_some() {
            return Err(CryptoError::KeyExists { id, kind: KeyKind::Private });
        }
        if self.keystore.get_key(&public_label(id)).is_some() {
            return Err(CryptoError::KeyExists { id, kind: KeyKind::Public });
        }
        Ok(())
    }

    // Public half first; a failed private write takes it back out so the
    // identity is left empty rather than verify-only.
    fn store_pair(&self, id: Uuid, secret: &SecretKey) -> Result<(), CryptoError> {
        let public_key = keycodec::public_key_to_raw(&secret.public_key());
        let mut scalar = Zeroizing::new([0u8; PRIVATE_KEY_LEN]);
        scalar.copy_from_slice(&secret.to_bytes());
        self.keystore.set_key(&public_label(id), &public_key)?;
        if let Err(err) = self.keystore.set_key(&private_label(id), scalar.as_slice()) {
            if let Err(cleanup) = self.keystore.remove_key(&public_label(id)) {
                warn!(%id, error = %cleanup, "could not remove public key after failed import");
            }
            return Err(err);
        }
        Ok(())
    }

    fn secret_key(&self, id: Uuid) -> Result<SecretKey, CryptoError> {
        let bytes = self
            .keystore
            .get_key(&private_label(id))
            .ok_or(CryptoError::KeyNotFound { id, kind: KeyKind::Private })?;
        Ok(keycodec::secret_key_from_bytes(&bytes)?)
    }
}

impl<K: Keystore + 'static> Crypto for SoftwareBackend<K> {
    fn generate_key(&self, id: Uuid) -> Result<(), CryptoError> {
        check_identity(id)?;
        let _guard = self.writes.lock();
        self.ensure_absent(id)?;

        let secret = SecretKey::random(&mut OsRng);
        self.store_pair(id, &secret)?;
        info!(%id, "generated software key pair");
        Ok(())
    }

    fn set_key(&self, id: Uuid, private_key: &[u8]) -> Result<(), CryptoError> {
        if private_key.len() != PRIVATE_KEY_LEN {
            return Err(CryptoError::InvalidInput(format!(
                "unexpected length for ECDSA private key: expected {PRIVATE_KEY_LEN}, got {}",
                private_key.len()
            )));
        }
        check_identity(id)?;
        let secret = keycodec::secret_key_from_bytes(private_key)?;

        let _guard = self.writes.lock();
        self.ensure_absent(id)?;
        self.store_pair(id, &secret)?;
        info!(%id, "imported software key pair");
        Ok(())
    }

    fn set_public_key(&self, id: Uuid, public_key: &[u8]) -> Result<(), CryptoError> {
        check_identity(id)?;
        keycodec::public_key_from_raw(public_key)?;

        let _guard = self.writes.lock();
        if self.keystore.get_key(&public_label(id)).is_some() {
            return Err(CryptoError::KeyExists { id, kind: KeyKind::Public });
        }
        self.keystore.set_key(&public_label(id), public_key)?;
        debug!(%id, "stored public key");
        Ok(())
    }

    fn get_public_key(&self, id: Uuid) -> Result<[u8; PUBLIC_KEY_LEN], CryptoError> {
        let bytes = self
            .keystore
            .get_key(&public_label(id))
            .ok_or(CryptoError::KeyNotFound { id, kind: KeyKind::Public })?;
        let key = keycodec::public_key_from_raw(&bytes)?;
        Ok(keycodec::public_key_to_raw(&key))
    }

    fn private_key_exists(&self, id: Uuid) -> Result<bool, CryptoError> {
        Ok(self.keystore.get_key(&private_label(id)).is_some())
    }

    fn public_key_exists(&self, id: Uuid) -> Result<bool, CryptoError> {
        Ok(self.keystore.get_key(&public_label(id)).is_some())
    }

    fn sign_hash(&self, id: Uuid, hash: &[u8]) -> Result<Vec<u8>, CryptoError> {
        check_hash_len(hash)?;
        let secret = self.secret_key(id)?;
        let signature = keycodec::sign_prehash(&secret, hash).map_err(CryptoError::Signing)?;
        Ok(signature.to_vec())
    }

    fn get_csr(
        &self,
        id: Uuid,
        country: &str,
        organization: &str,
    ) -> Result<Vec<u8>, CryptoError> {
        csr::certificate_request(Arc::new(self.clone()), id, country, organization)
    }
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;

    use super::*;
    use crate::keycodec::KeyCodecError;

    fn backend() -> SoftwareBackend<MemoryKeystore> {
        SoftwareBackend::new(MemoryKeystore::default())
    }

    #[test]
    fn labels() {
        let id = Uuid::from_u128(0xabc);
        assert_eq!(private_label(id), "00000000-0000-0000-0000-000000000abc");
        assert_eq!(public_label(id), "_00000000-0000-0000-0000-000000000abc");
    }

    #[test]
    fn generate_stores_both_halves() {
        let backend = backend();
        let id = Uuid::new_v4();
        assert!(!backend.private_key_exists(id).unwrap());

        backend.generate_key(id).unwrap();

        assert!(backend.private_key_exists(id).unwrap());
        assert!(backend.public_key_exists(id).unwrap());
        assert_eq!(backend.keystore().len(), 2);
    }

    #[test]
    fn generate_twice_conflicts() {
        let backend = backend();
        let id = Uuid::new_v4();
        backend.generate_key(id).unwrap();
        assert!(matches!(
            backend.generate_key(id),
            Err(CryptoError::KeyExists { kind: KeyKind::Private, .. })
        ));
    }

    #[test]
    fn set_key_derives_public_key() {
        let backend = backend();
        let id = Uuid::new_v4();
        let mut one = [0u8; 32];
        one[31] = 1;
        backend.set_key(id, &one).unwrap();

        assert_eq!(
            backend.get_public_key(id).unwrap(),
            hex!(
                "6b17d1f2e12c4247f8bce6e563a440f277037d812deb33a0f4a13945d898c296"
                "4fe342e2fe1a7f9b8ee7eb4a7c0f9e162bce33576b315ececbb6406837bf51f5"
            )
        );
    }

    #[test]
    fn set_key_rejects_bad_input() {
        let backend = backend();
        let id = Uuid::new_v4();
        assert!(matches!(backend.set_key(id, &[1u8; 31]), Err(CryptoError::InvalidInput(_))));
        assert!(matches!(
            backend.set_key(Uuid::nil(), &[1u8; 32]),
            Err(CryptoError::InvalidInput(_))
        ));
        assert!(matches!(
            backend.set_key(id, &[0u8; 32]),
            Err(CryptoError::KeyCodec(KeyCodecError::PrivateKeyRange))
        ));
        assert!(backend.keystore().is_empty());
    }

    #[test]
    fn public_only_identity_verifies_but_cannot_sign() {
        let signer = backend();
        let id = Uuid::new_v4();
        signer.generate_key(id).unwrap();
        let signature = signer.sign(id, b"message").unwrap();

        let verifier = backend();
        verifier.set_public_key(id, &signer.get_public_key(id).unwrap()).unwrap();
        assert!(verifier.verify(id, b"message", &signature).unwrap());
        assert!(!verifier.private_key_exists(id).unwrap());
        assert!(matches!(
            verifier.sign(id, b"message"),
            Err(CryptoError::KeyNotFound { kind: KeyKind::Private, .. })
        ));
        assert!(matches!(
            verifier.set_public_key(id, &[0u8; 64]),
            Err(CryptoError::KeyCodec(KeyCodecError::NotOnCurve))
        ));
    }

    #[test]
    fn sign_checks_input() {
        let backend = backend();
        let id = Uuid::new_v4();
        backend.generate_key(id).unwrap();

        assert!(matches!(backend.sign(id, b""), Err(CryptoError::InvalidInput(_))));
        assert!(matches!(backend.sign_hash(id, &[0u8; 31]), Err(CryptoError::InvalidInput(_))));
        assert_eq!(backend.sign_hash(id, &[7u8; 32]).unwrap().len(), 64);
    }

    #[test]
    fn verify_rejects_tampering() {
        let backend = backend();
        let id = Uuid::new_v4();
        backend.generate_key(id).unwrap();
        let mut signature = backend.sign(id, b"payload").unwrap();

        assert!(backend.verify(id, b"payload", &signature).unwrap());
        assert!(!backend.verify(id, b"paylaod", &signature).unwrap());

        signature[10] ^= 0x80;
        assert!(!backend.verify(id, b"payload", &signature).unwrap());
        assert!(matches!(
            backend.verify(id, b"payload", &signature[..63]),
            Err(CryptoError::KeyCodec(KeyCodecError::InvalidSignatureLength(63)))
        ));
    }

    #[test]
    fn csr_is_der() {
        let backend = backend();
        let id = Uuid::new_v4();
        backend.generate_key(id).unwrap();

        let csr = backend.get_csr(id, "DE", "Example Org").unwrap();
        // SEQUENCE
        assert_eq!(csr[0], 0x30);
        let needle = id.to_string();
        assert!(csr.windows(needle.len()).any(|w| w == needle.as_bytes()));
    }

    /// Memory keystore that refuses private-key writes.
    #[derive(Default)]
    struct PublicOnly(MemoryKeystore);

    impl Keystore for PublicOnly {
        fn get_key(&self, label: &str) -> Option<Zeroizing<Vec<u8>>> {
            self.0.get_key(label)
        }

        fn set_key(&self, label: &str, key: &[u8]) -> Result<(), CryptoError> {
            if label.starts_with('_') {
                self.0.set_key(label, key)
            } else {
                Err(CryptoError::Keystore("read-only".into()))
            }
        }

        fn remove_key(&self, label: &str) -> Result<(), CryptoError> {
            self.0.remove_key(label)
        }
    }

    #[test]
    fn failed_private_write_leaves_identity_empty() {
        let backend = SoftwareBackend::new(PublicOnly::default());
        let id = Uuid::new_v4();

        assert!(matches!(backend.generate_key(id), Err(CryptoError::Keystore(_))));
        assert!(!backend.public_key_exists(id).unwrap());
        assert!(backend.keystore().0.is_empty());

        // A retry hits the same write failure, not a key conflict
        assert!(matches!(backend.set_key(id, &[1u8; 32]), Err(CryptoError::Keystore(_))));
        assert!(backend.keystore().0.is_empty());
    }
}
