//! PKCS#11 hardware backend.
//!
//! Keys live on the token as two objects per identity, tagged with the
//! identity's UUID bytes as `CKA_ID`. One logged-in session serves all
//! callers; a mutex serializes every device interaction, and composite
//! operations (existence check then create, lookup then sign) hold it
//! throughout.
//!
//! Device calls go through [`retry`], which recovers from transient and
//! session-level failures according to [`RetryPolicy`].

mod device;
mod error;
mod keystore;
mod pkcs11;
pub mod retry;
mod session;
mod signer;

use std::{fmt, path::PathBuf, sync::Arc};

use parking_lot::Mutex;
use serde::Deserialize;
use uuid::Uuid;
use zeroize::Zeroizing;

pub use self::{
    device::{DeviceError, ObjectTemplate, SECP256R1_OID, Token},
    error::{HsmError, SetupStage, TeardownStage},
    keystore::{private_label, public_label},
    pkcs11::CryptokiToken,
    retry::RetryPolicy,
    session::{SessionManager, SessionState},
};
use crate::{
    backend::{Crypto, KeyKind},
    csr,
    env::{Environment, SystemEnv},
    error::CryptoError,
    keycodec::PUBLIC_KEY_LEN,
};

/// HSM connection settings.
#[derive(Clone, Deserialize)]
pub struct HsmConfig {
    /// Path of the PKCS#11 shared library
    pub library_path: PathBuf,
    /// Index into the list of slots with a token
    #[serde(default)]
    pub slot_index: usize,
    /// User PIN
    pub pin: Zeroizing<String>,
    /// Retry budget per device call
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Create private keys with `CKA_EXTRACTABLE` set
    #[serde(default)]
    pub extractable_private_keys: bool,
}

impl HsmConfig {
    /// Settings with defaults for everything but library and PIN.
    pub fn new(library_path: impl Into<PathBuf>, pin: impl Into<String>) -> Self {
        Self {
            library_path: library_path.into(),
            slot_index: 0,
            pin: Zeroizing::new(pin.into()),
            retry: RetryPolicy::default(),
            extractable_private_keys: false,
        }
    }
}

impl fmt::Debug for HsmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HsmConfig")
            .field("library_path", &self.library_path)
            .field("slot_index", &self.slot_index)
            .field("pin", &"<redacted>")
            .field("retry", &self.retry)
            .field("extractable_private_keys", &self.extractable_private_keys)
            .finish()
    }
}

/// State behind the backend mutex.
pub(crate) struct Hsm<T: Token> {
    session: SessionManager<T>,
    env: Arc<dyn Environment>,
    policy: RetryPolicy,
    extractable: bool,
}

/// [`Crypto`] backed by a PKCS#11 token.
///
/// Clones share the session.
pub struct HsmBackend<T: Token> {
    inner: Arc<Mutex<Hsm<T>>>,
}

impl<T: Token> Clone for HsmBackend<T> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl HsmBackend<CryptokiToken> {
    /// Load the configured library and log in.
    pub fn open(config: &HsmConfig) -> Result<Self, HsmError> {
        Self::with_token(CryptokiToken::new(&config.library_path), config, Arc::new(SystemEnv))
    }
}

impl<T: Token> HsmBackend<T> {
    /// Backend over `token`, logged in before returning.
    pub fn with_token(
        token: T,
        config: &HsmConfig,
        env: Arc<dyn Environment>,
    ) -> Result<Self, HsmError> {
        let mut session = SessionManager::new(token, config.slot_index, config.pin.clone());
        session.setup()?;
        let hsm = Hsm {
            session,
            env,
            policy: config.retry,
            extractable: config.extractable_private_keys,
        };
        Ok(Self { inner: Arc::new(Mutex::new(hsm)) })
    }

    /// Current session state.
    pub fn session_state(&self) -> SessionState {
        self.inner.lock().session.state()
    }

    /// Tear the session down and reject further operations.
    pub fn close(&self) -> Result<(), HsmError> {
        self.inner.lock().session.close()
    }

    fn with_hsm<R>(
        &self,
        f: impl FnOnce(&mut Hsm<T>) -> Result<R, CryptoError>,
    ) -> Result<R, CryptoError> {
        f(&mut self.inner.lock())
    }
}

impl<T: Token + 'static> Crypto for HsmBackend<T> {
    fn generate_key(&self, id: Uuid) -> Result<(), CryptoError> {
        self.with_hsm(|hsm| hsm.generate_key(id))
    }

    fn set_key(&self, id: Uuid, private_key: &[u8]) -> Result<(), CryptoError> {
        self.with_hsm(|hsm| hsm.set_key(id, private_key))
    }

    fn set_public_key(&self, _id: Uuid, _public_key: &[u8]) -> Result<(), CryptoError> {
        Err(CryptoError::Unsupported("storing a bare public key"))
    }

    fn get_public_key(&self, id: Uuid) -> Result<[u8; PUBLIC_KEY_LEN], CryptoError> {
        self.with_hsm(|hsm| hsm.public_key(id))
    }

    fn private_key_exists(&self, id: Uuid) -> Result<bool, CryptoError> {
        self.with_hsm(|hsm| hsm.key_exists(id, KeyKind::Private))
    }

    fn public_key_exists(&self, id: Uuid) -> Result<bool, CryptoError> {
        self.with_hsm(|hsm| hsm.key_exists(id, KeyKind::Public))
    }

    fn sign_hash(&self, id: Uuid, hash: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.with_hsm(|hsm| hsm.sign_hash(id, hash))
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
    use super::*;

    #[test]
    fn config_debug_hides_pin() {
        let config = HsmConfig::new("/usr/lib/softhsm/libsofthsm2.so", "123456");
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("123456"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn config_defaults() {
        let config: HsmConfig =
            serde_json::from_str(r#"{"library_path": "/lib/pkcs11.so", "pin": "0000"}"#).unwrap();
        assert_eq!(config.slot_index, 0);
        assert_eq!(config.retry, RetryPolicy::default());
        assert!(!config.extractable_private_keys);
        assert_eq!(config.pin.as_str(), "0000");
    }

    #[test]
    fn open_fails_without_library() {
        let config = HsmConfig::new("/nonexistent/libpkcs11.so", "0000");
        assert!(matches!(
            HsmBackend::open(&config),
            Err(HsmError::Setup { stage: SetupStage::Initialize, .. })
        ));
    }
}
