//! Key objects on the token: lookup, generation and import.

use tracing::info;
use uuid::Uuid;
use zeroize::Zeroizing;

use super::{
    Hsm,
    device::{ObjectTemplate, SECP256R1_OID, Token},
};
use crate::{
    backend::{KeyKind, check_identity},
    error::CryptoError,
    keycodec::{self, PRIVATE_KEY_LEN},
};

// Existence checks fetch a few extra matches so duplicates are reported.
const EXISTENCE_SEARCH_LIMIT: usize = 5;
const HANDLE_SEARCH_LIMIT: usize = 2;

/// `CKA_LABEL` of the public key object for `id`.
pub fn public_label(id: Uuid) -> String {
    format!("{id}_pub")
}

/// `CKA_LABEL` of the private key object for `id`.
pub fn private_label(id: Uuid) -> String {
    format!("{id}_priv")
}

impl<T: Token> Hsm<T> {
    fn find(&mut self, id: Uuid, kind: KeyKind, max: usize) -> Result<Vec<T::Handle>, CryptoError> {
        Ok(self.retry(|token| token.find_objects(id.as_bytes(), kind, max))?)
    }

    /// Whether exactly one key of `kind` exists for `id`.
    pub(crate) fn key_exists(&mut self, id: Uuid, kind: KeyKind) -> Result<bool, CryptoError> {
        match self.find(id, kind, EXISTENCE_SEARCH_LIMIT)?.len() {
            0 => Ok(false),
            1 => Ok(true),
            count => Err(CryptoError::KeyConsistency { id, kind, count }),
        }
    }

    /// Handle of the single key of `kind` for `id`.
    pub(crate) fn handle(&mut self, id: Uuid, kind: KeyKind) -> Result<T::Handle, CryptoError> {
        let handles = self.find(id, kind, HANDLE_SEARCH_LIMIT)?;
        match handles.as_slice() {
            [handle] => Ok(*handle),
            [] => Err(CryptoError::KeyNotFound { id, kind }),
            _ => Err(CryptoError::KeyConsistency { id, kind, count: handles.len() }),
        }
    }

    fn ensure_absent(&mut self, id: Uuid) -> Result<(), CryptoError> {
        for kind in [KeyKind::Private, KeyKind::Public] {
            if self.key_exists(id, kind)? {
                return Err(CryptoError::KeyExists { id, kind });
            }
        }
        Ok(())
    }

    fn public_template(&self, id: Uuid) -> ObjectTemplate {
        ObjectTemplate {
            kind: KeyKind::Public,
            id: id.as_bytes().to_vec(),
            label: public_label(id),
            token: true,
            private: true,
            sensitive: false,
            extractable: false,
            sign: false,
            verify: true,
            ec_params: Some(SECP256R1_OID.to_vec()),
            ec_point: None,
            value: None,
        }
    }

    fn private_template(&self, id: Uuid) -> ObjectTemplate {
        ObjectTemplate {
            kind: KeyKind::Private,
            id: id.as_bytes().to_vec(),
            label: private_label(id),
            token: true,
            private: true,
            sensitive: true,
            extractable: self.extractable,
            sign: true,
            verify: false,
            ec_params: None,
            ec_point: None,
            value: None,
        }
    }

    pub(crate) fn generate_key(&mut self, id: Uuid) -> Result<(), CryptoError> {
        check_identity(id)?;
        self.ensure_absent(id)?;

        let public = self.public_template(id);
        let private = self.private_template(id);
        self.retry(|token| token.generate_key_pair(&public, &private))?;
        info!(%id, "generated key pair on HSM");
        Ok(())
    }

    pub(crate) fn set_key(&mut self, id: Uuid, private_key: &[u8]) -> Result<(), CryptoError> {
        if private_key.len() != PRIVATE_KEY_LEN {
            return Err(CryptoError::InvalidInput(format!(
                "unexpected length for ECDSA private key: expected {PRIVATE_KEY_LEN}, got {}",
                private_key.len()
            )));
        }
        check_identity(id)?;
        self.ensure_absent(id)?;

        let secret = keycodec::secret_key_from_bytes(private_key)?;

        let mut public = self.public_template(id);
        public.ec_point = Some(keycodec::device_public_key(&secret.public_key()).to_vec());

        let mut private = self.private_template(id);
        private.ec_params = Some(SECP256R1_OID.to_vec());
        private.value = Some(Zeroizing::new(private_key.to_vec()));

        self.retry(|token| token.create_object(&public))?;
        self.retry(|token| token.create_object(&private))?;
        info!(%id, "imported key pair into HSM");
        Ok(())
    }
}
