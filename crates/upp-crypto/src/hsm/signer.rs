use tracing::trace;
use uuid::Uuid;

use super::{Hsm, device::Token};
use crate::{
    backend::{KeyKind, check_hash_len},
    error::CryptoError,
    keycodec::{self, KeyCodecError, PUBLIC_KEY_LEN, SIGNATURE_LEN},
};

impl<T: Token> Hsm<T> {
    pub(crate) fn public_key(&mut self, id: Uuid) -> Result<[u8; PUBLIC_KEY_LEN], CryptoError> {
        let handle = self.handle(id, KeyKind::Public)?;
        let encoded = self.retry(|token| token.ec_point(handle))?;
        let key = keycodec::decode_device_public_key(&encoded)?;
        Ok(keycodec::public_key_to_raw(&key))
    }

    pub(crate) fn sign_hash(&mut self, id: Uuid, hash: &[u8]) -> Result<Vec<u8>, CryptoError> {
        check_hash_len(hash)?;
        let handle = self.handle(id, KeyKind::Private)?;
        let signature = self.retry(|token| token.sign(handle, hash))?;
        if signature.len() != SIGNATURE_LEN {
            return Err(KeyCodecError::InvalidSignatureLength(signature.len()).into());
        }
        trace!(%id, "signed hash on HSM");
        Ok(signature)
    }
}
