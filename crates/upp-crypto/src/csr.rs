//! Certificate signing requests for stored key pairs.
//!
//! The private key never leaves its backend: rcgen is handed a remote key
//! pair whose `sign` calls back into [`Crypto::sign`].

use std::sync::Arc;

use rcgen::{
    CertificateParams, DistinguishedName, DnType, KeyPair, PKCS_ECDSA_P256_SHA256,
    RemoteKeyPair, SignatureAlgorithm,
};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{backend::Crypto, error::CryptoError};

struct BackendKeyPair {
    crypto: Arc<dyn Crypto>,
    id: Uuid,
    // Uncompressed SEC1
    public_key: Vec<u8>,
}

impl RemoteKeyPair for BackendKeyPair {
    fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    fn sign(&self, msg: &[u8]) -> Result<Vec<u8>, rcgen::Error> {
        let raw = self.crypto.sign(self.id, msg).map_err(|err| {
            warn!(id = %self.id, error = %err, "signing certificate request failed");
            rcgen::Error::RemoteKeyError
        })?;
        let signature =
            p256::ecdsa::Signature::from_slice(&raw).map_err(|_| rcgen::Error::RemoteKeyError)?;
        Ok(signature.to_der().as_bytes().to_vec())
    }

    fn algorithm(&self) -> &'static SignatureAlgorithm {
        &PKCS_ECDSA_P256_SHA256
    }
}

/// Build a DER CSR with subject `C=<country>, O=<organization>, CN=<id>`.
pub fn certificate_request(
    crypto: Arc<dyn Crypto>,
    id: Uuid,
    country: &str,
    organization: &str,
) -> Result<Vec<u8>, CryptoError> {
    let raw = crypto.get_public_key(id)?;
    let mut public_key = Vec::with_capacity(raw.len() + 1);
    public_key.push(0x04);
    public_key.extend_from_slice(&raw);

    let key_pair = KeyPair::from_remote(Box::new(BackendKeyPair { crypto, id, public_key }))?;

    let mut subject = DistinguishedName::new();
    subject.push(DnType::CountryName, country);
    subject.push(DnType::OrganizationName, organization);
    subject.push(DnType::CommonName, id.to_string());

    let mut params = CertificateParams::default();
    params.distinguished_name = subject;

    let request = params.serialize_request(&key_pair)?;
    debug!(%id, "created certificate signing request");
    Ok(request.der().to_vec())
}
