//! The protocol engine.

use std::{collections::HashMap, sync::Arc};

use sha2::{Digest, Sha256};
use tracing::{debug, trace};
use upp_crypto::{Crypto, keycodec::HASH_LEN};
use upp_proto::{
    ChainedPacket, Hint, Packet, ProtocolVersion, SIGNATURE_FRAME_LEN, SIGNATURE_LEN, Signature,
    SignedPacket, append_signature,
};
use uuid::Uuid;

use crate::{
    chain::{ChainState, GENESIS_PREV_SIGNATURE},
    error::EngineError,
    identity::IdentityRegistry,
};

/// Signs and verifies UPPs on top of a [`Crypto`] backend.
///
/// Chained packets link to the previous chained packet of the same identity
/// through its signature. The engine keeps that last signature in memory;
/// [`Protocol::chain_snapshot`] and [`Protocol::restore_last_signature`] let a
/// caller persist it across restarts.
pub struct Protocol {
    crypto: Arc<dyn Crypto>,
    identities: IdentityRegistry,
    chains: ChainState,
}

impl Protocol {
    /// Engine over `crypto` with no registered names and empty chains.
    pub fn new(crypto: Arc<dyn Crypto>) -> Self {
        Self { crypto, identities: IdentityRegistry::default(), chains: ChainState::default() }
    }

    /// The key backend.
    pub fn crypto(&self) -> &Arc<dyn Crypto> {
        &self.crypto
    }

    /// Bind `name` to the identity `id`.
    pub fn register_identity(&self, name: impl Into<String>, id: Uuid) -> Option<Uuid> {
        self.identities.register(name, id)
    }

    /// Identity for `name`: a registered binding, or `name` parsed as a UUID.
    pub fn identity(&self, name: &str) -> Result<Uuid, EngineError> {
        self.identities.resolve(name)
    }

    /// Sign `packet` with its identity's key and return the signed bytes.
    ///
    /// Signing a chained packet records its signature as the identity's last
    /// chained signature. The packet's own previous-signature field is taken
    /// as given.
    pub fn sign(&self, packet: &Packet) -> Result<Vec<u8>, EngineError> {
        match packet {
            Packet::Signed(_) => self.sign_packet(packet).map(|(bytes, _)| bytes),
            Packet::Chained(_) => {
                let slot = self.chains.slot(packet.uuid());
                let mut last = slot.lock();
                let (bytes, signature) = self.sign_packet(packet)?;
                *last = Some(signature);
                Ok(bytes)
            },
        }
    }

    /// Build and sign a packet carrying `hash` for the identity `name`.
    ///
    /// For [`ProtocolVersion::Chained`] the previous signature is the
    /// identity's last chained signature (64 zero bytes for the first one),
    /// and the new signature replaces it. Chained signing for one identity is
    /// serialized; a failed attempt leaves the chain untouched.
    pub fn sign_hash_extended(
        &self,
        name: &str,
        hash: &[u8],
        version: ProtocolVersion,
        hint: Hint,
    ) -> Result<Vec<u8>, EngineError> {
        if hash.len() != HASH_LEN {
            return Err(EngineError::InvalidHashLength(hash.len()));
        }
        let uuid = self.identity(name)?;
        let payload = hash.to_vec();

        match version {
            ProtocolVersion::Signed => {
                let packet = SignedPacket { uuid, hint, payload, signature: None };
                self.sign_packet(&packet.into()).map(|(bytes, _)| bytes)
            },
            ProtocolVersion::Chained => {
                let slot = self.chains.slot(uuid);
                let mut last = slot.lock();
                let prev_signature = last.unwrap_or(GENESIS_PREV_SIGNATURE);
                let packet = ChainedPacket { uuid, prev_signature, hint, payload, signature: None };
                let (bytes, signature) = self.sign_packet(&packet.into())?;
                *last = Some(signature);
                trace!(%uuid, "advanced chain");
                Ok(bytes)
            },
        }
    }

    /// [`Protocol::sign_hash_extended`] with [`Hint::BINARY`].
    pub fn sign_hash(
        &self,
        name: &str,
        hash: &[u8],
        version: ProtocolVersion,
    ) -> Result<Vec<u8>, EngineError> {
        self.sign_hash_extended(name, hash, version, Hint::BINARY)
    }

    /// Hash `data` with SHA-256 and sign the digest as a binary payload.
    pub fn sign_data(
        &self,
        name: &str,
        data: &[u8],
        version: ProtocolVersion,
    ) -> Result<Vec<u8>, EngineError> {
        if data.is_empty() {
            return Err(EngineError::EmptyInput);
        }
        self.sign_hash(name, &Sha256::digest(data), version)
    }

    /// Check the trailing signature of `packet` against the public key of
    /// `name`.
    ///
    /// The signed region is everything before the final 66 bytes; the last 64
    /// bytes are the signature. A mismatch is `Ok(false)`.
    pub fn verify(&self, name: &str, packet: &[u8]) -> Result<bool, EngineError> {
        if packet.len() <= SIGNATURE_FRAME_LEN {
            return Err(EngineError::TooShort { len: packet.len() });
        }
        let id = self.identity(name)?;
        let data = &packet[..packet.len() - SIGNATURE_FRAME_LEN];
        let signature = &packet[packet.len() - SIGNATURE_LEN..];
        let valid = self.crypto.verify(id, data, signature)?;
        debug!(%id, valid, "verified packet");
        Ok(valid)
    }

    /// Verify `packet` for `name`, then decode it.
    pub fn verify_and_decode(&self, name: &str, packet: &[u8]) -> Result<Packet, EngineError> {
        if !self.verify(name, packet)? {
            return Err(EngineError::InvalidSignature);
        }
        Ok(Packet::decode(packet)?)
    }

    /// Last chained signature of `id`, if it has signed a chained packet.
    pub fn last_signature(&self, id: Uuid) -> Option<Signature> {
        self.chains.last(id)
    }

    /// Seed the chain of `id` with a persisted last signature.
    pub fn restore_last_signature(&self, id: Uuid, signature: &[u8]) -> Result<(), EngineError> {
        Ok(self.chains.restore(id, signature)?)
    }

    /// Every identity's last chained signature.
    pub fn chain_snapshot(&self) -> HashMap<Uuid, Signature> {
        self.chains.snapshot()
    }

    fn sign_packet(&self, packet: &Packet) -> Result<(Vec<u8>, Signature), EngineError> {
        let mut body = packet.signable_bytes();
        let raw = self.crypto.sign(packet.uuid(), &body)?;
        let signature = Signature::try_from(raw.as_slice())
            .map_err(|_| EngineError::InvalidSignatureLength(raw.len()))?;
        append_signature(&mut body, &signature);
        Ok((body, signature))
    }
}
