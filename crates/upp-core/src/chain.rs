//! Per-identity chain state.
//!
//! Each identity that has signed a chained packet owns a slot holding the
//! signature of its most recent chained packet. Signers lock the slot for the
//! whole read-sign-record sequence, so concurrent chained signing for one
//! identity is serialized while other identities proceed in parallel.

use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;
use upp_proto::{Packet, SIGNATURE_LEN, Signature};
use uuid::Uuid;

use crate::error::ChainError;

/// Slot holding the last chained signature of one identity.
pub type ChainSlot = Arc<Mutex<Option<Signature>>>;

/// Last chained signature per identity.
#[derive(Debug, Default)]
pub struct ChainState {
    slots: Mutex<HashMap<Uuid, ChainSlot>>,
}

impl ChainState {
    /// The slot for `id`, created empty on first use.
    pub fn slot(&self, id: Uuid) -> ChainSlot {
        Arc::clone(self.slots.lock().entry(id).or_default())
    }

    /// Last chained signature of `id`.
    pub fn last(&self, id: Uuid) -> Option<Signature> {
        let slot = self.slots.lock().get(&id).cloned()?;
        *slot.lock()
    }

    /// Replace the last chained signature of `id` with persisted bytes.
    pub fn restore(&self, id: Uuid, signature: &[u8]) -> Result<(), ChainError> {
        let signature = Signature::try_from(signature)
            .map_err(|_| ChainError::InvalidLastSignature { id, len: signature.len() })?;
        *self.slot(id).lock() = Some(signature);
        Ok(())
    }

    /// Copy of every recorded last signature, for persistence.
    ///
    /// Waits for in-flight chained signs, one identity at a time, without
    /// holding up slot lookups for the others.
    pub fn snapshot(&self) -> HashMap<Uuid, Signature> {
        let slots: Vec<(Uuid, ChainSlot)> =
            self.slots.lock().iter().map(|(id, slot)| (*id, Arc::clone(slot))).collect();
        slots.into_iter().filter_map(|(id, slot)| Some((id, (*slot.lock())?))).collect()
    }
}

/// Whether `subsequent` links to `previous`: its previous-signature field
/// must equal the signature of `previous`.
pub fn check_chain_link(previous: &Packet, subsequent: &Packet) -> Result<bool, ChainError> {
    let signature = previous.signature().ok_or(ChainError::MissingSignature)?;
    let prev_signature = subsequent.prev_signature().ok_or(ChainError::NotChained)?;
    Ok(signature == prev_signature)
}

/// Previous-signature value of an identity's first chained packet.
pub const GENESIS_PREV_SIGNATURE: Signature = [0u8; SIGNATURE_LEN];
