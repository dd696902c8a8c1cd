//! UPP protocol engine.
//!
//! Turns hashes into signed or chained packets for registered identities and
//! checks packets produced elsewhere. Key custody is delegated to a
//! [`upp_crypto::Crypto`] backend; the wire format lives in [`upp_proto`].
//!
//! # Components
//!
//! - [`protocol`]: the [`Protocol`] engine (sign, chain, verify)
//! - [`chain`]: per-identity last-signature state and linkage checks
//! - [`identity`]: name to UUID resolution
//! - [`error`]: engine and chain errors

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod chain;
pub mod error;
pub mod identity;
pub mod protocol;

pub use chain::{ChainState, GENESIS_PREV_SIGNATURE, check_chain_link};
pub use error::{ChainError, EngineError};
pub use identity::IdentityRegistry;
pub use protocol::Protocol;
