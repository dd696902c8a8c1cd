//! P-256 key management and signing for UPP identities.
//!
//! Every identity (a UUID) owns one ECDSA P-256 key pair. The [`Crypto`]
//! trait is what the protocol engine signs and verifies through; two
//! backends implement it:
//!
//! - [`SoftwareBackend`]: keys as bytes in a [`Keystore`], signing in process
//! - [`HsmBackend`]: keys as objects on a PKCS#11 token, signing on the device
//!
//! # Components
//!
//! - [`keycodec`]: raw key and signature layouts
//! - [`hsm`]: token seam, session lifecycle and retry policy
//! - [`csr`]: certificate signing requests via a remote key pair
//! - [`registration`]: self-signed key registration documents
//! - [`mod@env`]: sleep and randomness abstraction used by retries

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod csr;
pub mod env;
pub mod error;
pub mod hsm;
pub mod keycodec;
pub mod registration;
pub mod software;

pub use backend::{Crypto, KeyKind};
pub use env::{Environment, SystemEnv};
pub use error::CryptoError;
pub use hsm::{HsmBackend, HsmConfig, HsmError, RetryPolicy};
pub use keycodec::{KeyCodecError, PUBLIC_KEY_LEN, SIGNATURE_LEN};
pub use software::{Keystore, MemoryKeystore, SoftwareBackend};
