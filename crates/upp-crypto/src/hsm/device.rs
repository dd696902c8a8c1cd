//! The seam between HSM logic and a PKCS#11 token.
//!
//! [`Token`] is the handful of Cryptoki calls the backend needs, with session
//! bookkeeping pushed into the implementation. Production uses
//! [`CryptokiToken`](super::CryptokiToken); tests substitute a simulated token
//! that can fail on demand.

use std::fmt;

use cryptoki::error::RvError;
use thiserror::Error;
use zeroize::Zeroizing;

use crate::backend::KeyKind;

/// DER encoding of the secp256r1 OID (1.2.840.10045.3.1.7).
pub const SECP256R1_OID: [u8; 10] = [0x06, 0x08, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x03, 0x01, 0x07];

/// A failed token call.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// The library returned a `CKR_*` code
    #[error("{function} returned {rv:?}")]
    ReturnCode {
        /// Cryptoki function name
        function: &'static str,
        /// Return value
        rv: RvError,
    },

    /// Failure outside the device, such as loading the library
    #[error("{function} failed")]
    Library {
        /// Cryptoki function name
        function: &'static str,
        /// Underlying error
        #[source]
        source: cryptoki::error::Error,
    },

    /// A call needing a session was made without one
    #[error("no open session")]
    NoSession,

    /// The device omitted an attribute it was asked for
    #[error("device returned no {0} attribute")]
    MissingAttribute(&'static str),
}

impl DeviceError {
    /// Error for `function` returning `rv`.
    pub fn return_code(function: &'static str, rv: RvError) -> Self {
        Self::ReturnCode { function, rv }
    }

    /// The `CKR_*` code, if the device produced one.
    pub fn rv(&self) -> Option<RvError> {
        match self {
            Self::ReturnCode { rv, .. } => Some(*rv),
            _ => None,
        }
    }
}

/// Attributes of a key object to create on the token.
#[derive(Clone)]
pub struct ObjectTemplate {
    /// `CKA_CLASS`
    pub kind: KeyKind,
    /// `CKA_ID`, the identity's 16 UUID bytes
    pub id: Vec<u8>,
    /// `CKA_LABEL`
    pub label: String,
    /// `CKA_TOKEN`
    pub token: bool,
    /// `CKA_PRIVATE`
    pub private: bool,
    /// `CKA_SENSITIVE` (private keys)
    pub sensitive: bool,
    /// `CKA_EXTRACTABLE` (private keys)
    pub extractable: bool,
    /// `CKA_SIGN` (private keys)
    pub sign: bool,
    /// `CKA_VERIFY` (public keys)
    pub verify: bool,
    /// `CKA_EC_PARAMS`
    pub ec_params: Option<Vec<u8>>,
    /// `CKA_EC_POINT`, device-encoded
    pub ec_point: Option<Vec<u8>>,
    /// `CKA_VALUE`, the private scalar
    pub value: Option<Zeroizing<Vec<u8>>>,
}

impl fmt::Debug for ObjectTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectTemplate")
            .field("kind", &self.kind)
            .field("label", &self.label)
            .field("token", &self.token)
            .field("private", &self.private)
            .field("sensitive", &self.sensitive)
            .field("extractable", &self.extractable)
            .field("sign", &self.sign)
            .field("verify", &self.verify)
            .field("ec_params", &self.ec_params.is_some())
            .field("ec_point", &self.ec_point.is_some())
            .field("value", &self.value.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

/// Minimal PKCS#11 surface used by the HSM backend.
///
/// Implementations own at most one context and one session. Object calls act
/// on the open session and fail if there is none.
pub trait Token: Send {
    /// Slot identifier.
    type Slot: Copy + fmt::Debug + Send;

    /// Object handle.
    type Handle: Copy + fmt::Debug + Send;

    /// `C_Initialize`
    fn initialize(&mut self) -> Result<(), DeviceError>;

    /// Slots with a token present, in library order.
    fn slots(&mut self) -> Result<Vec<Self::Slot>, DeviceError>;

    /// Open a read-write session on `slot`.
    fn open_session(&mut self, slot: Self::Slot) -> Result<(), DeviceError>;

    /// Log in as the normal user.
    fn login(&mut self, pin: &str) -> Result<(), DeviceError>;

    /// `C_Logout`
    fn logout(&mut self) -> Result<(), DeviceError>;

    /// `C_CloseSession`
    fn close_session(&mut self) -> Result<(), DeviceError>;

    /// `C_Finalize`
    fn finalize(&mut self) -> Result<(), DeviceError>;

    /// Drop session and context state after a failed teardown.
    fn release(&mut self);

    /// Up to `max` key objects with the given id and class.
    fn find_objects(
        &mut self,
        id: &[u8],
        kind: KeyKind,
        max: usize,
    ) -> Result<Vec<Self::Handle>, DeviceError>;

    /// `CKA_EC_POINT` of a public key object.
    fn ec_point(&mut self, handle: Self::Handle) -> Result<Vec<u8>, DeviceError>;

    /// `C_CreateObject`
    fn create_object(&mut self, template: &ObjectTemplate) -> Result<Self::Handle, DeviceError>;

    /// `C_GenerateKeyPair` with `CKM_EC_KEY_PAIR_GEN`.
    fn generate_key_pair(
        &mut self,
        public: &ObjectTemplate,
        private: &ObjectTemplate,
    ) -> Result<(Self::Handle, Self::Handle), DeviceError>;

    /// `C_Sign` with `CKM_ECDSA` over a prehashed digest.
    fn sign(&mut self, key: Self::Handle, hash: &[u8]) -> Result<Vec<u8>, DeviceError>;
}
