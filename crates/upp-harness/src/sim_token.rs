//! In-memory PKCS#11 token with fault injection.
//!
//! The token enforces the same call discipline a real library does (no
//! object calls without a logged-in session, no double login, no slot list
//! before initialization) and signs with software P-256 keys. Tests script
//! failures per operation with [`SimToken::fail_next`] and inspect the call
//! log afterwards.

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use cryptoki::error::RvError;
use p256::SecretKey;
use parking_lot::{Mutex, MutexGuard};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::trace;
use upp_crypto::{
    KeyKind,
    hsm::{DeviceError, ObjectTemplate, Token},
    keycodec,
};

/// PIN the simulated token accepts unless configured otherwise.
pub const DEFAULT_PIN: &str = "1234";

/// Token operations, for fault scripts and the call log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimOp {
    /// `C_Initialize`
    Initialize,
    /// `C_GetSlotList`
    Slots,
    /// `C_OpenSession`
    OpenSession,
    /// `C_Login`
    Login,
    /// `C_Logout`
    Logout,
    /// `C_CloseSession`
    CloseSession,
    /// `C_Finalize`
    Finalize,
    /// `C_FindObjects`
    FindObjects,
    /// `C_GetAttributeValue` for `CKA_EC_POINT`
    EcPoint,
    /// `C_CreateObject`
    CreateObject,
    /// `C_GenerateKeyPair`
    GenerateKeyPair,
    /// `C_Sign`
    Sign,
}

impl SimOp {
    fn function(self) -> &'static str {
        match self {
            Self::Initialize => "C_Initialize",
            Self::Slots => "C_GetSlotList",
            Self::OpenSession => "C_OpenSession",
            Self::Login => "C_Login",
            Self::Logout => "C_Logout",
            Self::CloseSession => "C_CloseSession",
            Self::Finalize => "C_Finalize",
            Self::FindObjects => "C_FindObjects",
            Self::EcPoint => "C_GetAttributeValue",
            Self::CreateObject => "C_CreateObject",
            Self::GenerateKeyPair => "C_GenerateKeyPair",
            Self::Sign => "C_Sign",
        }
    }
}

/// A key object stored on the simulated token.
#[derive(Debug, Clone)]
pub struct SimObject {
    /// Object handle
    pub handle: u64,
    /// Public or private
    pub kind: KeyKind,
    /// `CKA_ID`
    pub id: Vec<u8>,
    /// `CKA_LABEL`
    pub label: String,
    /// `CKA_TOKEN`
    pub token: bool,
    /// `CKA_PRIVATE`
    pub private: bool,
    /// `CKA_SENSITIVE`
    pub sensitive: bool,
    /// `CKA_EXTRACTABLE`
    pub extractable: bool,
    /// `CKA_SIGN`
    pub sign: bool,
    /// `CKA_VERIFY`
    pub verify: bool,
    /// `CKA_EC_PARAMS`
    pub ec_params: Option<Vec<u8>>,
    /// `CKA_EC_POINT` of public keys
    pub ec_point: Option<Vec<u8>>,
    secret: Option<SecretKey>,
}

struct State {
    pin: String,
    slots: usize,
    initialized: bool,
    session_open: bool,
    logged_in: bool,
    objects: Vec<SimObject>,
    next_handle: u64,
    faults: HashMap<SimOp, VecDeque<RvError>>,
    calls: Vec<SimOp>,
    rng: ChaCha8Rng,
    signature_len: Option<usize>,
    ec_point_override: Option<Vec<u8>>,
}

impl State {
    fn require_initialized(&self, op: SimOp) -> Result<(), DeviceError> {
        if self.initialized {
            Ok(())
        } else {
            Err(DeviceError::return_code(op.function(), RvError::CryptokiNotInitialized))
        }
    }

    fn require_session(&self, op: SimOp) -> Result<(), DeviceError> {
        self.require_initialized(op)?;
        if self.session_open {
            Ok(())
        } else {
            Err(DeviceError::return_code(op.function(), RvError::SessionHandleInvalid))
        }
    }

    fn require_login(&self, op: SimOp) -> Result<(), DeviceError> {
        self.require_session(op)?;
        if self.logged_in {
            Ok(())
        } else {
            Err(DeviceError::return_code(op.function(), RvError::UserNotLoggedIn))
        }
    }

    fn insert(&mut self, template: &ObjectTemplate, secret: Option<SecretKey>) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        self.objects.push(SimObject {
            handle,
            kind: template.kind,
            id: template.id.clone(),
            label: template.label.clone(),
            token: template.token,
            private: template.private,
            sensitive: template.sensitive,
            extractable: template.extractable,
            sign: template.sign,
            verify: template.verify,
            ec_params: template.ec_params.clone(),
            ec_point: template.ec_point.clone(),
            secret,
        });
        handle
    }

    fn object(&self, op: SimOp, handle: u64) -> Result<&SimObject, DeviceError> {
        self.objects
            .iter()
            .find(|object| object.handle == handle)
            .ok_or(DeviceError::return_code(op.function(), RvError::ObjectHandleInvalid))
    }

    fn create(&mut self, template: &ObjectTemplate) -> Result<u64, DeviceError> {
        let op = SimOp::CreateObject;
        let secret = match template.kind {
            KeyKind::Public => {
                if template.ec_point.is_none() {
                    return Err(DeviceError::return_code(op.function(), RvError::TemplateIncomplete));
                }
                None
            },
            KeyKind::Private => {
                let value = template.value.as_ref().ok_or(DeviceError::return_code(
                    op.function(),
                    RvError::TemplateIncomplete,
                ))?;
                let secret = SecretKey::from_slice(value).map_err(|_| {
                    DeviceError::return_code(op.function(), RvError::AttributeValueInvalid)
                })?;
                Some(secret)
            },
        };
        Ok(self.insert(template, secret))
    }
}

/// Simulated [`Token`]. Clones share the same device.
#[derive(Clone)]
pub struct SimToken {
    state: Arc<Mutex<State>>,
}

impl Default for SimToken {
    fn default() -> Self {
        Self::new()
    }
}

impl SimToken {
    /// Token with one slot, [`DEFAULT_PIN`] and key generation seeded with 0.
    pub fn new() -> Self {
        let state = State {
            pin: DEFAULT_PIN.to_owned(),
            slots: 1,
            initialized: false,
            session_open: false,
            logged_in: false,
            objects: Vec::new(),
            next_handle: 1,
            faults: HashMap::new(),
            calls: Vec::new(),
            rng: ChaCha8Rng::seed_from_u64(0),
            signature_len: None,
            ec_point_override: None,
        };
        Self { state: Arc::new(Mutex::new(state)) }
    }

    /// Accept `pin` instead of [`DEFAULT_PIN`].
    pub fn with_pin(self, pin: &str) -> Self {
        self.state.lock().pin = pin.to_owned();
        self
    }

    /// Report `slots` slots with a token.
    pub fn with_slots(self, slots: usize) -> Self {
        self.state.lock().slots = slots;
        self
    }

    /// Seed key generation.
    pub fn with_seed(self, seed: u64) -> Self {
        self.state.lock().rng = ChaCha8Rng::seed_from_u64(seed);
        self
    }

    /// Fail the next call of `op` with `rv`.
    pub fn fail_next(&self, op: SimOp, rv: RvError) {
        self.fail_times(op, rv, 1);
    }

    /// Fail the next `times` calls of `op` with `rv`.
    pub fn fail_times(&self, op: SimOp, rv: RvError, times: usize) {
        let mut state = self.state.lock();
        let queue = state.faults.entry(op).or_default();
        queue.extend(std::iter::repeat(rv).take(times));
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<SimOp> {
        self.state.lock().calls.clone()
    }

    /// Number of calls of `op` made so far.
    pub fn call_count(&self, op: SimOp) -> usize {
        self.state.lock().calls.iter().filter(|call| **call == op).count()
    }

    /// Forget the call log.
    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// All stored objects, in creation order.
    pub fn objects(&self) -> Vec<SimObject> {
        self.state.lock().objects.clone()
    }

    /// Store an object directly, bypassing session checks.
    pub fn plant(&self, template: &ObjectTemplate) -> Result<u64, DeviceError> {
        self.state.lock().create(template)
    }

    /// Truncate or pad every signature to `len` bytes.
    pub fn set_signature_len(&self, len: Option<usize>) {
        self.state.lock().signature_len = len;
    }

    /// Return `point` for every `CKA_EC_POINT` query.
    pub fn set_ec_point(&self, point: Option<Vec<u8>>) {
        self.state.lock().ec_point_override = point;
    }

    /// Mark the library initialized by someone else.
    pub fn initialize_externally(&self) {
        self.state.lock().initialized = true;
    }

    /// Drop the session on the device side, as a token reset would.
    pub fn drop_session(&self) {
        let mut state = self.state.lock();
        state.session_open = false;
        state.logged_in = false;
    }

    /// Whether the library is initialized.
    pub fn is_initialized(&self) -> bool {
        self.state.lock().initialized
    }

    /// Whether a session is open and logged in.
    pub fn is_logged_in(&self) -> bool {
        let state = self.state.lock();
        state.session_open && state.logged_in
    }

    fn enter(&self, op: SimOp) -> Result<MutexGuard<'_, State>, DeviceError> {
        let mut state = self.state.lock();
        state.calls.push(op);
        if let Some(rv) = state.faults.get_mut(&op).and_then(VecDeque::pop_front) {
            trace!(?op, ?rv, "injected fault");
            return Err(DeviceError::return_code(op.function(), rv));
        }
        Ok(state)
    }
}

impl Token for SimToken {
    type Slot = usize;
    type Handle = u64;

    fn initialize(&mut self) -> Result<(), DeviceError> {
        let op = SimOp::Initialize;
        let mut state = self.enter(op)?;
        if state.initialized {
            return Err(DeviceError::return_code(op.function(), RvError::CryptokiAlreadyInitialized));
        }
        state.initialized = true;
        Ok(())
    }

    fn slots(&mut self) -> Result<Vec<usize>, DeviceError> {
        let state = self.enter(SimOp::Slots)?;
        state.require_initialized(SimOp::Slots)?;
        Ok((0..state.slots).collect())
    }

    fn open_session(&mut self, slot: usize) -> Result<(), DeviceError> {
        let op = SimOp::OpenSession;
        let mut state = self.enter(op)?;
        state.require_initialized(op)?;
        if slot >= state.slots {
            return Err(DeviceError::return_code(op.function(), RvError::SlotIdInvalid));
        }
        state.session_open = true;
        state.logged_in = false;
        Ok(())
    }

    fn login(&mut self, pin: &str) -> Result<(), DeviceError> {
        let op = SimOp::Login;
        let mut state = self.enter(op)?;
        state.require_session(op)?;
        if state.logged_in {
            return Err(DeviceError::return_code(op.function(), RvError::UserAlreadyLoggedIn));
        }
        if pin != state.pin {
            return Err(DeviceError::return_code(op.function(), RvError::PinIncorrect));
        }
        state.logged_in = true;
        Ok(())
    }

    fn logout(&mut self) -> Result<(), DeviceError> {
        let op = SimOp::Logout;
        let mut state = self.enter(op)?;
        state.require_login(op)?;
        state.logged_in = false;
        Ok(())
    }

    fn close_session(&mut self) -> Result<(), DeviceError> {
        let op = SimOp::CloseSession;
        let mut state = self.enter(op)?;
        state.require_session(op)?;
        state.session_open = false;
        state.logged_in = false;
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), DeviceError> {
        let op = SimOp::Finalize;
        let mut state = self.enter(op)?;
        state.require_initialized(op)?;
        state.initialized = false;
        state.session_open = false;
        state.logged_in = false;
        Ok(())
    }

    fn release(&mut self) {
        let mut state = self.state.lock();
        state.initialized = false;
        state.session_open = false;
        state.logged_in = false;
    }

    fn find_objects(
        &mut self,
        id: &[u8],
        kind: KeyKind,
        max: usize,
    ) -> Result<Vec<u64>, DeviceError> {
        let state = self.enter(SimOp::FindObjects)?;
        state.require_login(SimOp::FindObjects)?;
        Ok(state
            .objects
            .iter()
            .filter(|object| object.kind == kind && object.id == id)
            .map(|object| object.handle)
            .take(max)
            .collect())
    }

    fn ec_point(&mut self, handle: u64) -> Result<Vec<u8>, DeviceError> {
        let op = SimOp::EcPoint;
        let state = self.enter(op)?;
        state.require_login(op)?;
        let object = state.object(op, handle)?;
        let point = object
            .ec_point
            .clone()
            .ok_or(DeviceError::return_code(op.function(), RvError::AttributeTypeInvalid))?;
        Ok(state.ec_point_override.clone().unwrap_or(point))
    }

    fn create_object(&mut self, template: &ObjectTemplate) -> Result<u64, DeviceError> {
        let mut state = self.enter(SimOp::CreateObject)?;
        state.require_login(SimOp::CreateObject)?;
        state.create(template)
    }

    fn generate_key_pair(
        &mut self,
        public: &ObjectTemplate,
        private: &ObjectTemplate,
    ) -> Result<(u64, u64), DeviceError> {
        let mut state = self.enter(SimOp::GenerateKeyPair)?;
        state.require_login(SimOp::GenerateKeyPair)?;

        let secret = SecretKey::random(&mut state.rng);
        let mut public = public.clone();
        public.ec_point = Some(keycodec::device_public_key(&secret.public_key()).to_vec());

        let public_handle = state.insert(&public, None);
        let private_handle = state.insert(private, Some(secret));
        Ok((public_handle, private_handle))
    }

    fn sign(&mut self, key: u64, hash: &[u8]) -> Result<Vec<u8>, DeviceError> {
        let op = SimOp::Sign;
        let state = self.enter(op)?;
        state.require_login(op)?;

        let object = state.object(op, key)?;
        let secret = match (&object.secret, object.sign) {
            (Some(secret), true) => secret,
            _ => return Err(DeviceError::return_code(op.function(), RvError::KeyFunctionNotPermitted)),
        };
        let mut signature = keycodec::sign_prehash(secret, hash)
            .map_err(|_| DeviceError::return_code(op.function(), RvError::DataLenRange))?
            .to_vec();
        if let Some(len) = state.signature_len {
            signature.resize(len, 0);
        }
        Ok(signature)
    }
}
