//! [`Token`] over a Cryptoki library.

use std::path::PathBuf;

use cryptoki::{
    context::{CInitializeArgs, Pkcs11},
    error::{Error as CryptokiError, RvError},
    mechanism::Mechanism,
    object::{Attribute, AttributeType, KeyType, ObjectClass, ObjectHandle},
    session::{Session, UserType},
    slot::Slot,
    types::AuthPin,
};
use tracing::debug;

use super::device::{DeviceError, ObjectTemplate, Token};
use crate::backend::KeyKind;

fn device_error(function: &'static str) -> impl FnOnce(CryptokiError) -> DeviceError {
    move |err| match err {
        CryptokiError::Pkcs11(rv, ..) => DeviceError::ReturnCode { function, rv },
        source => DeviceError::Library { function, source },
    }
}

fn object_class(kind: KeyKind) -> ObjectClass {
    match kind {
        KeyKind::Private => ObjectClass::PRIVATE_KEY,
        KeyKind::Public => ObjectClass::PUBLIC_KEY,
    }
}

fn attributes(template: &ObjectTemplate) -> Vec<Attribute> {
    let mut attrs = vec![
        Attribute::Class(object_class(template.kind)),
        Attribute::KeyType(KeyType::EC),
        Attribute::Id(template.id.clone()),
        Attribute::Label(template.label.as_bytes().to_vec()),
        Attribute::Token(template.token),
        Attribute::Private(template.private),
    ];
    match template.kind {
        KeyKind::Public => attrs.push(Attribute::Verify(template.verify)),
        KeyKind::Private => attrs.extend([
            Attribute::Sensitive(template.sensitive),
            Attribute::Extractable(template.extractable),
            Attribute::Sign(template.sign),
        ]),
    }
    if let Some(params) = &template.ec_params {
        attrs.push(Attribute::EcParams(params.clone()));
    }
    if let Some(point) = &template.ec_point {
        attrs.push(Attribute::EcPoint(point.clone()));
    }
    if let Some(value) = &template.value {
        attrs.push(Attribute::Value(value.to_vec()));
    }
    attrs
}

/// A PKCS#11 library loaded from disk.
///
/// The library is loaded on [`Token::initialize`] and unloaded on
/// [`Token::finalize`], so a reset reloads it from `library`.
pub struct CryptokiToken {
    library: PathBuf,
    context: Option<Pkcs11>,
    session: Option<Session>,
}

impl CryptokiToken {
    /// Token backed by the library at `library`. Nothing is loaded yet.
    pub fn new(library: impl Into<PathBuf>) -> Self {
        Self { library: library.into(), context: None, session: None }
    }

    fn context(&self, function: &'static str) -> Result<&Pkcs11, DeviceError> {
        self.context
            .as_ref()
            .ok_or(DeviceError::ReturnCode { function, rv: RvError::CryptokiNotInitialized })
    }

    fn session(&self) -> Result<&Session, DeviceError> {
        self.session.as_ref().ok_or(DeviceError::NoSession)
    }
}

impl Token for CryptokiToken {
    type Slot = Slot;
    type Handle = ObjectHandle;

    fn initialize(&mut self) -> Result<(), DeviceError> {
        const ALREADY: RvError = RvError::CryptokiAlreadyInitialized;

        if self.context.is_some() {
            return Err(DeviceError::return_code("C_Initialize", ALREADY));
        }
        let context = Pkcs11::new(&self.library).map_err(device_error("C_LoadModule"))?;
        let result =
            context.initialize(CInitializeArgs::OsThreads).map_err(device_error("C_Initialize"));
        if matches!(&result, Ok(()) | Err(DeviceError::ReturnCode { rv: ALREADY, .. })) {
            debug!(library = %self.library.display(), "loaded PKCS#11 library");
            self.context = Some(context);
        }
        result
    }

    fn slots(&mut self) -> Result<Vec<Slot>, DeviceError> {
        self.context("C_GetSlotList")?.get_slots_with_token().map_err(device_error("C_GetSlotList"))
    }

    fn open_session(&mut self, slot: Slot) -> Result<(), DeviceError> {
        let session = self
            .context("C_OpenSession")?
            .open_rw_session(slot)
            .map_err(device_error("C_OpenSession"))?;
        self.session = Some(session);
        Ok(())
    }

    fn login(&mut self, pin: &str) -> Result<(), DeviceError> {
        let pin = AuthPin::new(pin.to_owned());
        self.session()?.login(UserType::User, Some(&pin)).map_err(device_error("C_Login"))
    }

    fn logout(&mut self) -> Result<(), DeviceError> {
        self.session()?.logout().map_err(device_error("C_Logout"))
    }

    fn close_session(&mut self) -> Result<(), DeviceError> {
        // Dropping the session calls C_CloseSession
        self.session.take().map(drop).ok_or(DeviceError::NoSession)
    }

    fn finalize(&mut self) -> Result<(), DeviceError> {
        self.session = None;
        // Dropping the context calls C_Finalize and unloads the library
        self.context
            .take()
            .map(drop)
            .ok_or(DeviceError::return_code("C_Finalize", RvError::CryptokiNotInitialized))
    }

    fn release(&mut self) {
        self.session = None;
        self.context = None;
    }

    fn find_objects(
        &mut self,
        id: &[u8],
        kind: KeyKind,
        max: usize,
    ) -> Result<Vec<ObjectHandle>, DeviceError> {
        let template = [Attribute::Id(id.to_vec()), Attribute::Class(object_class(kind))];
        let mut handles =
            self.session()?.find_objects(&template).map_err(device_error("C_FindObjects"))?;
        handles.truncate(max);
        Ok(handles)
    }

    fn ec_point(&mut self, handle: ObjectHandle) -> Result<Vec<u8>, DeviceError> {
        let attrs = self
            .session()?
            .get_attributes(handle, &[AttributeType::EcPoint])
            .map_err(device_error("C_GetAttributeValue"))?;
        attrs
            .into_iter()
            .find_map(|attr| match attr {
                Attribute::EcPoint(point) => Some(point),
                _ => None,
            })
            .ok_or(DeviceError::MissingAttribute("CKA_EC_POINT"))
    }

    fn create_object(&mut self, template: &ObjectTemplate) -> Result<ObjectHandle, DeviceError> {
        self.session()?.create_object(&attributes(template)).map_err(device_error("C_CreateObject"))
    }

    fn generate_key_pair(
        &mut self,
        public: &ObjectTemplate,
        private: &ObjectTemplate,
    ) -> Result<(ObjectHandle, ObjectHandle), DeviceError> {
        self.session()?
            .generate_key_pair(&Mechanism::EccKeyPairGen, &attributes(public), &attributes(private))
            .map_err(device_error("C_GenerateKeyPair"))
    }

    fn sign(&mut self, key: ObjectHandle, hash: &[u8]) -> Result<Vec<u8>, DeviceError> {
        self.session()?.sign(&Mechanism::Ecdsa, key, hash).map_err(device_error("C_Sign"))
    }
}
