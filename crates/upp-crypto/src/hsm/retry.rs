//! Recovery policy for failed device calls.
//!
//! Every failure is sorted into one recovery class:
//!
//! | Class              | Action                                   |
//! |--------------------|------------------------------------------|
//! | `Backoff`          | sleep `delay` plus up to 5% jitter       |
//! | `ResetSession`     | tear down and re-establish the session   |
//! | `BackoffThenReset` | sleep, then reset (device was removed)   |
//! | `Fatal`            | fail immediately                         |
//! | `Unrecognized`     | fail immediately                         |
//!
//! `max_attempts` counts invocations of the operation, so a policy of three
//! attempts survives two recoverable failures.

use std::time::Duration;

use cryptoki::error::RvError;
use serde::Deserialize;
use tracing::{debug, error, warn};

use super::{Hsm, device::DeviceError, device::Token, error::HsmError};
use crate::env::Environment;

/// Upper bound of the jitter added to each backoff, as a fraction of the
/// delay.
pub const MAX_JITTER: f64 = 0.05;

/// How to recover from a failed device call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Wait and try again
    Backoff,
    /// Re-establish the session and try again
    ResetSession,
    /// Wait, re-establish the session and try again
    BackoffThenReset,
    /// Retrying cannot help
    Fatal,
    /// Outside every known class
    Unrecognized,
}

impl Recovery {
    fn waits(self) -> bool {
        matches!(self, Self::Backoff | Self::BackoffThenReset)
    }

    fn resets(self) -> bool {
        matches!(self, Self::ResetSession | Self::BackoffThenReset)
    }
}

/// Recovery class of a device error.
pub fn classify(err: &DeviceError) -> Recovery {
    match err {
        DeviceError::ReturnCode { rv, .. } => classify_return_code(*rv),
        DeviceError::NoSession => Recovery::ResetSession,
        DeviceError::Library { .. } | DeviceError::MissingAttribute(_) => Recovery::Fatal,
    }
}

/// Recovery class of a `CKR_*` code.
pub fn classify_return_code(rv: RvError) -> Recovery {
    match rv {
        RvError::HostMemory
        | RvError::FunctionFailed
        | RvError::DataInvalid
        | RvError::DataLenRange
        | RvError::DeviceError
        | RvError::DeviceMemory
        | RvError::EncryptedDataInvalid
        | RvError::EncryptedDataLenRange
        | RvError::KeySizeRange
        | RvError::KeyIndigestible
        | RvError::SessionCount
        | RvError::SignatureInvalid
        | RvError::SignatureLenRange
        | RvError::TokenNotPresent
        | RvError::UserTooManyTypes
        | RvError::WrappedKeyInvalid
        | RvError::WrappedKeyLenRange
        | RvError::PublicKeyInvalid => Recovery::Backoff,

        RvError::DeviceRemoved => Recovery::BackoffThenReset,

        RvError::OperationActive
        | RvError::OperationNotInitialized
        | RvError::SessionClosed
        | RvError::SessionHandleInvalid
        | RvError::SessionExists
        | RvError::UserAlreadyLoggedIn
        | RvError::UserNotLoggedIn
        | RvError::CryptokiNotInitialized
        | RvError::CryptokiAlreadyInitialized => Recovery::ResetSession,

        RvError::GeneralError
        | RvError::ArgumentsBad
        | RvError::SlotIdInvalid
        | RvError::NoEvent
        | RvError::NeedToCreateThreads
        | RvError::CantLock
        | RvError::AttributeReadOnly
        | RvError::AttributeSensitive
        | RvError::AttributeTypeInvalid
        | RvError::AttributeValueInvalid
        | RvError::ActionProhibited
        | RvError::FunctionCanceled
        | RvError::FunctionNotParallel
        | RvError::FunctionNotSupported
        | RvError::KeyHandleInvalid
        | RvError::KeyTypeInconsistent
        | RvError::KeyNotNeeded
        | RvError::KeyChanged
        | RvError::KeyNeeded
        | RvError::KeyFunctionNotPermitted
        | RvError::KeyNotWrappable
        | RvError::KeyUnextractable
        | RvError::MechanismInvalid
        | RvError::MechanismParamInvalid
        | RvError::ObjectHandleInvalid
        | RvError::PinIncorrect
        | RvError::PinInvalid
        | RvError::PinLenRange
        | RvError::PinExpired
        | RvError::PinLocked
        | RvError::SessionParallelNotSupported
        | RvError::SessionReadOnly
        | RvError::SessionReadOnlyExists
        | RvError::SessionReadWriteSoExists
        | RvError::TemplateIncomplete
        | RvError::TemplateInconsistent
        | RvError::TokenNotRecognized
        | RvError::TokenWriteProtected
        | RvError::UnwrappingKeyHandleInvalid
        | RvError::UnwrappingKeySizeRange
        | RvError::UnwrappingKeyTypeInconsistent
        | RvError::UserPinNotInitialized
        | RvError::UserTypeInvalid
        | RvError::UserAnotherAlreadyLoggedIn
        | RvError::WrappingKeyHandleInvalid
        | RvError::WrappingKeySizeRange
        | RvError::WrappingKeyTypeInconsistent
        | RvError::RandomSeedNotSupported
        | RvError::RandomNoRng
        | RvError::DomainParamsInvalid
        | RvError::CurveNotSupported
        | RvError::BufferTooSmall
        | RvError::SavedStateInvalid
        | RvError::InformationSensitive
        | RvError::StateUnsaveable
        | RvError::MutexBad
        | RvError::MutexNotLocked
        | RvError::NewPinMode
        | RvError::NextOtp
        | RvError::ExceededMaxIterations
        | RvError::FipsSelfTestFailed
        | RvError::LibraryLoadFailed
        | RvError::PinTooWeak
        | RvError::FunctionRejected
        | RvError::VendorDefined { .. } => Recovery::Fatal,

        _ => Recovery::Unrecognized,
    }
}

/// Retry budget for a single device operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total invocations, including the first. Zero behaves like one.
    pub max_attempts: u32,
    /// Base wait before a retry
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, delay: Duration::from_millis(50) }
    }
}

/// Uniform jitter in `[0, delay * MAX_JITTER]`.
pub(crate) fn jitter(env: &dyn Environment, delay: Duration) -> Duration {
    let mut bytes = [0u8; 4];
    env.random_bytes(&mut bytes);
    let unit = f64::from(u32::from_be_bytes(bytes)) / f64::from(u32::MAX);
    delay.mul_f64(unit * MAX_JITTER)
}

impl<T: Token> Hsm<T> {
    /// Run `op` against a ready session, recovering from failures per
    /// [`classify`] until the attempt budget is spent.
    pub(crate) fn retry<R>(
        &mut self,
        mut op: impl FnMut(&mut T) -> Result<R, DeviceError>,
    ) -> Result<R, HsmError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match op(self.session.ready_token()?) {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            let recovery = classify(&err);
            match recovery {
                Recovery::Fatal => {
                    error!(error = %err, "unfixable device error");
                    return Err(HsmError::Unrecoverable(err));
                },
                Recovery::Unrecognized => {
                    error!(error = %err, "unrecognized device error");
                    return Err(HsmError::UnrecognizedReturnCode(err));
                },
                Recovery::Backoff | Recovery::ResetSession | Recovery::BackoffThenReset => {},
            }

            if attempt >= max_attempts {
                warn!(attempts = attempt, error = %err, "device call failed, giving up");
                return Err(HsmError::RetriesExhausted { attempts: attempt, source: err });
            }
            debug!(attempt, ?recovery, error = %err, "device call failed, retrying");

            if recovery.waits() {
                let wait = self.policy.delay + jitter(self.env.as_ref(), self.policy.delay);
                self.env.sleep(wait);
            }
            if recovery.resets() {
                self.session.reset().map_err(|err| HsmError::ResetFailed(Box::new(err)))?;
            }
        }
    }
}
