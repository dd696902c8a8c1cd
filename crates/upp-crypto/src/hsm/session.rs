//! Session lifecycle.
//!
//! ```text
//!                 setup                teardown
//! Uninitialized ────────▶ Ready ◀──────────────▶ Initialized
//!                           │        setup
//!                           │ close
//!                           ▼
//!                        Closed
//! ```
//!
//! `Initialized` means the manager has reached the device at least once but
//! holds no usable session. Any operation in that state re-runs setup first.
//! `Closed` is terminal.

use cryptoki::error::RvError;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use super::{
    device::{DeviceError, Token},
    error::{HsmError, SetupStage, TeardownStage},
};

/// Lifecycle state of a [`SessionManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Nothing has been done yet
    Uninitialized,
    /// Library reachable, no logged-in session
    Initialized,
    /// Logged-in session open
    Ready,
    /// Closed for good
    Closed,
}

/// Owns a [`Token`] and the one session the backend works on.
pub struct SessionManager<T: Token> {
    token: T,
    slot_index: usize,
    pin: Zeroizing<String>,
    state: SessionState,
}

impl<T: Token> SessionManager<T> {
    /// Manager for `token`. Does not touch the device.
    pub fn new(token: T, slot_index: usize, pin: Zeroizing<String>) -> Self {
        Self { token, slot_index, pin, state: SessionState::Uninitialized }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Initialize the library, open a session on the configured slot and log
    /// in. A library that reports itself already initialized is accepted.
    pub fn setup(&mut self) -> Result<(), HsmError> {
        match self.state {
            SessionState::Closed => return Err(HsmError::Closed),
            SessionState::Ready => return Ok(()),
            SessionState::Uninitialized | SessionState::Initialized => {},
        }

        match self.token.initialize() {
            Ok(()) => {},
            Err(err) if err.rv() == Some(RvError::CryptokiAlreadyInitialized) => {
                debug!("PKCS#11 library already initialized");
            },
            Err(source) => return Err(HsmError::Setup { stage: SetupStage::Initialize, source }),
        }
        self.state = SessionState::Initialized;

        let slots = self.token.slots().map_err(setup_stage(SetupStage::ListSlots))?;
        let slot = slots
            .get(self.slot_index)
            .copied()
            .ok_or(HsmError::SlotUnavailable { index: self.slot_index, available: slots.len() })?;

        self.token.open_session(slot).map_err(setup_stage(SetupStage::OpenSession))?;
        self.token.login(&self.pin).map_err(setup_stage(SetupStage::Login))?;

        self.state = SessionState::Ready;
        info!(?slot, "HSM session ready");
        Ok(())
    }

    /// Log out, close the session and finalize the library, stopping at the
    /// first failure. A no-op unless the session is ready.
    pub fn teardown(&mut self) -> Result<(), HsmError> {
        match self.state {
            SessionState::Ready => {},
            SessionState::Closed => return Err(HsmError::Closed),
            SessionState::Uninitialized | SessionState::Initialized => return Ok(()),
        }

        self.token.logout().map_err(teardown_stage(TeardownStage::Logout))?;
        self.token.close_session().map_err(teardown_stage(TeardownStage::CloseSession))?;
        self.token.finalize().map_err(teardown_stage(TeardownStage::Finalize))?;

        self.state = SessionState::Initialized;
        debug!("HSM session torn down");
        Ok(())
    }

    /// Tear down and set up again.
    ///
    /// A failing teardown is logged and the session dropped without further
    /// device calls, so a dead session never blocks recovery.
    pub fn reset(&mut self) -> Result<(), HsmError> {
        if let Err(err) = self.teardown() {
            if matches!(err, HsmError::Closed) {
                return Err(err);
            }
            warn!(error = %err, "teardown failed during reset, releasing session");
            self.token.release();
            self.state = SessionState::Initialized;
        }
        self.setup()
    }

    /// Tear down and refuse all further use.
    pub fn close(&mut self) -> Result<(), HsmError> {
        if self.state == SessionState::Closed {
            return Ok(());
        }
        let result = self.teardown();
        self.token.release();
        self.state = SessionState::Closed;
        info!("HSM context closed");
        result
    }

    /// The token, with a ready session.
    pub(crate) fn ready_token(&mut self) -> Result<&mut T, HsmError> {
        match self.state {
            SessionState::Ready => {},
            SessionState::Closed => return Err(HsmError::Closed),
            SessionState::Uninitialized | SessionState::Initialized => self.setup()?,
        }
        Ok(&mut self.token)
    }
}

fn setup_stage(stage: SetupStage) -> impl FnOnce(DeviceError) -> HsmError {
    move |source| HsmError::Setup { stage, source }
}

fn teardown_stage(stage: TeardownStage) -> impl FnOnce(DeviceError) -> HsmError {
    move |source| HsmError::Teardown { stage, source }
}
