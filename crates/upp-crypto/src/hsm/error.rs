//! HSM error taxonomy.

use std::fmt;

use thiserror::Error;

use super::device::DeviceError;

/// Step of session setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupStage {
    /// Library initialization
    Initialize,
    /// Slot enumeration
    ListSlots,
    /// Opening the read-write session
    OpenSession,
    /// User login
    Login,
}

impl fmt::Display for SetupStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Initialize => "initialize",
            Self::ListSlots => "list slots",
            Self::OpenSession => "open session",
            Self::Login => "login",
        })
    }
}

/// Step of session teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownStage {
    /// User logout
    Logout,
    /// Closing the session
    CloseSession,
    /// Library finalization
    Finalize,
}

impl fmt::Display for TeardownStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Logout => "logout",
            Self::CloseSession => "close session",
            Self::Finalize => "finalize",
        })
    }
}

/// Errors from the HSM session and retry machinery.
#[derive(Debug, Error)]
pub enum HsmError {
    /// Session setup failed
    #[error("HSM setup failed at {stage}")]
    Setup {
        /// Failing step
        stage: SetupStage,
        /// Device error
        #[source]
        source: DeviceError,
    },

    /// Configured slot index is out of range
    #[error("slot index {index} not available: {available} slots with a token")]
    SlotUnavailable {
        /// Configured index
        index: usize,
        /// Slots found
        available: usize,
    },

    /// Session teardown failed
    #[error("HSM teardown failed at {stage}")]
    Teardown {
        /// Failing step
        stage: TeardownStage,
        /// Device error
        #[source]
        source: DeviceError,
    },

    /// The device reported an error that retrying cannot fix
    #[error("unfixable error")]
    Unrecoverable(#[source] DeviceError),

    /// The device reported an error outside the known classes
    #[error("don't know how to handle error")]
    UnrecognizedReturnCode(#[source] DeviceError),

    /// Every attempt failed with a recoverable error
    #[error("giving up after {attempts} attempts")]
    RetriesExhausted {
        /// Invocations made
        attempts: u32,
        /// Error of the last attempt
        #[source]
        source: DeviceError,
    },

    /// Re-establishing the session failed during recovery
    #[error("session reset failed")]
    ResetFailed(#[source] Box<HsmError>),

    /// The context was closed
    #[error("HSM context is closed")]
    Closed,
}
