//! Deterministic test harness for UPP signing backends.
//!
//! [`SimToken`] stands in for a PKCS#11 library and [`SimEnv`] for the clock
//! and RNG, so HSM retry and session-recovery paths can be driven from plain
//! unit tests without hardware or real sleeps.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod sim_env;
pub mod sim_token;

use std::{sync::Arc, time::Duration};

pub use sim_env::SimEnv;
pub use sim_token::{DEFAULT_PIN, SimObject, SimOp, SimToken};
use upp_crypto::{HsmBackend, HsmConfig, HsmError, RetryPolicy};

/// Retry delay used by [`config`].
pub const TEST_RETRY_DELAY: Duration = Duration::from_millis(10);

/// HSM settings matching a fresh [`SimToken`]: slot 0, [`DEFAULT_PIN`],
/// three attempts with [`TEST_RETRY_DELAY`].
pub fn config() -> HsmConfig {
    let mut config = HsmConfig::new("sim", DEFAULT_PIN);
    config.retry = RetryPolicy { max_attempts: 3, delay: TEST_RETRY_DELAY };
    config
}

/// Logged-in backend over `token`, sleeping through `env`.
pub fn hsm_backend(token: &SimToken, env: &SimEnv) -> Result<HsmBackend<SimToken>, HsmError> {
    hsm_backend_with(token, env, &config())
}

/// Logged-in backend over `token` with custom settings.
pub fn hsm_backend_with(
    token: &SimToken,
    env: &SimEnv,
    config: &HsmConfig,
) -> Result<HsmBackend<SimToken>, HsmError> {
    HsmBackend::with_token(token.clone(), config, Arc::new(env.clone()))
}
