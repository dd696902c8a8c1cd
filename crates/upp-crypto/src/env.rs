//! Environment abstraction for blocking waits and randomness.
//!
//! Retry backoff sleeps and draws jitter through this trait so tests can
//! record waits instead of performing them.

use std::time::Duration;

use rand::{RngCore, rngs::OsRng};

/// Source of waits and random bytes.
pub trait Environment: Send + Sync {
    /// Block the calling thread for `duration`.
    fn sleep(&self, duration: Duration);

    /// Fill `buffer` with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);
}

/// Real clock and operating-system randomness.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl Environment for SystemEnv {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        OsRng.fill_bytes(buffer);
    }
}
