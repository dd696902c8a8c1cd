//! Recording environment with seeded randomness.

use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use upp_crypto::Environment;

struct State {
    rng: ChaCha8Rng,
    sleeps: Vec<Duration>,
}

/// [`Environment`] that records sleeps instead of blocking.
///
/// Clones share state, so a test can keep one handle and give another to the
/// backend.
#[derive(Clone)]
pub struct SimEnv {
    state: Arc<Mutex<State>>,
}

impl SimEnv {
    /// Environment whose random bytes derive from `seed`.
    pub fn with_seed(seed: u64) -> Self {
        let state = State { rng: ChaCha8Rng::seed_from_u64(seed), sleeps: Vec::new() };
        Self { state: Arc::new(Mutex::new(state)) }
    }

    /// Every requested sleep, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.state.lock().sleeps.clone()
    }

    /// Sum of all requested sleeps.
    pub fn total_slept(&self) -> Duration {
        self.state.lock().sleeps.iter().sum()
    }
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::with_seed(0)
    }
}

impl Environment for SimEnv {
    fn sleep(&self, duration: Duration) {
        self.state.lock().sleeps.push(duration);
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.state.lock().rng.fill_bytes(buffer);
    }
}
