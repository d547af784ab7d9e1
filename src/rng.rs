//! Shared random source for samplers and chains.
//!
//! All chains advance concurrently but draw from one seeded generator, so the
//! generator itself must be safe for concurrent draws. `Generator` is a cheap
//! cloneable handle over a single `SmallRng` behind a mutex: chains hold
//! clones of the handle and every draw locks for exactly one generator call.

use std::sync::{Arc, Mutex};

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Concurrent PRNG handle. Clones share the same underlying stream.
#[derive(Clone)]
pub struct Generator {
    rng: Arc<Mutex<SmallRng>>,
}

impl Generator {
    /// Creates a generator seeded for reproducible runs.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Arc::new(Mutex::new(SmallRng::seed_from_u64(seed))),
        }
    }

    /// Uniform draw in `[0, 1)`.
    pub fn float64(&self) -> f64 {
        self.rng.lock().expect("rng mutex poisoned").gen::<f64>()
    }

    /// Uniform integer draw in `[0, n)`. `n` must be positive.
    pub fn int_below(&self, n: usize) -> usize {
        self.rng.lock().expect("rng mutex poisoned").gen_range(0..n)
    }
}

impl std::fmt::Debug for Generator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Generator")
    }
}
