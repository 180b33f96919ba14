//! Seeded, serializable random number source
//!
//! The generator itself is never serialized; only the seed and the number of
//! draws taken so far. Restoring re-seeds and fast-forwards, so a loaded save
//! continues the exact same random sequence.

use rand::{Rng, SeedableRng};
use rand_pcg::Pcg32;
use serde::{Deserialize, Serialize};

/// RNG state wrapper for serialization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RngState {
    pub seed: u64,
    /// Number of 32-bit draws consumed
    pub stream: u64,
}

impl RngState {
    pub fn new(seed: u64) -> Self {
        Self { seed, stream: 0 }
    }

    /// Rebuild the generator positioned after every draw taken so far
    pub fn to_rng(&self) -> Pcg32 {
        let mut rng = Pcg32::seed_from_u64(self.seed);
        rng.advance(self.stream);
        rng
    }

    /// Uniform sample in [0, 1)
    pub fn next_f32(&mut self) -> f32 {
        let mut rng = self.to_rng();
        let value: f32 = rng.random();
        self.stream += 1;
        value
    }

    /// Uniform integer in [0, bound)
    pub fn below(&mut self, bound: u32) -> u32 {
        if bound == 0 {
            return 0;
        }
        ((self.next_f32() * bound as f32) as u32).min(bound - 1)
    }

    /// Bernoulli trial
    pub fn chance(&mut self, probability: f32) -> bool {
        self.next_f32() < probability
    }

    /// Uniform sample in [-half, half)
    pub fn spread(&mut self, half: f32) -> f32 {
        (self.next_f32() - 0.5) * 2.0 * half
    }
}
