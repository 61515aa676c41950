//! Deterministic random number generation.
//!
//! RULE: Nothing in the analytics core may call a platform RNG.
//! The only randomness is the train/test shuffle of the predictive
//! estimator, and it flows through a `StreamRng` derived from the
//! configured split seed.
//!
//! Each consumer gets its own stream, seeded from (seed XOR stream index),
//! so adding a stream never perturbs an existing one.

use rand::{seq::SliceRandom, SeedableRng};
use rand_pcg::Pcg64Mcg;

/// A named, deterministic RNG for one consumer.
pub struct StreamRng {
    pub name: &'static str,
    inner: Pcg64Mcg,
}

impl StreamRng {
    pub fn new(seed: u64, stream: RngStream) -> Self {
        let derived_seed = seed ^ (stream as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15);
        Self {
            name: stream.name(),
            inner: Pcg64Mcg::seed_from_u64(derived_seed),
        }
    }

    /// Shuffle in place.
    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        items.shuffle(&mut self.inner);
    }
}

/// Stable stream assignments.
/// NEVER reorder or remove entries; only append.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u64)]
pub enum RngStream {
    RetentionHoldout = 0,
    DropoutHoldout = 1,
}

impl RngStream {
    pub fn name(&self) -> &'static str {
        match self {
            Self::RetentionHoldout => "retention_holdout",
            Self::DropoutHoldout => "dropout_holdout",
        }
    }
}

/// Shuffled index split: (train, test). `test` holds `round(n × fraction)` rows.
pub fn holdout_split(n: usize, fraction: f64, seed: u64, stream: RngStream) -> (Vec<usize>, Vec<usize>) {
    let mut order: Vec<usize> = (0..n).collect();
    StreamRng::new(seed, stream).shuffle(&mut order);
    let test_len = ((n as f64) * fraction.clamp(0.0, 1.0)).round() as usize;
    let test = order.split_off(n - test_len.min(n));
    (order, test)
}
