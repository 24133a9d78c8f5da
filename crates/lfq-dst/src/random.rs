//! Seeded randomness.
//!
//! Every random choice in a simulation goes through a `DeterministicRng`,
//! so a run is fully determined by its seed.

use rand::distributions::uniform::{SampleRange, SampleUniform};
use rand::distributions::{Distribution, Standard};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

/// Deterministic random number generator.
#[derive(Debug, Clone)]
pub struct DeterministicRng {
    seed: u64,
    inner: StdRng,
}

impl DeterministicRng {
    /// Create a generator from a seed.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            inner: StdRng::seed_from_u64(seed),
        }
    }

    /// Seed this generator was created with.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Random value of any type with a standard distribution.
    pub fn gen<T>(&mut self) -> T
    where
        Standard: Distribution<T>,
    {
        self.inner.gen()
    }

    /// Random value in `range`.
    pub fn gen_range<T, R>(&mut self, range: R) -> T
    where
        T: SampleUniform,
        R: SampleRange<T>,
    {
        self.inner.gen_range(range)
    }

    /// `true` with probability `p`.
    pub fn gen_bool(&mut self, p: f64) -> bool {
        debug_assert!((0.0..=1.0).contains(&p), "probability out of range: {}", p);
        self.inner.gen_bool(p)
    }

    /// Shuffle a slice in place.
    pub fn shuffle<T>(&mut self, values: &mut [T]) {
        values.shuffle(&mut self.inner);
    }

    /// Pick one element, or `None` if the slice is empty.
    pub fn choose<'a, T>(&mut self, values: &'a [T]) -> Option<&'a T> {
        values.choose(&mut self.inner)
    }

    /// Independent generator derived from this one.
    ///
    /// Used to give each component (faults, scheduler) its own stream so
    /// that adding a draw in one does not shift the others.
    #[must_use]
    pub fn fork(&mut self) -> Self {
        Self::new(self.inner.gen())
    }
}
