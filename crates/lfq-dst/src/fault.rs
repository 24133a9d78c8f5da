//! Probabilistic fault injection.

use serde::Serialize;

use crate::random::DeterministicRng;

/// How often faults fire.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaultConfig {
    /// Probability that a fault point fires
    pub failure_probability: f64,
    /// Probability that a delay is injected between operations
    pub delay_probability: f64,
    /// Upper bound of an injected delay
    pub max_delay_ns: u64,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            failure_probability: 0.05,
            delay_probability: 0.1,
            max_delay_ns: 1_000_000,
        }
    }
}

impl FaultConfig {
    /// No faults at all.
    #[must_use]
    pub fn none() -> Self {
        Self {
            failure_probability: 0.0,
            delay_probability: 0.0,
            max_delay_ns: 0,
        }
    }

    /// Faults on roughly one operation in five.
    #[must_use]
    pub fn aggressive() -> Self {
        Self {
            failure_probability: 0.2,
            delay_probability: 0.3,
            max_delay_ns: 10_000_000,
        }
    }
}

/// Counters kept by a [`FaultInjector`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FaultStats {
    pub checks_count: u64,
    pub faults_count: u64,
    pub delays_count: u64,
}

/// Decides, deterministically, when faults fire.
#[derive(Debug, Clone)]
pub struct FaultInjector {
    rng: DeterministicRng,
    config: FaultConfig,
    stats: FaultStats,
}

impl FaultInjector {
    #[must_use]
    pub fn new(rng: DeterministicRng, config: FaultConfig) -> Self {
        debug_assert!(
            (0.0..=1.0).contains(&config.failure_probability),
            "failure probability out of range"
        );
        debug_assert!(
            (0.0..=1.0).contains(&config.delay_probability),
            "delay probability out of range"
        );
        Self {
            rng,
            config,
            stats: FaultStats::default(),
        }
    }

    /// Whether the current fault point fires.
    pub fn should_fail(&mut self) -> bool {
        self.stats.checks_count += 1;
        let fail = self.config.failure_probability > 0.0
            && self.rng.gen_bool(self.config.failure_probability);
        if fail {
            self.stats.faults_count += 1;
        }
        fail
    }

    /// A delay to inject now, if any.
    pub fn maybe_delay(&mut self) -> Option<u64> {
        if self.config.delay_probability == 0.0 || self.config.max_delay_ns == 0 {
            return None;
        }
        if !self.rng.gen_bool(self.config.delay_probability) {
            return None;
        }
        self.stats.delays_count += 1;
        Some(self.rng.gen_range(1..=self.config.max_delay_ns))
    }

    /// Pick one of `choices` uniformly.
    pub fn choose<T: Copy>(&mut self, choices: &[T]) -> Option<T> {
        self.rng.choose(choices).copied()
    }

    #[must_use]
    pub fn config(&self) -> &FaultConfig {
        &self.config
    }

    #[must_use]
    pub fn stats(&self) -> FaultStats {
        self.stats
    }
}
