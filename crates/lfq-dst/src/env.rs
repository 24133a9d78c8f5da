//! Simulation environment: clock, randomness, faults and scheduling from
//! one seed.

use crate::clock::SimClock;
use crate::fault::{FaultConfig, FaultInjector};
use crate::random::DeterministicRng;
use crate::scheduler::Scheduler;

/// Everything nondeterministic in a simulation, derived from one seed.
#[derive(Debug, Clone)]
pub struct DstEnv {
    seed: u64,
    rng: DeterministicRng,
    clock: SimClock,
    fault: FaultInjector,
    scheduler: Option<Scheduler>,
    steps_count: u64,
}

impl DstEnv {
    /// Environment with the default fault configuration.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self::with_fault_config(seed, FaultConfig::default())
    }

    /// Environment with an explicit fault configuration.
    #[must_use]
    pub fn with_fault_config(seed: u64, fault_config: FaultConfig) -> Self {
        let mut root = DeterministicRng::new(seed);
        let fault = FaultInjector::new(root.fork(), fault_config);
        Self {
            seed,
            rng: root,
            clock: SimClock::new(),
            fault,
            scheduler: None,
            steps_count: 0,
        }
    }

    /// Environment driving `threads_count` simulated threads.
    #[must_use]
    pub fn with_scheduler(
        seed: u64,
        threads_count: usize,
        yield_probability: f64,
        fault_config: FaultConfig,
    ) -> Self {
        let mut env = Self::with_fault_config(seed, fault_config);
        let scheduler_rng = env.rng.fork();
        env.scheduler = Some(Scheduler::new(scheduler_rng, threads_count, yield_probability));
        env
    }

    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn rng(&mut self) -> &mut DeterministicRng {
        &mut self.rng
    }

    pub fn clock(&mut self) -> &mut SimClock {
        &mut self.clock
    }

    pub fn fault(&mut self) -> &mut FaultInjector {
        &mut self.fault
    }

    pub fn scheduler(&mut self) -> Option<&mut Scheduler> {
        self.scheduler.as_mut()
    }

    /// Count a simulation step.
    pub fn step(&mut self) {
        self.steps_count += 1;
    }

    /// Maybe inject a delay, advancing the clock by it.
    pub fn maybe_delay(&mut self) -> Option<u64> {
        let delay = self.fault.maybe_delay()?;
        self.clock.advance_ns(delay);
        Some(delay)
    }

    /// `DST_SEED=<seed>`, for failure messages.
    #[must_use]
    pub fn format_seed(&self) -> String {
        format!("DST_SEED={}", self.seed)
    }

    /// One-line summary of the run.
    #[must_use]
    pub fn stats(&self) -> String {
        let fault = self.fault.stats();
        format!(
            "DST_SEED={} steps={} sim_time_ns={} faults={} delays={}",
            self.seed,
            self.steps_count,
            self.clock.now_ns(),
            fault.faults_count,
            fault.delays_count
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_is_reproducible() {
        let run = |seed| {
            let mut env = DstEnv::new(seed);
            let draws: Vec<u32> = (0..8).map(|_| env.rng().gen()).collect();
            let faults: Vec<bool> = (0..32).map(|_| env.fault().should_fail()).collect();
            (draws, faults)
        };
        assert_eq!(run(99), run(99));
        assert_ne!(run(99), run(100));
    }

    #[test]
    fn test_delay_advances_clock() {
        let config = FaultConfig {
            delay_probability: 1.0,
            max_delay_ns: 10,
            ..FaultConfig::none()
        };
        let mut env = DstEnv::with_fault_config(1, config);
        let delay = env.maybe_delay().unwrap();
        assert_eq!(env.clock().now_ns(), delay);
        assert!(env.stats().starts_with("DST_SEED=1 "));
    }

    #[test]
    fn test_scheduler_only_when_requested() {
        let mut plain = DstEnv::new(5);
        assert!(plain.scheduler().is_none());
        let mut scheduled = DstEnv::with_scheduler(5, 3, 0.5, FaultConfig::none());
        assert_eq!(scheduled.scheduler().map(|s| s.threads_count()), Some(3));
        assert_eq!(scheduled.format_seed(), "DST_SEED=5");
    }
}
