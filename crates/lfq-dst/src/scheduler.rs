//! Deterministic scheduler for simulated threads.
//!
//! Simulated threads never run in parallel. After each operation the
//! scheduler decides whether the current thread keeps going or another
//! one takes over, so a seed fixes the whole interleaving of operations.

use crate::random::DeterministicRng;

/// Outcome of a yield point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleDecision {
    /// Current thread keeps running
    Continue,
    /// Control passes to the given thread
    SwitchTo(usize),
}

/// Picks the next simulated thread.
#[derive(Debug, Clone)]
pub struct Scheduler {
    rng: DeterministicRng,
    threads_count: usize,
    current: usize,
    yield_probability: f64,
}

impl Scheduler {
    #[must_use]
    pub fn new(rng: DeterministicRng, threads_count: usize, yield_probability: f64) -> Self {
        debug_assert!(threads_count > 0, "scheduler needs at least one thread");
        Self {
            rng,
            threads_count,
            current: 0,
            yield_probability,
        }
    }

    #[must_use]
    pub fn current_thread(&self) -> usize {
        self.current
    }

    #[must_use]
    pub fn threads_count(&self) -> usize {
        self.threads_count
    }

    /// Maybe switch to another thread.
    pub fn decide(&mut self) -> ScheduleDecision {
        if self.threads_count > 1 && self.rng.gen_bool(self.yield_probability) {
            ScheduleDecision::SwitchTo(self.switch())
        } else {
            ScheduleDecision::Continue
        }
    }

    /// Switch to some other thread unconditionally.
    pub fn force_switch(&mut self) -> usize {
        self.switch()
    }

    fn switch(&mut self) -> usize {
        if self.threads_count > 1 {
            // Any thread but the current one.
            let offset = self.rng.gen_range(1..self.threads_count);
            self.current = (self.current + offset) % self.threads_count;
        }
        self.current
    }
}
