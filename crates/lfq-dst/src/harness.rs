//! DST harness: simulated producers and consumers on one real queue.
//!
//! The harness provides:
//! - Configurable number of simulated threads
//! - Deterministic scheduling of whole operations
//! - Fault injection (abandoned pushes, delays)
//! - Allocation failures reported by the queue's `try_push`
//! - Invariant checking every N operations
//!
//! Simulated threads take turns, so the recorded history is sequential
//! and strict FIFO is checked alongside the concurrency-safe properties.

use lfq_core::invariants::queue::{QueueHistory, QueueObservation, QueuePropertyChecker};
use lfq_core::{encode_value, PropertyChecker, TestableQueue};
use serde::Serialize;
use tracing::debug;

use crate::fault::FaultConfig;
use crate::scheduler::ScheduleDecision;
use crate::DstEnv;

/// Configuration for the DST harness.
#[derive(Debug, Clone, Serialize)]
pub struct HarnessConfig {
    /// Number of threads to simulate
    pub threads_count: usize,
    /// Number of operations per thread
    pub operations_per_thread: u64,
    /// Probability of a context switch after an operation
    pub yield_probability: f64,
    /// Probability that a simulated thread pushes rather than pops
    pub push_probability: f64,
    /// Fault injection configuration
    pub fault_config: FaultConfig,
    /// Check invariants after every N operations (0 = only at the end)
    pub invariant_check_interval: u64,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            threads_count: 4,
            operations_per_thread: 100,
            yield_probability: 0.2,
            push_probability: 0.6,
            fault_config: FaultConfig::default(),
            invariant_check_interval: 10,
        }
    }
}

impl HarnessConfig {
    /// Configuration for stress testing.
    #[must_use]
    pub fn stress() -> Self {
        Self {
            threads_count: 8,
            operations_per_thread: 1000,
            yield_probability: 0.3,
            push_probability: 0.5,
            fault_config: FaultConfig::aggressive(),
            invariant_check_interval: 100,
        }
    }

    /// Configuration for quick testing.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            threads_count: 2,
            operations_per_thread: 50,
            yield_probability: 0.1,
            push_probability: 0.6,
            fault_config: FaultConfig::none(),
            invariant_check_interval: 10,
        }
    }
}

/// Result of running the harness.
#[derive(Debug, Clone, Serialize)]
pub struct HarnessResult {
    /// Seed used for reproduction
    pub seed: u64,
    /// Total operations executed
    pub operations_count: u64,
    /// Successful pushes
    pub pushes_count: u64,
    /// Pushes the queue rejected for lack of memory
    pub failed_pushes_count: u64,
    /// Pops that returned a value
    pub pops_count: u64,
    /// Pops that found the queue empty
    pub empty_pops_count: u64,
    /// Context switches that occurred
    pub context_switches_count: u64,
    /// Faults injected
    pub faults_injected_count: u64,
    /// Invariant checks performed
    pub invariant_checks_count: u64,
    /// Whether all invariants held
    pub all_invariants_held: bool,
    /// First violation (if any)
    pub first_violation: Option<String>,
}

/// DST harness for queue testing.
///
/// Given the same seed and config, the same sequence of operations is
/// executed against the queue.
pub struct DstHarness {
    env: DstEnv,
    config: HarnessConfig,
    history: QueueHistory,
    operations_count: u64,
    pushes_count: u64,
    failed_pushes_count: u64,
    pops_count: u64,
    empty_pops_count: u64,
    context_switches_count: u64,
    invariant_checks_count: u64,
    violation: Option<String>,
}

impl DstHarness {
    /// Create a new harness with the given seed and config.
    #[must_use]
    pub fn new(seed: u64, config: HarnessConfig) -> Self {
        debug_assert!(seed != 0, "Seed should not be zero");
        debug_assert!(config.threads_count > 0, "Must have at least one thread");
        debug_assert!(
            config.threads_count <= 16,
            "Too many threads for DST: {}",
            config.threads_count
        );

        let env = DstEnv::with_scheduler(
            seed,
            config.threads_count,
            config.yield_probability,
            config.fault_config.clone(),
        );

        Self {
            env,
            config,
            history: QueueHistory::new(),
            operations_count: 0,
            pushes_count: 0,
            failed_pushes_count: 0,
            pops_count: 0,
            empty_pops_count: 0,
            context_switches_count: 0,
            invariant_checks_count: 0,
            violation: None,
        }
    }

    /// Get the seed for reproduction.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.env.seed()
    }

    /// Get the environment for custom operations.
    pub fn env(&mut self) -> &mut DstEnv {
        &mut self.env
    }

    /// History recorded so far.
    #[must_use]
    pub fn history(&self) -> &QueueHistory {
        &self.history
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.violation.is_some()
    }

    fn stop_with_violation(&mut self, message: String) {
        debug!(seed = self.env.seed(), %message, "harness stopped");
        if self.violation.is_none() {
            self.violation = Some(message);
        }
    }

    fn yield_point(&mut self) {
        if let Some(scheduler) = self.env.scheduler() {
            if let ScheduleDecision::SwitchTo(_) = scheduler.decide() {
                self.context_switches_count += 1;
            }
        }
    }

    fn current_thread(&mut self) -> usize {
        self.env.scheduler().map_or(0, |s| s.current_thread())
    }

    fn should_check_invariants(&self) -> bool {
        self.config.invariant_check_interval != 0
            && self.operations_count % self.config.invariant_check_interval == 0
    }

    /// Run simulated producers and consumers against `queue`.
    ///
    /// Each simulated thread pushes values tagged with its id and sequence
    /// number, or pops. An injected fault makes the thread abandon a push
    /// before calling the queue; delays advance the simulated clock. Pushes
    /// go through `try_push`, and a value the queue hands back is not
    /// recorded.
    pub fn run_queue<Q: TestableQueue>(&mut self, queue: &mut Q) -> HarnessResult {
        let threads_count = self.config.threads_count;
        let ops_per_thread = self.config.operations_per_thread;
        let mut thread_steps: Vec<u64> = vec![0; threads_count];
        let mut next_seq: Vec<u32> = vec![0; threads_count];

        while !self.is_stopped() {
            let current = self.current_thread();

            if thread_steps[current] >= ops_per_thread {
                if thread_steps.iter().all(|&s| s >= ops_per_thread) {
                    break;
                }
                if let Some(scheduler) = self.env.scheduler() {
                    scheduler.force_switch();
                }
                continue;
            }

            let push_probability = self.config.push_probability;
            if self.env.rng().gen_bool(push_probability) {
                if self.env.fault().should_fail() {
                    debug!(seed = self.env.seed(), thread = current, "injected abandoned push");
                } else {
                    let value = encode_value(current as u32, next_seq[current]);
                    next_seq[current] += 1;
                    match queue.try_push(value) {
                        Ok(()) => {
                            self.history.record_enqueue(current as u64, value);
                            self.pushes_count += 1;
                        }
                        Err(returned) => {
                            debug!(seed = self.env.seed(), thread = current, returned, "push failed to allocate");
                            if returned != value {
                                self.stop_with_violation(format!(
                                    "try_push handed back {} instead of {}",
                                    returned, value
                                ));
                            }
                            self.failed_pushes_count += 1;
                        }
                    }
                }
            } else {
                let result = queue.pop();
                self.history.record_dequeue(current as u64, result);
                if result.is_some() {
                    self.pops_count += 1;
                } else {
                    self.empty_pops_count += 1;
                }
            }
            self.operations_count += 1;
            self.env.step();
            thread_steps[current] += 1;

            self.env.maybe_delay();

            if self.should_check_invariants() {
                self.check_queue(queue);
            }

            self.yield_point();
        }

        if !self.is_stopped() {
            self.check_queue(queue);
        }

        self.build_result()
    }

    fn check_queue<Q: TestableQueue>(&mut self, queue: &mut Q) {
        self.invariant_checks_count += 1;
        let observation = QueueObservation::from_history(self.history.clone(), queue.contents());
        let checker = QueuePropertyChecker::new(&observation)
            .with_seed(self.env.seed())
            .with_sequential_history();
        if let Some(violation) = checker.violations().into_iter().next() {
            self.stop_with_violation(violation.format());
        }
    }

    /// Run a generic single-threaded test.
    ///
    /// The generator receives the current step and returns an operation.
    pub fn run_single_threaded<F, T, R>(&mut self, mut generate_op: F, mut execute: R) -> HarnessResult
    where
        F: FnMut(&mut DstEnv, u64) -> Option<T>,
        R: FnMut(&mut DstEnv, T) -> Result<(), String>,
    {
        let total_ops = self.config.operations_per_thread;
        let mut step = 0u64;

        while step < total_ops && !self.is_stopped() {
            if let Some(op) = generate_op(&mut self.env, step) {
                if let Err(e) = execute(&mut self.env, op) {
                    self.stop_with_violation(e);
                    break;
                }
                self.operations_count += 1;
                self.env.step();
            }

            self.env.maybe_delay();
            step += 1;
        }

        self.build_result()
    }

    fn build_result(&mut self) -> HarnessResult {
        HarnessResult {
            seed: self.env.seed(),
            operations_count: self.operations_count,
            pushes_count: self.pushes_count,
            failed_pushes_count: self.failed_pushes_count,
            pops_count: self.pops_count,
            empty_pops_count: self.empty_pops_count,
            context_switches_count: self.context_switches_count,
            faults_injected_count: self.env.fault().stats().faults_count,
            invariant_checks_count: self.invariant_checks_count,
            all_invariants_held: self.violation.is_none(),
            first_violation: self.violation.clone(),
        }
    }
}

impl HarnessResult {
    /// Format for display.
    #[must_use]
    pub fn format(&self) -> String {
        let status = if self.all_invariants_held {
            "PASS"
        } else {
            "FAIL"
        };

        let mut result = format!(
            "[{}] DST_SEED={} ops={} pushes={} failed_pushes={} pops={} empty_pops={} switches={} faults={} checks={}",
            status,
            self.seed,
            self.operations_count,
            self.pushes_count,
            self.failed_pushes_count,
            self.pops_count,
            self.empty_pops_count,
            self.context_switches_count,
            self.faults_injected_count,
            self.invariant_checks_count
        );

        if let Some(ref violation) = self.first_violation {
            result.push_str(&format!("\n  Violation: {}", violation));
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct MockQueue(Mutex<VecDeque<u64>>);

    impl TestableQueue for MockQueue {
        fn new() -> Self {
            Self(Mutex::new(VecDeque::new()))
        }

        fn push(&self, value: u64) {
            self.0.lock().unwrap().push_back(value);
        }

        fn pop(&self) -> Option<u64> {
            self.0.lock().unwrap().pop_front()
        }

        fn is_empty(&self) -> bool {
            self.0.lock().unwrap().is_empty()
        }

        fn contents(&mut self) -> Vec<u64> {
            self.0.get_mut().unwrap().iter().copied().collect()
        }
    }

    /// Silently drops every third push.
    struct LossyQueue {
        inner: MockQueue,
        calls: Mutex<u64>,
    }

    impl TestableQueue for LossyQueue {
        fn new() -> Self {
            Self {
                inner: MockQueue::new(),
                calls: Mutex::new(0),
            }
        }

        fn push(&self, value: u64) {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            if *calls % 3 != 0 {
                self.inner.push(value);
            }
        }

        fn pop(&self) -> Option<u64> {
            self.inner.pop()
        }

        fn is_empty(&self) -> bool {
            self.inner.is_empty()
        }

        fn contents(&mut self) -> Vec<u64> {
            self.inner.contents()
        }
    }

    /// Every other push fails to allocate.
    struct ScarceQueue {
        inner: MockQueue,
        calls: Mutex<u64>,
    }

    impl TestableQueue for ScarceQueue {
        fn new() -> Self {
            Self {
                inner: MockQueue::new(),
                calls: Mutex::new(0),
            }
        }

        fn push(&self, value: u64) {
            self.inner.push(value);
        }

        fn try_push(&self, value: u64) -> Result<(), u64> {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            if *calls % 2 == 0 {
                return Err(value);
            }
            self.inner.push(value);
            Ok(())
        }

        fn pop(&self) -> Option<u64> {
            self.inner.pop()
        }

        fn is_empty(&self) -> bool {
            self.inner.is_empty()
        }

        fn contents(&mut self) -> Vec<u64> {
            self.inner.contents()
        }
    }

    #[test]
    fn test_harness_single_threaded() {
        let mut harness = DstHarness::new(12345, HarnessConfig::quick());
        let mut counter = 0u64;

        let result = harness.run_single_threaded(
            |_env, step| if step < 10 { Some(step) } else { None },
            |_env, op| {
                counter += op;
                Ok(())
            },
        );

        assert!(result.all_invariants_held);
        assert_eq!(counter, 45);
    }

    #[test]
    fn test_harness_stops_on_violation() {
        let mut harness = DstHarness::new(12345, HarnessConfig::quick());
        let result = harness.run_single_threaded(
            |_env, step| Some(step),
            |_env, op| {
                if op == 5 {
                    Err("Intentional failure at step 5".to_string())
                } else {
                    Ok(())
                }
            },
        );

        assert!(!result.all_invariants_held);
        assert!(result.format().contains("Intentional failure"));
        assert!(result.operations_count < 50);
    }

    #[test]
    fn test_run_queue_correct_queue_passes() {
        let config = HarnessConfig {
            threads_count: 3,
            yield_probability: 0.5,
            ..HarnessConfig::quick()
        };
        let mut harness = DstHarness::new(777, config);
        let mut queue = MockQueue::new();

        let result = harness.run_queue(&mut queue);
        assert!(result.all_invariants_held, "{}", result.format());
        assert_eq!(result.operations_count, 150);
        assert_eq!(result.pushes_count + result.pops_count + result.empty_pops_count, 150);
        assert!(result.context_switches_count > 0);
    }

    #[test]
    fn test_run_queue_detects_lost_elements() {
        let config = HarnessConfig {
            push_probability: 0.9,
            ..HarnessConfig::quick()
        };
        let mut harness = DstHarness::new(31, config);
        let mut queue = LossyQueue::new();

        let result = harness.run_queue(&mut queue);
        assert!(!result.all_invariants_held);
        assert!(result.first_violation.is_some());
    }

    #[test]
    fn test_result_serializes() {
        let mut harness = DstHarness::new(5, HarnessConfig::quick());
        let mut queue = MockQueue::new();
        let result = harness.run_queue(&mut queue);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["seed"], 5);
        assert_eq!(json["all_invariants_held"], true);
    }

    #[test]
    fn test_run_queue_counts_failed_pushes() {
        let config = HarnessConfig {
            push_probability: 0.8,
            ..HarnessConfig::quick()
        };
        let mut harness = DstHarness::new(404, config);
        let mut queue = ScarceQueue::new();

        let result = harness.run_queue(&mut queue);
        assert!(result.all_invariants_held, "{}", result.format());
        assert!(result.failed_pushes_count > 0);
        // Rejected values never enter the history.
        assert_eq!(harness.history().enqueued().len() as u64, result.pushes_count);
        assert_eq!(
            result.pushes_count + result.failed_pushes_count + result.pops_count + result.empty_pops_count,
            result.operations_count
        );
    }
}
