//! Fault injection for queues.
//!
//! Faults are injected at operation boundaries, never inside the queue's
//! atomic sequences. The queue under test is unmodified.
//!
//! # What DST Tests (vs Loom)
//!
//! | Concern | Tool | Level |
//! |---------|------|-------|
//! | CAS races, count folding | loom, stateright | Atomic step |
//! | Allocation failure | DST | Reported by `try_push` |
//! | Caller crash | DST | Before / after an operation |
//! | Slow callers | DST | Between operations |
//!
//! ```text
//! FaultPoint (pre-op) ──> queue.try_push()/pop() ──> FaultPoint (post-op)
//!  "caller crashes?"                                 "caller crashes?"
//! ```
//!
//! Allocation failure is never injected: the runner pushes through
//! `try_push` and reports whatever the queue reports. A queue that hands
//! the value back must leave its contents unchanged.

use lfq_core::invariants::queue::{QueueHistory, QueueObservation, QueuePropertyChecker};
use lfq_core::{PropertyChecker, PropertyResult, TestableQueue};
use tracing::debug;

use crate::clock::SimClock;
use crate::fault::{FaultConfig, FaultInjector};
use crate::random::DeterministicRng;

/// Where a fault may fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultPoint {
    /// Before starting an operation
    BeforeOperation,
    /// After the operation completed, before the caller sees the result
    AfterOperation,
}

/// Kinds of injected faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultType {
    /// The queue's `try_push` could not allocate and handed the value back
    AllocationFailure,
    /// The calling thread dies; the operation is abandoned
    ThreadCrash,
    /// The calling thread stalls
    Delay,
}

/// DST runner for a queue.
///
/// Wraps the queue and injects faults around each call. The history it
/// records is sequential, so strict FIFO can be checked.
pub struct DstRunner<Q> {
    queue: Q,
    rng: DeterministicRng,
    fault_injector: FaultInjector,
    clock: SimClock,
    seed: u64,
    history: QueueHistory,
    operations_count: u64,
    faults_injected: u64,
    abandoned_operations: u64,
    allocation_failures: u64,
}

impl<Q: TestableQueue> DstRunner<Q> {
    /// Runner with the default fault configuration.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self::with_fault_config(seed, FaultConfig::default())
    }

    #[must_use]
    pub fn with_fault_config(seed: u64, config: FaultConfig) -> Self {
        Self {
            queue: Q::new(),
            rng: DeterministicRng::new(seed),
            fault_injector: FaultInjector::new(DeterministicRng::new(seed.wrapping_add(1)), config),
            clock: SimClock::new(),
            seed,
            history: QueueHistory::new(),
            operations_count: 0,
            faults_injected: 0,
            abandoned_operations: 0,
            allocation_failures: 0,
        }
    }

    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    #[must_use]
    pub fn history(&self) -> &QueueHistory {
        &self.history
    }

    /// Push with faults at the boundaries.
    ///
    /// A crash before the call means the push never starts. An allocation
    /// failure from the queue is returned as-is and nothing is recorded.
    pub fn push(&mut self, value: u64) -> Result<(), FaultType> {
        if let Some(FaultType::ThreadCrash) = self.maybe_inject_fault(FaultPoint::BeforeOperation) {
            self.abandoned_operations += 1;
            return Err(FaultType::ThreadCrash);
        }

        let pushed = self.queue.try_push(value);
        self.operations_count += 1;
        match pushed {
            Ok(()) => {
                // Recorded even if the caller crashes next: the value is queued.
                self.history.record_enqueue(0, value);
            }
            Err(returned) => {
                self.allocation_failures += 1;
                debug!(seed = self.seed, value, returned, "push failed to allocate");
                if returned != value {
                    // Treat the pushed value as accepted so the loss is reported.
                    self.history.record_enqueue(0, value);
                }
                return Err(FaultType::AllocationFailure);
            }
        }

        if let Some(FaultType::ThreadCrash) = self.maybe_inject_fault(FaultPoint::AfterOperation) {
            self.abandoned_operations += 1;
            return Err(FaultType::ThreadCrash);
        }
        Ok(())
    }

    /// Pop with faults at the boundaries.
    pub fn pop(&mut self) -> Result<Option<u64>, FaultType> {
        if let Some(FaultType::ThreadCrash) = self.maybe_inject_fault(FaultPoint::BeforeOperation) {
            self.abandoned_operations += 1;
            return Err(FaultType::ThreadCrash);
        }

        let result = self.queue.pop();
        self.operations_count += 1;
        self.history.record_dequeue(0, result);

        if let Some(FaultType::ThreadCrash) = self.maybe_inject_fault(FaultPoint::AfterOperation) {
            // Value left the queue, but the caller never used it.
            self.abandoned_operations += 1;
            return Err(FaultType::ThreadCrash);
        }
        Ok(result)
    }

    /// Injects only caller-side faults. Allocation failures come from the
    /// queue itself.
    fn maybe_inject_fault(&mut self, point: FaultPoint) -> Option<FaultType> {
        if !self.fault_injector.should_fail() {
            return None;
        }
        let fault = if self.rng.gen_bool(0.5) {
            FaultType::ThreadCrash
        } else {
            FaultType::Delay
        };
        self.faults_injected += 1;
        if fault == FaultType::Delay {
            let delay = self.rng.gen_range(1..=1_000_000_u64);
            self.clock.advance_ns(delay);
        }
        debug!(seed = self.seed, ?point, ?fault, "injected fault");
        Some(fault)
    }

    /// Quiescent view of the queue and its history.
    pub fn observe(&mut self) -> QueueObservation {
        QueueObservation::from_history(self.history.clone(), self.queue.contents())
    }

    /// Run every queue property, strict FIFO included.
    pub fn check_invariants(&mut self) -> Vec<PropertyResult> {
        let observation = self.observe();
        let checker = QueuePropertyChecker::new(&observation)
            .with_seed(self.seed.max(1))
            .with_sequential_history();
        let results = checker.check_all();
        for failed in results.iter().filter(|r| !r.holds) {
            debug!(seed = self.seed, property = failed.name, violation = ?failed.violation, "invariant violated");
        }
        results
    }

    #[must_use]
    pub fn stats(&self) -> DstStats {
        DstStats {
            seed: self.seed,
            operations_count: self.operations_count,
            faults_injected: self.faults_injected,
            abandoned_operations: self.abandoned_operations,
            allocation_failures: self.allocation_failures,
            sim_time_ns: self.clock.now_ns(),
        }
    }
}

/// Statistics from a DST run.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct DstStats {
    pub seed: u64,
    pub operations_count: u64,
    pub faults_injected: u64,
    pub abandoned_operations: u64,
    pub allocation_failures: u64,
    pub sim_time_ns: u64,
}

impl DstStats {
    #[must_use]
    pub fn format(&self) -> String {
        format!(
            "DST_SEED={} ops={} faults={} abandoned={} alloc_failures={} sim_time_ns={}",
            self.seed,
            self.operations_count,
            self.faults_injected,
            self.abandoned_operations,
            self.allocation_failures,
            self.sim_time_ns
        )
    }
}

/// Operation in a DST scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DstOp {
    Push(u64),
    Pop,
}

/// Outcome of [`run_dst_scenario`].
#[derive(Debug)]
pub struct DstResult {
    pub passed: bool,
    pub results: Vec<PropertyResult>,
    pub stats: DstStats,
    pub fault_errors: Vec<String>,
}

impl DstResult {
    #[must_use]
    pub fn format(&self) -> String {
        let status = if self.passed { "PASS" } else { "FAIL" };
        let mut out = format!("[{}] {}", status, self.stats.format());
        for r in self.results.iter().filter(|r| !r.holds) {
            out.push_str(&format!("\n  VIOLATION: {}", r.format()));
        }
        out
    }
}

/// Run `operations` with faults, then check every property.
pub fn run_dst_scenario<Q: TestableQueue>(
    seed: u64,
    config: FaultConfig,
    operations: &[DstOp],
) -> DstResult {
    let mut runner: DstRunner<Q> = DstRunner::with_fault_config(seed, config);
    let mut fault_errors = Vec::new();

    for op in operations {
        let result = match *op {
            DstOp::Push(v) => runner.push(v),
            DstOp::Pop => runner.pop().map(|_| ()),
        };
        // Faults are part of the test; keep going.
        if let Err(fault) = result {
            fault_errors.push(format!("{:?}", fault));
        }
    }

    let results = runner.check_invariants();
    DstResult {
        passed: results.iter().all(|r| r.holds),
        results,
        stats: runner.stats(),
        fault_errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct MockQueue {
        values: Mutex<VecDeque<u64>>,
    }

    impl TestableQueue for MockQueue {
        fn new() -> Self {
            Self {
                values: Mutex::new(VecDeque::new()),
            }
        }

        fn push(&self, value: u64) {
            self.values.lock().unwrap().push_back(value);
        }

        fn pop(&self) -> Option<u64> {
            self.values.lock().unwrap().pop_front()
        }

        fn is_empty(&self) -> bool {
            self.values.lock().unwrap().is_empty()
        }

        fn contents(&mut self) -> Vec<u64> {
            self.values.get_mut().unwrap().iter().copied().collect()
        }
    }

    /// Pops the newest element: a LIFO posing as a queue.
    struct StackQueue {
        values: Mutex<Vec<u64>>,
    }

    impl TestableQueue for StackQueue {
        fn new() -> Self {
            Self {
                values: Mutex::new(Vec::new()),
            }
        }

        fn push(&self, value: u64) {
            self.values.lock().unwrap().push(value);
        }

        fn pop(&self) -> Option<u64> {
            self.values.lock().unwrap().pop()
        }

        fn is_empty(&self) -> bool {
            self.values.lock().unwrap().is_empty()
        }

        fn contents(&mut self) -> Vec<u64> {
            self.values.get_mut().unwrap().clone()
        }
    }

    /// Fails to allocate on every third push, handing the value back.
    struct ScarceQueue {
        inner: MockQueue,
        pushes: Mutex<u64>,
    }

    impl TestableQueue for ScarceQueue {
        fn new() -> Self {
            Self {
                inner: MockQueue::new(),
                pushes: Mutex::new(0),
            }
        }

        fn push(&self, value: u64) {
            self.inner.push(value);
        }

        fn try_push(&self, value: u64) -> Result<(), u64> {
            let mut pushes = self.pushes.lock().unwrap();
            *pushes += 1;
            if *pushes % 3 == 0 {
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
    fn test_dst_runner_basic() {
        let mut runner: DstRunner<MockQueue> = DstRunner::new(12345);
        let _ = runner.push(1);
        let _ = runner.push(2);
        let _ = runner.pop();

        let results = runner.check_invariants();
        assert!(results.iter().all(|r| r.holds));
    }

    #[test]
    fn test_dst_scenario_with_faults() {
        let ops: Vec<DstOp> = (1..=200)
            .map(|i| if i % 3 == 0 { DstOp::Pop } else { DstOp::Push(i) })
            .collect();

        let result = run_dst_scenario::<MockQueue>(12345, FaultConfig::aggressive(), &ops);
        assert!(result.passed, "DST failed: {}", result.format());
        assert!(result.stats.faults_injected > 0);
        assert_eq!(result.fault_errors.len() as u64, result.stats.abandoned_operations);
    }

    #[test]
    fn test_lifo_is_caught() {
        let ops = [DstOp::Push(1), DstOp::Push(2), DstOp::Pop];
        let result = run_dst_scenario::<StackQueue>(7, FaultConfig::none(), &ops);
        assert!(!result.passed);
        assert!(result.format().contains("FIFO_Order"));
    }

    #[test]
    fn test_determinism() {
        let ops = [DstOp::Push(1), DstOp::Push(2), DstOp::Pop, DstOp::Push(3), DstOp::Pop];
        let a = run_dst_scenario::<MockQueue>(42, FaultConfig::aggressive(), &ops);
        let b = run_dst_scenario::<MockQueue>(42, FaultConfig::aggressive(), &ops);
        assert_eq!(a.stats, b.stats);
        assert_eq!(a.fault_errors, b.fault_errors);
    }

    #[test]
    fn test_allocation_failure_comes_from_the_queue() {
        let ops: Vec<DstOp> = (1..=9).map(DstOp::Push).chain([DstOp::Pop]).collect();
        let result = run_dst_scenario::<ScarceQueue>(3, FaultConfig::none(), &ops);

        assert!(result.passed, "{}", result.format());
        assert_eq!(result.stats.faults_injected, 0);
        assert_eq!(result.stats.allocation_failures, 3);
        assert_eq!(result.fault_errors, vec!["AllocationFailure"; 3]);
        assert!(result.format().contains("alloc_failures=3"));
    }

    #[test]
    fn test_injected_faults_never_claim_allocation_failure() {
        let ops: Vec<DstOp> = (1..=300).map(DstOp::Push).collect();
        let result = run_dst_scenario::<MockQueue>(99, FaultConfig::aggressive(), &ops);

        assert!(result.passed, "{}", result.format());
        assert!(result.stats.faults_injected > 0);
        assert_eq!(result.stats.allocation_failures, 0);
        assert!(result.fault_errors.iter().all(|e| e == "ThreadCrash"));
    }
}
