//! Verifier that drives a real queue and checks it against the same
//! properties the model proves.
//!
//! The model checks the protocol; this checks that an implementation
//! behaves like it. Sequential runs check strict FIFO, threaded runs check
//! the properties that survive concurrency.

use std::sync::{Barrier, Mutex};

use lfq_core::{
    encode_value, PropertyChecker, QueueHistory, QueueObservation, QueuePropertyChecker, TestableQueue,
};

/// Result of verification.
#[derive(Debug, Clone)]
pub struct VerificationResult {
    /// Whether all checks passed.
    pub passed: bool,
    /// Number of operations executed.
    pub operations_count: usize,
    /// Properties checked.
    pub invariants_checked: Vec<String>,
    /// Error message if verification failed.
    pub error: Option<String>,
}

impl VerificationResult {
    fn from_observation(observation: &QueueObservation, sequential: bool, ops: usize, context: &str) -> Self {
        let checker = QueuePropertyChecker::new(observation);
        let checker = if sequential {
            checker.with_sequential_history()
        } else {
            checker
        };
        let results = checker.check_all();
        let error = results
            .iter()
            .find(|r| !r.holds)
            .map(|r| format!("{}: {}", context, r.format()));
        Self {
            passed: error.is_none(),
            operations_count: ops,
            invariants_checked: results.iter().map(|r| r.name.to_string()).collect(),
            error,
        }
    }
}

/// Configuration for verification.
#[derive(Debug, Clone)]
pub struct VerifierConfig {
    /// Number of operations to run.
    pub operations_count: usize,
    /// Check invariants after every N operations.
    pub check_interval: usize,
    /// Threads for [`verify_concurrent`].
    pub threads: usize,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            operations_count: 100,
            check_interval: 10,
            threads: 4,
        }
    }
}

impl VerifierConfig {
    /// Quick verification.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            operations_count: 50,
            check_interval: 10,
            threads: 2,
        }
    }

    /// Thorough verification.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            operations_count: 2000,
            check_interval: 5,
            threads: 8,
        }
    }
}

/// Single-threaded driver that records what it does.
struct Recorder<Q> {
    queue: Q,
    history: QueueHistory,
    ops: usize,
}

impl<Q: TestableQueue> Recorder<Q> {
    fn new() -> Self {
        Self {
            queue: Q::new(),
            history: QueueHistory::new(),
            ops: 0,
        }
    }

    fn push(&mut self, value: u64) {
        self.queue.push(value);
        self.history.record_enqueue(0, value);
        self.ops += 1;
    }

    fn pop(&mut self) -> Option<u64> {
        let value = self.queue.pop();
        self.history.record_dequeue(0, value);
        self.ops += 1;
        value
    }

    fn check(&mut self, context: &str) -> VerificationResult {
        let observation = QueueObservation::from_history(self.history.clone(), self.queue.contents());
        VerificationResult::from_observation(&observation, true, self.ops, context)
    }
}

/// Verify an implementation sequentially.
///
/// Runs fill-then-drain, interleaved push/pop and drain-to-empty phases,
/// checking every queue property including strict FIFO.
pub fn verify_implementation<Q: TestableQueue>(config: &VerifierConfig) -> VerificationResult {
    let mut ops = 0;

    // Fill, then drain half.
    let mut q = Recorder::<Q>::new();
    for i in 1..=10 {
        q.push(i);
    }
    for _ in 0..5 {
        q.pop();
    }
    let result = q.check("after fill and partial drain");
    if !result.passed {
        return result;
    }
    ops += q.ops;

    // Interleaved.
    let mut q = Recorder::<Q>::new();
    let interval = config.check_interval.max(1);
    for i in 0..config.operations_count as u64 {
        q.push(100 + i);
        if i % 3 == 0 && i > 0 {
            q.pop();
        }
        if q.ops % interval == 0 {
            let result = q.check(&format!("at operation {}", q.ops));
            if !result.passed {
                return result;
            }
        }
    }

    // Drain; an empty queue must say so.
    while q.pop().is_some() {}
    if !q.queue.is_empty() {
        return VerificationResult {
            passed: false,
            operations_count: ops + q.ops,
            invariants_checked: vec!["EmptyAfterDrain".into()],
            error: Some("pop returned None but is_empty is false".into()),
        };
    }
    let mut result = q.check("after emptying");
    result.operations_count += ops;
    result
}

/// Verify an implementation under real contention.
///
/// Half the threads produce encoded values, the rest consume; once all have
/// joined the remaining contents are drained into the observation.
pub fn verify_concurrent<Q: TestableQueue>(config: &VerifierConfig) -> VerificationResult {
    let threads = config.threads.max(2);
    let producers = threads / 2;
    let consumers = threads - producers;
    let per_producer = (config.operations_count / producers).max(1) as u32;

    let mut queue = Q::new();
    let history = Mutex::new(QueueHistory::new());
    let barrier = Barrier::new(threads);

    std::thread::scope(|s| {
        for p in 0..producers {
            let (queue, history, barrier) = (&queue, &history, &barrier);
            s.spawn(move || {
                let mut local = QueueHistory::new();
                barrier.wait();
                for seq in 0..per_producer {
                    let value = encode_value(p as u32, seq);
                    queue.push(value);
                    local.record_enqueue(p as u64, value);
                }
                merge(history, &local);
            });
        }
        for c in 0..consumers {
            let (queue, history, barrier) = (&queue, &history, &barrier);
            s.spawn(move || {
                let mut local = QueueHistory::new();
                let tid = (producers + c) as u64;
                barrier.wait();
                for _ in 0..per_producer {
                    local.record_dequeue(tid, queue.pop());
                }
                merge(history, &local);
            });
        }
    });

    let history = history
        .into_inner()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    let ops = history.operations.len();
    let observation = QueueObservation::from_history(history, queue.contents());
    VerificationResult::from_observation(&observation, false, ops, "after concurrent operations")
}

fn merge(history: &Mutex<QueueHistory>, local: &QueueHistory) {
    history
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .extend_from(local);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

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

    #[test]
    fn test_verifier_with_correct_impl() {
        let config = VerifierConfig::quick();
        let result = verify_implementation::<MockQueue>(&config);

        assert!(result.passed, "Verification should pass: {:?}", result.error);
        assert!(result.operations_count > 0);
        assert!(result.invariants_checked.contains(&"NoLostElements".to_string()));
        assert!(result.invariants_checked.contains(&"FIFO_Order".to_string()));
    }

    #[test]
    fn test_concurrent_verifier_with_correct_impl() {
        let result = verify_concurrent::<MockQueue>(&VerifierConfig::default());
        assert!(result.passed, "{:?}", result.error);
        assert!(!result.invariants_checked.contains(&"FIFO_Order".to_string()));
    }

    // Drops every fourth value on push.
    struct LossyQueue {
        values: Mutex<VecDeque<u64>>,
        pushes: Mutex<u64>,
    }

    impl TestableQueue for LossyQueue {
        fn new() -> Self {
            Self {
                values: Mutex::new(VecDeque::new()),
                pushes: Mutex::new(0),
            }
        }

        fn push(&self, value: u64) {
            let mut pushes = self.pushes.lock().unwrap();
            *pushes += 1;
            if *pushes % 4 != 0 {
                self.values.lock().unwrap().push_back(value);
            }
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

    #[test]
    fn test_verifier_catches_lost_elements() {
        let result = verify_implementation::<LossyQueue>(&VerifierConfig::quick());
        assert!(!result.passed);
        let error = result.error.unwrap();
        assert!(error.contains("NoLostElements"), "{}", error);
    }

    // Hands values back newest first.
    struct LifoQueue {
        values: Mutex<Vec<u64>>,
    }

    impl TestableQueue for LifoQueue {
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

    #[test]
    fn test_verifier_catches_lifo() {
        let result = verify_implementation::<LifoQueue>(&VerifierConfig::quick());
        assert!(!result.passed);
        // A single producer reversed trips both ordering checks.
        assert!(result.error.unwrap().contains("PerProducerOrder"));
    }
}
