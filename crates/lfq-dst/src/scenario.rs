//! Threaded contention scenarios.
//!
//! Each scenario is a fixed list of operations per thread that tends to
//! provoke a particular race: two pushes fighting over the same `next`
//! slot, two pops fighting over `head`, a pop meeting a half-finished
//! push. They mirror the loom tests in `lfq`, but run on real threads and
//! rely on repetition and the OS scheduler to vary interleavings.

use std::sync::Barrier;

use lfq_core::invariants::queue::{QueueHistory, QueueObservation, QueuePropertyChecker};
use lfq_core::{encode_value, PropertyChecker, TestableQueue};


/// Operation in a scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueOp {
    Push(u64),
    Pop,
}

/// Named set of per-thread operation lists.
#[derive(Debug, Clone)]
pub struct QueueScenario {
    /// Name for debugging
    pub name: String,
    /// Values pushed before any thread starts
    pub prefill: Vec<u64>,
    /// Operations per thread (thread_id -> operations)
    pub operations: Vec<Vec<QueueOp>>,
    /// What this exercises
    pub description: String,
}

impl QueueScenario {
    /// Two threads race to append after the same tail.
    #[must_use]
    pub fn concurrent_push(v0: u64, v1: u64) -> Self {
        Self {
            name: "concurrent_push".into(),
            prefill: vec![],
            operations: vec![vec![QueueOp::Push(v0)], vec![QueueOp::Push(v1)]],
            description: "Two pushes contend for one next slot; the loser helps advance tail".into(),
        }
    }

    /// Two threads race to advance head.
    #[must_use]
    pub fn concurrent_pop() -> Self {
        Self {
            name: "concurrent_pop".into(),
            prefill: vec![1, 2],
            operations: vec![vec![QueueOp::Pop], vec![QueueOp::Pop]],
            description: "Two pops contend for head; each must get a different value".into(),
        }
    }

    /// A pop races a push on a queue holding one value.
    #[must_use]
    pub fn push_pop_race(value: u64) -> Self {
        Self {
            name: "push_pop_race".into(),
            prefill: vec![value],
            operations: vec![vec![QueueOp::Push(value + 1)], vec![QueueOp::Pop]],
            description: "Pop retires the old head while push retires the old tail".into(),
        }
    }

    /// Two pops race for the last value.
    #[must_use]
    pub fn last_element_race(value: u64) -> Self {
        Self {
            name: "last_element_race".into(),
            prefill: vec![value],
            operations: vec![vec![QueueOp::Pop], vec![QueueOp::Pop]],
            description: "One pop wins, the other sees the sentinel and reports empty".into(),
        }
    }

    /// Many threads pushing at once.
    #[must_use]
    pub fn cas_storm(values: &[u64]) -> Self {
        Self {
            name: "cas_storm".into(),
            prefill: vec![],
            operations: values.iter().map(|&v| vec![QueueOp::Push(v)]).collect(),
            description: "Every thread pushes; maximum contention on tail".into(),
        }
    }

    /// Producers and consumers interleaving many operations.
    #[must_use]
    pub fn producer_consumer(producers: u32, consumers: usize, per_producer: u32) -> Self {
        let mut operations: Vec<Vec<QueueOp>> = (0..producers)
            .map(|p| {
                (0..per_producer)
                    .map(|seq| QueueOp::Push(encode_value(p, seq)))
                    .collect()
            })
            .collect();
        operations.extend((0..consumers).map(|_| vec![QueueOp::Pop; per_producer as usize]));
        Self {
            name: "producer_consumer".into(),
            prefill: vec![],
            operations,
            description: "Mixed producers and consumers; checks per-producer order".into(),
        }
    }

    /// All standard scenarios.
    #[must_use]
    pub fn all_scenarios() -> Vec<Self> {
        vec![
            Self::concurrent_push(100, 200),
            Self::concurrent_pop(),
            Self::push_pop_race(100),
            Self::last_element_race(100),
            Self::cas_storm(&[1, 2, 3, 4]),
            Self::producer_consumer(2, 2, 64),
        ]
    }

    #[must_use]
    pub fn threads(&self) -> usize {
        self.operations.len()
    }

    /// Run once on real threads, released together by a barrier.
    ///
    /// Each thread records its own history; they are merged afterwards in
    /// thread order, which keeps program order per thread.
    pub fn run<Q: TestableQueue>(&self) -> QueueObservation {
        let mut queue = Q::new();
        let mut history = QueueHistory::new();
        for &value in &self.prefill {
            queue.push(value);
            history.record_enqueue(u64::MAX, value);
        }

        let barrier = Barrier::new(self.threads());
        let per_thread: Vec<QueueHistory> = std::thread::scope(|s| {
            let handles: Vec<_> = self
                .operations
                .iter()
                .enumerate()
                .map(|(tid, ops)| {
                    let queue = &queue;
                    let barrier = &barrier;
                    s.spawn(move || {
                        let mut local = QueueHistory::new();
                        barrier.wait();
                        for op in ops {
                            match *op {
                                QueueOp::Push(v) => {
                                    queue.push(v);
                                    local.record_enqueue(tid as u64, v);
                                }
                                QueueOp::Pop => {
                                    local.record_dequeue(tid as u64, queue.pop());
                                }
                            }
                        }
                        local
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
                .collect()
        });

        for local in &per_thread {
            history.extend_from(local);
        }
        QueueObservation::from_history(history, queue.contents())
    }

    /// Run once and check the concurrency-safe properties.
    pub fn verify<Q: TestableQueue>(&self) -> Result<(), String> {
        let observation = self.run::<Q>();
        let violations = QueuePropertyChecker::new(&observation).violations();
        if violations.is_empty() {
            Ok(())
        } else {
            Err(format!(
                "{}: {}",
                self.name,
                violations
                    .iter()
                    .map(|v| v.format())
                    .collect::<Vec<_>>()
                    .join("; ")
            ))
        }
    }
}
