//! Queue invariants.
//!
//! | Property | Description |
//! |----------|-------------|
//! | NoLostElements | Every enqueued element is dequeued or still queued |
//! | NoDuplicates | No element is delivered twice |
//! | NoPhantomElements | Every dequeued element was enqueued |
//! | PerProducerOrder | Each consumer sees one producer's elements in push order |
//! | FIFO_Order | Sequential history replays against a model queue |
//!
//! `FIFO_Order` is only meaningful when the history is a sequential
//! execution (single thread, or the DST harness interleaving whole
//! operations). Under real concurrency the recorded order of two
//! overlapping operations is arbitrary, so only `PerProducerOrder` applies.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::counterexample::{Counterexample, StateSnapshot};
use crate::property::{PropertyChecker, PropertyResult};

const SOURCE: &str = "queue";

/// Properties that any queue implementation must expose for checking.
pub trait QueueProperties {
    /// Every element that was enqueued, in recorded order.
    fn enqueued_elements(&self) -> Vec<u64>;

    /// Every element that was dequeued, in recorded order.
    fn dequeued_elements(&self) -> Vec<u64>;

    /// Elements still in the queue (head to tail).
    fn current_contents(&self) -> Vec<u64>;

    /// Operation history.
    fn history(&self) -> QueueHistory;
}

/// History of queue operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueHistory {
    /// Operations in recorded order
    pub operations: Vec<QueueOperation>,
}

/// A single recorded queue operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueOperation {
    /// Thread that performed the operation
    pub thread_id: u64,
    /// Type of operation
    pub op_type: QueueOpType,
    /// Element pushed, or element returned by pop
    pub element: Option<u64>,
    /// Position in the recorded order (1-based)
    pub step: u64,
}

/// Type of queue operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueOpType {
    Enqueue,
    Dequeue,
    DequeueEmpty,
}

impl QueueHistory {
    /// Create a new empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Step number the next recorded operation will get.
    #[must_use]
    pub fn next_step(&self) -> u64 {
        self.operations.len() as u64 + 1
    }

    /// Record a successful push.
    pub fn record_enqueue(&mut self, thread_id: u64, element: u64) {
        let step = self.next_step();
        self.operations.push(QueueOperation {
            thread_id,
            op_type: QueueOpType::Enqueue,
            element: Some(element),
            step,
        });
    }

    /// Record a pop and what it returned.
    pub fn record_dequeue(&mut self, thread_id: u64, element: Option<u64>) {
        let step = self.next_step();
        self.operations.push(QueueOperation {
            thread_id,
            op_type: if element.is_some() {
                QueueOpType::Dequeue
            } else {
                QueueOpType::DequeueEmpty
            },
            element,
            step,
        });
    }

    /// Append another thread's history, renumbering its steps.
    ///
    /// Per-thread program order is preserved, which is all that
    /// `PerProducerOrder` needs from a concurrent run.
    pub fn extend_from(&mut self, other: &QueueHistory) {
        for op in &other.operations {
            let step = self.next_step();
            self.operations.push(QueueOperation { step, ..op.clone() });
        }
    }

    /// Elements of every `Enqueue`, in order.
    #[must_use]
    pub fn enqueued(&self) -> Vec<u64> {
        self.elements_of(QueueOpType::Enqueue)
    }

    /// Elements of every successful `Dequeue`, in order.
    #[must_use]
    pub fn dequeued(&self) -> Vec<u64> {
        self.elements_of(QueueOpType::Dequeue)
    }

    fn elements_of(&self, op_type: QueueOpType) -> Vec<u64> {
        self.operations
            .iter()
            .filter(|op| op.op_type == op_type)
            .filter_map(|op| op.element)
            .collect()
    }
}

/// Owned point-in-time view of a queue, produced once it is quiescent.
#[derive(Debug, Clone, Default)]
pub struct QueueObservation {
    pub enqueued: Vec<u64>,
    pub dequeued: Vec<u64>,
    pub contents: Vec<u64>,
    pub history: QueueHistory,
}

impl QueueObservation {
    /// Build an observation from a history and the remaining contents.
    #[must_use]
    pub fn from_history(history: QueueHistory, contents: Vec<u64>) -> Self {
        Self {
            enqueued: history.enqueued(),
            dequeued: history.dequeued(),
            contents,
            history,
        }
    }
}

impl QueueProperties for QueueObservation {
    fn enqueued_elements(&self) -> Vec<u64> {
        self.enqueued.clone()
    }

    fn dequeued_elements(&self) -> Vec<u64> {
        self.dequeued.clone()
    }

    fn current_contents(&self) -> Vec<u64> {
        self.contents.clone()
    }

    fn history(&self) -> QueueHistory {
        self.history.clone()
    }
}

/// Property checker for queue implementations.
pub struct QueuePropertyChecker<'a, T: QueueProperties> {
    queue: &'a T,
    dst_seed: Option<u64>,
    sequential: bool,
}

impl<'a, T: QueueProperties> QueuePropertyChecker<'a, T> {
    /// Create a checker with the concurrency-safe properties only.
    #[must_use]
    pub fn new(queue: &'a T) -> Self {
        Self {
            queue,
            dst_seed: None,
            sequential: false,
        }
    }

    /// Set DST seed for counterexample reproduction.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        debug_assert!(seed != 0, "DST seed should not be zero");
        self.dst_seed = Some(seed);
        self
    }

    /// Also check strict FIFO replay; the history must be sequential.
    #[must_use]
    pub fn with_sequential_history(mut self) -> Self {
        self.sequential = true;
        self
    }

    fn counterexample(&self, description: String, variables: Vec<(String, String)>) -> Counterexample {
        let mut ce = match self.dst_seed {
            Some(seed) => Counterexample::with_seed(seed),
            None => Counterexample::new(),
        };
        ce.add_state(StateSnapshot {
            step: 1,
            description,
            variables,
        });
        ce
    }

    fn check_no_lost_elements(&self) -> PropertyResult {
        let enqueued = self.queue.enqueued_elements();
        let dequeued: HashSet<u64> = self.queue.dequeued_elements().into_iter().collect();
        let contents: HashSet<u64> = self.queue.current_contents().into_iter().collect();

        match enqueued
            .iter()
            .find(|e| !dequeued.contains(e) && !contents.contains(e))
        {
            Some(lost) => {
                let ce = self.counterexample(
                    format!("Element {} lost", lost),
                    vec![
                        ("enqueued".to_string(), format!("{:?}", enqueued)),
                        ("dequeued".to_string(), format!("{:?}", dequeued)),
                        ("contents".to_string(), format!("{:?}", contents)),
                    ],
                );
                PropertyResult::fail(
                    "NoLostElements",
                    SOURCE,
                    format!(
                        "Element {} was enqueued but is neither dequeued nor queued",
                        lost
                    ),
                    Some(ce),
                )
            }
            None => PropertyResult::pass("NoLostElements", SOURCE),
        }
    }

    fn check_no_duplicates(&self) -> PropertyResult {
        let mut seen = HashSet::new();
        for element in self.queue.dequeued_elements() {
            if !seen.insert(element) {
                return PropertyResult::fail(
                    "NoDuplicates",
                    SOURCE,
                    format!("Element {} was dequeued more than once", element),
                    None,
                );
            }
        }
        for element in self.queue.current_contents() {
            if !seen.insert(element) {
                return PropertyResult::fail(
                    "NoDuplicates",
                    SOURCE,
                    format!("Element {} is queued and was also dequeued or queued twice", element),
                    None,
                );
            }
        }

        PropertyResult::pass("NoDuplicates", SOURCE)
    }

    fn check_no_phantom_elements(&self) -> PropertyResult {
        let enqueued: HashSet<u64> = self.queue.enqueued_elements().into_iter().collect();
        let phantom = self
            .queue
            .dequeued_elements()
            .into_iter()
            .chain(self.queue.current_contents())
            .find(|e| !enqueued.contains(e));

        match phantom {
            Some(element) => PropertyResult::fail(
                "NoPhantomElements",
                SOURCE,
                format!("Element {} was observed but never enqueued", element),
                None,
            ),
            None => PropertyResult::pass("NoPhantomElements", SOURCE),
        }
    }

    /// For every consumer, elements from any one producer arrive in the
    /// order that producer pushed them.
    fn check_per_producer_order(&self) -> PropertyResult {
        let history = self.queue.history();

        // element -> (producer thread, position in that producer's pushes)
        let mut origin: HashMap<u64, (u64, usize)> = HashMap::new();
        let mut pushes_per_thread: HashMap<u64, usize> = HashMap::new();
        for op in &history.operations {
            if let (QueueOpType::Enqueue, Some(e)) = (op.op_type, op.element) {
                let position = pushes_per_thread.entry(op.thread_id).or_insert(0);
                origin.insert(e, (op.thread_id, *position));
                *position += 1;
            }
        }

        // (consumer, producer) -> last position seen
        let mut last_seen: HashMap<(u64, u64), (usize, u64)> = HashMap::new();
        for op in &history.operations {
            let (QueueOpType::Dequeue, Some(e)) = (op.op_type, op.element) else {
                continue;
            };
            let Some(&(producer, position)) = origin.get(&e) else {
                continue;
            };
            if let Some(&(previous, previous_element)) = last_seen.get(&(op.thread_id, producer)) {
                if position <= previous {
                    return PropertyResult::fail(
                        "PerProducerOrder",
                        SOURCE,
                        format!(
                            "Thread {} dequeued {} after {}, but producer {} pushed {} first (step {})",
                            op.thread_id, e, previous_element, producer, e, op.step
                        ),
                        None,
                    );
                }
            }
            last_seen.insert((op.thread_id, producer), (position, e));
        }

        PropertyResult::pass("PerProducerOrder", SOURCE)
    }

    /// Replay the history against a model queue.
    fn check_fifo_order(&self) -> PropertyResult {
        let history = self.queue.history();
        let mut model: VecDeque<u64> = VecDeque::new();

        for op in &history.operations {
            match op.op_type {
                QueueOpType::Enqueue => {
                    if let Some(e) = op.element {
                        model.push_back(e);
                    }
                }
                QueueOpType::Dequeue => {
                    let expected = model.pop_front();
                    if expected != op.element {
                        return PropertyResult::fail(
                            "FIFO_Order",
                            SOURCE,
                            format!(
                                "pop returned {:?} but model expected {:?} (step {})",
                                op.element, expected, op.step
                            ),
                            None,
                        );
                    }
                }
                QueueOpType::DequeueEmpty => {
                    if !model.is_empty() {
                        return PropertyResult::fail(
                            "FIFO_Order",
                            SOURCE,
                            format!(
                                "pop returned None but model holds {} elements (step {})",
                                model.len(),
                                op.step
                            ),
                            None,
                        );
                    }
                }
            }
        }

        let contents: Vec<u64> = self.queue.current_contents();
        if contents != model.iter().copied().collect::<Vec<_>>() {
            return PropertyResult::fail(
                "FIFO_Order",
                SOURCE,
                format!("queue holds {:?} but model holds {:?}", contents, model),
                None,
            );
        }

        PropertyResult::pass("FIFO_Order", SOURCE)
    }
}

impl<T: QueueProperties> PropertyChecker for QueuePropertyChecker<'_, T> {
    fn check_all(&self) -> Vec<PropertyResult> {
        let mut results = vec![
            self.check_no_lost_elements(),
            self.check_no_duplicates(),
            self.check_no_phantom_elements(),
            self.check_per_producer_order(),
        ];
        if self.sequential {
            results.push(self.check_fifo_order());
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Sequential reference queue recording its own history.
    struct ModelQueue {
        items: VecDeque<u64>,
        history: QueueHistory,
    }

    impl ModelQueue {
        fn new() -> Self {
            Self {
                items: VecDeque::new(),
                history: QueueHistory::new(),
            }
        }

        fn push(&mut self, thread: u64, value: u64) {
            self.items.push_back(value);
            self.history.record_enqueue(thread, value);
        }

        fn pop(&mut self, thread: u64) -> Option<u64> {
            let value = self.items.pop_front();
            self.history.record_dequeue(thread, value);
            value
        }

        fn observe(&self) -> QueueObservation {
            QueueObservation::from_history(self.history.clone(), self.items.iter().copied().collect())
        }
    }

    #[test]
    fn test_correct_queue_passes_all() {
        let mut queue = ModelQueue::new();
        queue.push(0, 1);
        queue.push(0, 2);
        queue.push(0, 3);
        queue.pop(1);
        queue.pop(1);

        let observation = queue.observe();
        let checker = QueuePropertyChecker::new(&observation).with_sequential_history();
        assert!(checker.all_hold(), "{}", checker.report());
        assert_eq!(checker.check_all().len(), 5);
    }

    #[test]
    fn test_empty_pops_are_consistent() {
        let mut queue = ModelQueue::new();
        assert_eq!(queue.pop(0), None);
        queue.push(0, 5);
        assert_eq!(queue.pop(0), Some(5));
        assert_eq!(queue.pop(0), None);

        let observation = queue.observe();
        assert!(QueuePropertyChecker::new(&observation)
            .with_sequential_history()
            .all_hold());
    }

    #[test]
    fn test_lost_element_detected() {
        let mut history = QueueHistory::new();
        history.record_enqueue(0, 1);
        history.record_enqueue(0, 2);
        history.record_enqueue(0, 3);
        history.record_dequeue(1, Some(1));
        // Element 3 is missing from contents
        let observation = QueueObservation::from_history(history, vec![2]);

        let results = QueuePropertyChecker::new(&observation).check_all();
        let no_lost = results.iter().find(|r| r.name == "NoLostElements").unwrap();
        assert!(!no_lost.holds);
        assert!(no_lost.violation.as_ref().unwrap().contains('3'));
        assert!(no_lost.counterexample.is_some());
    }

    #[test]
    fn test_duplicate_delivery_detected() {
        let mut history = QueueHistory::new();
        history.record_enqueue(0, 1);
        history.record_dequeue(1, Some(1));
        history.record_dequeue(2, Some(1));
        let observation = QueueObservation::from_history(history, vec![]);

        let results = QueuePropertyChecker::new(&observation).check_all();
        let no_dup = results.iter().find(|r| r.name == "NoDuplicates").unwrap();
        assert!(!no_dup.holds);
    }

    #[test]
    fn test_phantom_element_detected() {
        let mut history = QueueHistory::new();
        history.record_enqueue(0, 1);
        history.record_dequeue(1, Some(9));
        let observation = QueueObservation::from_history(history, vec![1]);

        let results = QueuePropertyChecker::new(&observation).check_all();
        let phantom = results.iter().find(|r| r.name == "NoPhantomElements").unwrap();
        assert!(!phantom.holds);
    }

    #[test]
    fn test_lifo_history_fails_fifo() {
        let mut history = QueueHistory::new();
        history.record_enqueue(0, 1);
        history.record_enqueue(0, 2);
        history.record_dequeue(0, Some(2));
        history.record_dequeue(0, Some(1));
        let observation = QueueObservation::from_history(history, vec![]);

        let results = QueuePropertyChecker::new(&observation)
            .with_sequential_history()
            .check_all();
        let fifo = results.iter().find(|r| r.name == "FIFO_Order").unwrap();
        assert!(!fifo.holds);
        let order = results.iter().find(|r| r.name == "PerProducerOrder").unwrap();
        assert!(!order.holds);
    }

    #[test]
    fn test_interleaved_producers_keep_per_producer_order() {
        // Two producers interleaved; one consumer sees 10, 20, 11, 21.
        let mut producer_a = QueueHistory::new();
        producer_a.record_enqueue(0, 10);
        producer_a.record_enqueue(0, 11);
        let mut producer_b = QueueHistory::new();
        producer_b.record_enqueue(1, 20);
        producer_b.record_enqueue(1, 21);
        let mut consumer = QueueHistory::new();
        for e in [10, 20, 11, 21] {
            consumer.record_dequeue(2, Some(e));
        }

        let mut history = QueueHistory::new();
        history.extend_from(&producer_a);
        history.extend_from(&producer_b);
        history.extend_from(&consumer);
        assert_eq!(history.operations.last().unwrap().step, 8);

        let observation = QueueObservation::from_history(history, vec![]);
        let checker = QueuePropertyChecker::new(&observation);
        assert!(checker.all_hold(), "{}", checker.report());
    }

    #[test]
    fn test_spurious_empty_pop_fails_fifo() {
        let mut history = QueueHistory::new();
        history.record_enqueue(0, 1);
        history.record_dequeue(0, None);
        let observation = QueueObservation::from_history(history, vec![1]);

        let results = QueuePropertyChecker::new(&observation)
            .with_sequential_history()
            .check_all();
        let fifo = results.iter().find(|r| r.name == "FIFO_Order").unwrap();
        assert!(!fifo.holds);
        assert!(fifo.violation.as_ref().unwrap().contains("returned None"));
    }

    #[test]
    fn test_drained_queue_with_pending_model_values_fails_fifo() {
        let mut history = QueueHistory::new();
        history.record_enqueue(0, 1);
        history.record_enqueue(0, 2);
        history.record_dequeue(1, Some(1));
        // 2 was never popped, yet the queue reports nothing left.
        let observation = QueueObservation::from_history(history, vec![]);

        let results = QueuePropertyChecker::new(&observation)
            .with_sequential_history()
            .check_all();
        let fifo = results.iter().find(|r| r.name == "FIFO_Order").unwrap();
        assert!(!fifo.holds);
        assert!(fifo.violation.as_ref().unwrap().contains("model holds [2]"));
    }
}
