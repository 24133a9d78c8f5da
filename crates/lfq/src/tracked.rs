//! History-recording wrapper used for invariant checking.
//!
//! `TrackedQueue` forwards to [`LockFreeQueue<u64>`] and records each
//! completed operation in a [`QueueHistory`]. Recording happens after the
//! queue operation returns, under a mutex, so the history order of two
//! overlapping operations is arbitrary; per-thread order is exact.

use std::sync::Mutex;

use lfq_core::invariants::queue::{QueueHistory, QueueObservation};

use crate::error::PushError;
use crate::queue::LockFreeQueue;

/// [`LockFreeQueue<u64>`] that remembers what happened to it.
#[derive(Debug, Default)]
pub struct TrackedQueue {
    queue: LockFreeQueue<u64>,
    history: Mutex<QueueHistory>,
}

impl TrackedQueue {
    /// Create an empty tracked queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Push `value` on behalf of `thread_id`.
    pub fn push(&self, thread_id: u64, value: u64) {
        self.queue.push(value);
        self.record(|h| h.record_enqueue(thread_id, value));
    }

    /// Push `value` on behalf of `thread_id`; failures are not recorded.
    pub fn try_push(&self, thread_id: u64, value: u64) -> Result<(), PushError<u64>> {
        self.queue.try_push(value)?;
        self.record(|h| h.record_enqueue(thread_id, value));
        Ok(())
    }

    /// Pop on behalf of `thread_id`.
    pub fn pop(&self, thread_id: u64) -> Option<u64> {
        let value = self.queue.pop();
        self.record(|h| h.record_dequeue(thread_id, value));
        value
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Quiescent view for the property checker.
    pub fn observe(&mut self) -> QueueObservation {
        let history = self
            .history
            .get_mut()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();
        QueueObservation::from_history(history, self.queue.snapshot())
    }

    fn record(&self, f: impl FnOnce(&mut QueueHistory)) {
        let mut history = self
            .history
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        f(&mut history);
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use lfq_core::invariants::queue::QueuePropertyChecker;
    use lfq_core::{encode_value, PropertyChecker};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_sequential_history_is_fifo() {
        let mut queue = TrackedQueue::new();
        queue.push(0, 1);
        queue.push(0, 2);
        assert_eq!(queue.pop(1), Some(1));
        queue.push(0, 3);
        assert_eq!(queue.pop(1), Some(2));

        let observation = queue.observe();
        assert_eq!(observation.contents, vec![3]);
        let checker = QueuePropertyChecker::new(&observation).with_sequential_history();
        assert!(checker.all_hold(), "{}", checker.report());
    }

    #[test]
    fn test_concurrent_history_holds_per_producer_order() {
        let queue = Arc::new(TrackedQueue::new());

        let handles: Vec<_> = (0..3_u32)
            .map(|p| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for seq in 0..200 {
                        queue.push(u64::from(p), encode_value(p, seq));
                        if seq % 2 == 0 {
                            queue.pop(u64::from(p));
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let mut queue = Arc::try_unwrap(queue).ok().unwrap();
        let observation = queue.observe();
        assert_eq!(
            observation.dequeued.len() + observation.contents.len(),
            observation.enqueued.len()
        );
        let checker = QueuePropertyChecker::new(&observation);
        assert!(checker.all_hold(), "{}", checker.report());
    }
}
