//! Queue interface shared by the DST harnesses, the threaded scenarios and
//! the implementation verifier.
//!
//! Minimal on purpose: implementations know nothing about simulation or
//! model checking. Values are `u64` so histories can carry
//! [`encode_value`](crate::encode_value) tags.

/// A queue that the verification layers can drive.
pub trait TestableQueue: Send + Sync {
    /// Create a new empty queue.
    fn new() -> Self;

    fn push(&self, value: u64);

    /// Push that may fail to allocate. On failure the value is handed back
    /// and the queue is unchanged.
    ///
    /// Queues whose push cannot fail keep the default.
    fn try_push(&self, value: u64) -> Result<(), u64> {
        self.push(value);
        Ok(())
    }

    fn pop(&self) -> Option<u64>;

    fn is_empty(&self) -> bool;

    /// Queued values, head to tail. Only called while quiescent.
    fn contents(&mut self) -> Vec<u64>;
}
