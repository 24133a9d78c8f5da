//! Kani proof harnesses for the queue.
//!
//! Bounded model checking of sequential behaviour: every value and every
//! push/pop sequence up to the unwind bound.
//!
//! # Running the proofs
//!
//! ```bash
//! # Run all proofs
//! cargo kani -p lfq
//!
//! # Run a specific proof
//! cargo kani -p lfq --harness proof_fifo_two_values
//! ```
//!
//! # Note on concurrency
//!
//! Kani does not execute threads. Interleavings are covered by loom and by
//! the stateright model of the reference-counting protocol.

#[cfg(kani)]
mod proofs {
    use crate::queue::LockFreeQueue;

    /// A pushed value comes straight back out.
    #[kani::proof]
    #[kani::unwind(4)]
    fn proof_pop_returns_pushed_value() {
        let queue = LockFreeQueue::new();
        let value: u64 = kani::any();

        queue.push(value);

        kani::assert(queue.pop() == Some(value), "pop must return the pushed value");
        kani::assert(queue.pop().is_none(), "queue must be empty again");
    }

    /// Two values leave in the order they entered.
    #[kani::proof]
    #[kani::unwind(4)]
    fn proof_fifo_two_values() {
        let queue = LockFreeQueue::new();
        let v1: u64 = kani::any();
        let v2: u64 = kani::any();
        kani::assume(v1 != v2);

        queue.push(v1);
        queue.push(v2);

        kani::assert(queue.pop() == Some(v1), "first pushed must be first popped");
        kani::assert(queue.pop() == Some(v2), "second pushed must be second popped");
    }

    #[kani::proof]
    fn proof_empty_pop_returns_none() {
        let queue: LockFreeQueue<u64> = LockFreeQueue::new();
        kani::assert(queue.pop().is_none(), "pop on an empty queue must return None");
        kani::assert(queue.is_empty(), "failed pop must leave the queue empty");
    }

    /// Any push/pop sequence matches a counter model.
    #[kani::proof]
    #[kani::unwind(6)]
    fn proof_push_pop_sequence_matches_model() {
        let queue = LockFreeQueue::new();
        let mut next_push: u64 = 0;
        let mut next_pop: u64 = 0;

        for _ in 0..4u8 {
            if kani::any() {
                queue.push(next_push);
                next_push += 1;
            } else {
                let popped = queue.pop();
                if next_pop < next_push {
                    kani::assert(popped == Some(next_pop), "pop must return the oldest value");
                    next_pop += 1;
                } else {
                    kani::assert(popped.is_none(), "pop must report empty");
                }
            }
        }

        kani::assert(
            queue.is_empty() == (next_pop == next_push),
            "is_empty must agree with the model",
        );
    }
}
