//! Invariant traits for the queue.
//!
//! - `queue`: NoLostElements, NoDuplicates, NoPhantomElements,
//!   PerProducerOrder, FIFO_Order
//!
//! Node-lifetime invariants (no use after free, no double free, no leak)
//! cannot be observed from outside a running queue; they are checked by the
//! stateright model and reported as `MemoryIssue`s.

pub mod queue;

pub use queue::{
    QueueHistory, QueueObservation, QueueOpType, QueueOperation, QueueProperties,
    QueuePropertyChecker,
};
