//! # lfq-core
//!
//! Core types and invariants for verifying the split reference counted queue.
//!
//! This crate provides:
//! - `PropertyResult` and `PropertyChecker` for verifying invariants
//! - `Counterexample` for rendering failure paths
//! - Queue invariants (`QueueProperties`, `QueuePropertyChecker`)
//! - `TestableQueue`, the interface every harness drives
//!
//! The same properties are evaluated by every layer: unit tests, the DST
//! harness, the stress runner and the stateright model. A property that
//! fails anywhere is reported with the same name.

pub mod counterexample;
pub mod invariants;
pub mod property;
pub mod testable;

pub use counterexample::{Counterexample, MemoryIssue, StateSnapshot, ThreadAction};
pub use invariants::{
    QueueHistory, QueueObservation, QueueOpType, QueueOperation, QueueProperties,
    QueuePropertyChecker,
};
pub use property::{PropertyChecker, PropertyResult};
pub use testable::TestableQueue;

/// Encode a producer id and sequence number into a queue value.
///
/// The producer id occupies the high 32 bits so that values are distinct
/// across producers and order-comparable within one producer.
#[must_use]
pub fn encode_value(producer: u32, seq: u32) -> u64 {
    (u64::from(producer) << 32) | u64::from(seq)
}

/// Split a value produced by [`encode_value`] back into `(producer, seq)`.
#[must_use]
pub fn decode_value(value: u64) -> (u32, u32) {
    ((value >> 32) as u32, value as u32)
}
