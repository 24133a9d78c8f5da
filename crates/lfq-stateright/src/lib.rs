//! # lfq-stateright
//!
//! Exhaustive model checking of the split reference counting protocol.
//!
//! ## Usage
//!
//! 1. Model checking (verify the protocol itself):
//!    ```ignore
//!    use lfq_stateright::{ModelOp, QueueModel};
//!    let result = QueueModel::new(vec![vec![ModelOp::Push(1)], vec![ModelOp::Pop]]).check(2);
//!    assert!(result.passed, "{}", result.format());
//!    ```
//!
//! 2. Implementation verification (verify code against the same properties):
//!    ```ignore
//!    use lfq_stateright::{verify_implementation, VerifierConfig};
//!    let result = verify_implementation::<MyQueue>(&VerifierConfig::default());
//!    assert!(result.passed);
//!    ```
//!
//! ## Modules
//!
//! - `queue_model`: the protocol as a stateright `Model`, one action per atomic step
//! - `verifier`: drives a real queue and checks the observable properties

pub mod queue_model;
pub mod verifier;

pub use queue_model::{
    CountedRef, ModelCheckResult, ModelOp, ModelVariant, NodeId, NodeState, Pc, QueueAction,
    QueueModel, QueueState, ThreadState,
};
pub use lfq_core::TestableQueue;
pub use verifier::{verify_concurrent, verify_implementation, VerificationResult, VerifierConfig};
