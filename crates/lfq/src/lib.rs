//! # lfq
//!
//! Lock-free MPMC FIFO queue with split reference counting.
//!
//! Nodes are freed by the last thread that references them. No garbage
//! collector, epoch or hazard pointer is involved: each entry point
//! (`head`, `tail`) carries an external count next to the node address,
//! and nodes carry an internal count the external ones are folded into.
//!
//! # Modules
//!
//! - `queue`: `LockFreeQueue<T>` and the push/pop protocol
//! - `node`: node layout, fallible allocation and the release rule
//! - `counted_ptr`: 128-bit `(count, node)` pairs updated atomically
//! - `tracked`: `TrackedQueue`, recording history for invariant checks
//! - `kani_proofs`: Kani bounded model checking proofs
//!
//! # Testing
//!
//! ```bash
//! cargo test -p lfq
//! RUSTFLAGS="--cfg loom" cargo test -p lfq --release loom
//! cargo +nightly miri test -p lfq
//! cargo kani -p lfq
//! ```

mod counted_ptr;
pub mod error;
pub mod kani_proofs;
mod node;
pub mod queue;
mod sync;
pub mod tracked;

pub use error::PushError;
pub use queue::LockFreeQueue;
pub use tracked::TrackedQueue;
