//! # lfq-dst
//!
//! Deterministic Simulation Testing for the queue.
//!
//! Time, randomness, faults and the interleaving of simulated threads are
//! all derived from one seed, so any failing run can be replayed.
//!
//! ## Harnesses
//!
//! - `harness`: simulated producers/consumers with periodic invariant checks
//! - `fault_injection`: faults at operation boundaries around a real queue
//! - `scenario`: fixed contention scenarios on real threads
//!
//! ## Usage
//!
//! ```rust
//! use lfq_dst::DstEnv;
//!
//! let mut env = DstEnv::new(12345);
//!
//! // Deterministic time
//! env.clock().advance_ns(1_000_000);
//! assert_eq!(env.clock().now_ns(), 1_000_000);
//!
//! // Deterministic randomness
//! let choice: u64 = env.rng().gen_range(0..10);
//! assert!(choice < 10);
//!
//! // Deterministic fault injection
//! if env.fault().should_fail() {
//!     // Simulate failure
//! }
//! ```
//!
//! ## Reproducibility
//!
//! ```bash
//! DST_SEED=12345 cargo test
//! ```

pub mod clock;
pub mod env;
pub mod fault;
pub mod fault_injection;
pub mod harness;
pub mod random;
pub mod scenario;
pub mod scheduler;

pub use clock::SimClock;
pub use env::DstEnv;
pub use fault::{FaultConfig, FaultInjector, FaultStats};
pub use fault_injection::{run_dst_scenario, DstOp, DstResult, DstRunner, DstStats, FaultPoint, FaultType};
pub use harness::{DstHarness, HarnessConfig, HarnessResult};
pub use lfq_core::TestableQueue;
pub use random::DeterministicRng;
pub use scenario::{QueueOp, QueueScenario};
pub use scheduler::{ScheduleDecision, Scheduler};

/// Get DST seed from environment or generate random one.
///
/// Prints the seed for reproduction. Use `DST_SEED=<seed>` to reproduce.
/// An unparsable `DST_SEED` is reported and replaced by a random seed.
#[must_use]
pub fn get_or_generate_seed() -> u64 {
    match std::env::var("DST_SEED").map(|s| s.parse::<u64>()) {
        Ok(Ok(seed)) if seed != 0 => {
            println!("DST_SEED={} (from environment)", seed);
            seed
        }
        Ok(_) => {
            let seed = random_seed();
            println!("DST_SEED={} (invalid value in environment, randomly generated)", seed);
            seed
        }
        Err(_) => {
            let seed = random_seed();
            println!("DST_SEED={} (randomly generated)", seed);
            seed
        }
    }
}

/// Iteration count from `DST_ITERATIONS`, or `default`.
#[must_use]
pub fn iterations_or(default: u64) -> u64 {
    std::env::var("DST_ITERATIONS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn random_seed() -> u64 {
    // Zero is reserved; it cannot be told apart from "no seed".
    rand::random::<u64>().max(1)
}
