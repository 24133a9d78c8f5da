//! The queue checked by the implementation verifier, next to the protocol
//! model it implements.

#![cfg(not(loom))]

use lfq::LockFreeQueue;
use lfq_dst::{run_dst_scenario, DstOp, FaultConfig};
use lfq_stateright::{verify_concurrent, verify_implementation, ModelOp, QueueModel, VerifierConfig};

type Verified = LockFreeQueue<u64>;

#[test]
fn test_sequential_verification() {
    let result = verify_implementation::<Verified>(&VerifierConfig::thorough());
    assert!(result.passed, "{:?}", result.error);
    assert!(result.invariants_checked.contains(&"FIFO_Order".to_string()));
}

#[test]
fn test_concurrent_verification() {
    for _ in 0..10 {
        let result = verify_concurrent::<Verified>(&VerifierConfig::thorough());
        assert!(result.passed, "{:?}", result.error);
    }
}

#[test]
fn test_model_agrees_on_push_pop_race() {
    // The interleavings the model explores exhaustively, run for real.
    let result = QueueModel::new(vec![vec![ModelOp::Push(1)], vec![ModelOp::Pop]]).check(2);
    assert!(result.passed, "{}", result.format());

    for _ in 0..1_000 {
        let queue = LockFreeQueue::new();
        let popped = std::thread::scope(|s| {
            s.spawn(|| queue.push(1));
            s.spawn(|| queue.pop()).join().unwrap()
        });
        // Delivered exactly once: either the racing pop got it or it is still queued.
        let remaining = queue.pop();
        assert_eq!(popped.xor(remaining), Some(1));
        assert_eq!(queue.pop(), None);
    }
}

#[test]
fn test_one_queue_type_serves_every_harness() {
    // The verifier and the DST runner drive the same trait impl.
    let verified = verify_implementation::<Verified>(&VerifierConfig::quick());
    assert!(verified.passed, "{:?}", verified.error);

    let ops = [DstOp::Push(1), DstOp::Push(2), DstOp::Pop, DstOp::Push(3)];
    let simulated = run_dst_scenario::<Verified>(17, FaultConfig::none(), &ops);
    assert!(simulated.passed, "{}", simulated.format());
    assert_eq!(simulated.stats.allocation_failures, 0);
}
