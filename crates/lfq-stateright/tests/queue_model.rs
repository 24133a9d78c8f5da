//! Exhaustive checks of the protocol over small thread configurations.
//!
//! Each configuration is small enough for BFS to finish in seconds; together
//! they cover the races the protocol has to survive.

use lfq_core::MemoryIssue;
use lfq_stateright::{ModelOp, ModelVariant, QueueModel};

#[test]
fn test_push_races_pop_on_empty_queue() {
    let result = QueueModel::new(vec![vec![ModelOp::Push(1)], vec![ModelOp::Pop]]).check(2);
    println!("{}", result.format());
    assert!(result.complete);
    assert!(result.passed, "{}", result.format());
}

#[test]
fn test_two_pops_race_for_last_element() {
    let result = QueueModel::new(vec![vec![ModelOp::Pop], vec![ModelOp::Pop]])
        .with_prefill(vec![10])
        .check(2);
    assert!(result.passed, "{}", result.format());
}

#[test]
fn test_push_races_pop_on_single_element() {
    // Pop retires the old head while push retires the old tail.
    let result = QueueModel::new(vec![vec![ModelOp::Push(2)], vec![ModelOp::Pop, ModelOp::Pop]])
        .with_prefill(vec![10])
        .check(2);
    assert!(result.passed, "{}", result.format());
}

#[test]
fn test_concurrent_pushes_with_consumer() {
    let result = QueueModel::new(vec![
        vec![ModelOp::Push(1)],
        vec![ModelOp::Push(2)],
        vec![ModelOp::Pop],
    ])
    .check(4);
    assert!(result.passed, "{}", result.format());
    assert!(result.state_count > 100);
}

#[test]
fn test_producer_order_is_kept() {
    let result = QueueModel::new(vec![
        vec![ModelOp::Push(1), ModelOp::Push(2)],
        vec![ModelOp::Pop, ModelOp::Pop],
    ])
    .check(2);
    assert!(result.passed, "{}", result.format());
}

#[test]
fn test_skipped_fold_is_caught_as_leak_and_early_free() {
    let result = QueueModel::new(vec![vec![ModelOp::Push(1)], vec![ModelOp::Pop]])
        .with_variant(ModelVariant::SkipTailExternalFold)
        .check(2);

    assert!(!result.passed);
    let violation = result
        .violation("no leaked nodes at quiescence")
        .expect("leak should be discovered");
    let ce = violation.counterexample.as_ref().expect("path should be replayed");
    assert!(ce
        .memory_issues
        .iter()
        .any(|issue| matches!(issue, MemoryIssue::MemoryLeak { node: 0, .. })));

    let diagram = ce.render_diagram();
    println!("{}", diagram);
    assert!(diagram.contains("Memory Issues"));

    // Under-crediting also lets the popper free the old tail while the
    // pusher still holds its reference.
    let uaf = result
        .violation("no use after free")
        .expect("early free should be discovered");
    let ce = uaf.counterexample.as_ref().expect("path should be replayed");
    assert!(ce
        .memory_issues
        .iter()
        .any(|issue| matches!(issue, MemoryIssue::UseAfterFree { node: 0, .. })));

    // Values still flow correctly.
    assert!(result.violation("no lost or duplicated elements").is_none());
}
