//! `try_push` under allocation failure, directly and through the DST runner.
//!
//! A global allocator that can be told to refuse the n-th allocation made
//! by the current thread. Other test threads are unaffected.

#![cfg(not(loom))]

use std::alloc::{GlobalAlloc, Layout, System};
use std::cell::Cell;

use lfq::{LockFreeQueue, PushError};
use lfq_dst::{DstRunner, FaultConfig, FaultType};

struct FailingAllocator;

thread_local! {
    // 0 = disarmed, n = fail the n-th allocation from now.
    static FAIL_AT: Cell<usize> = const { Cell::new(0) };
}

unsafe impl GlobalAlloc for FailingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let fail = FAIL_AT
            .try_with(|n| match n.get() {
                0 => false,
                1 => {
                    n.set(0);
                    true
                }
                k => {
                    n.set(k - 1);
                    false
                }
            })
            .unwrap_or(false);
        if fail {
            return std::ptr::null_mut();
        }
        System.alloc(layout)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        System.dealloc(ptr, layout);
    }
}

#[global_allocator]
static GLOBAL: FailingAllocator = FailingAllocator;

fn fail_allocation(n: usize) {
    FAIL_AT.with(|c| c.set(n));
}

#[test]
fn test_node_allocation_failure_returns_value() {
    let queue = LockFreeQueue::new();
    queue.push(String::from("kept"));

    let value = String::from("rejected");
    fail_allocation(1);
    let err = queue.try_push(value).unwrap_err();
    assert!(matches!(err, PushError::AllocationFailed(_)));
    assert_eq!(err.into_inner(), "rejected");

    // The queue is untouched.
    assert_eq!(queue.pop().as_deref(), Some("kept"));
    assert_eq!(queue.pop(), None);
}

#[test]
fn test_data_allocation_failure_returns_value() {
    let queue = LockFreeQueue::new();

    // Node slot succeeds, the value's box fails.
    fail_allocation(2);
    let err = queue.try_push([7_u64; 4]).unwrap_err();
    assert_eq!(err.into_inner(), [7; 4]);
    assert!(queue.is_empty());

    queue.try_push([1_u64; 4]).unwrap();
    assert_eq!(queue.pop(), Some([1; 4]));
}

#[test]
fn test_zero_sized_values_only_need_the_node() {
    let queue = LockFreeQueue::new();

    // A zero-sized value needs no second allocation, so failing the second
    // one does not affect the push.
    fail_allocation(2);
    queue.try_push(()).unwrap();
    fail_allocation(0);

    assert_eq!(queue.pop(), Some(()));
    assert_eq!(queue.pop(), None);
}

#[test]
fn test_dst_runner_sees_real_allocation_failure() {
    let mut runner: DstRunner<LockFreeQueue<u64>> = DstRunner::with_fault_config(11, FaultConfig::none());
    runner.push(1).unwrap();
    runner.push(2).unwrap();

    fail_allocation(1);
    assert_eq!(runner.push(3), Err(FaultType::AllocationFailure));
    runner.push(4).unwrap();
    assert_eq!(runner.pop(), Ok(Some(1)));

    assert_eq!(runner.stats().allocation_failures, 1);
    assert_eq!(runner.observe().contents, vec![2, 4]);
    let results = runner.check_invariants();
    assert!(results.iter().all(|r| r.holds), "{:?}", results);
}
