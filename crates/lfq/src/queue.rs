//! Lock-free MPMC queue with split reference counting.
//!
//! # Invariants
//!
//! | Property | Verified By |
//! |----------|-------------|
//! | NoLostElements | DST, loom, stress |
//! | NoDuplicates | DST, loom, stress |
//! | FIFO_Order | DST, proptest, Kani |
//! | PerProducerOrder | stress, DST scenarios |
//! | No use after free / double free | stateright, Miri |
//! | No leaked nodes | stateright, counting allocator |
//!
//! # Structure
//!
//! The list always holds at least one node. `head` points at a node whose
//! value has already been taken (initially the sentinel); the values
//! waiting to be popped live in its successors. `tail` points at the last
//! node, or briefly at its predecessor while a push is between linking a
//! node and advancing the tail.
//!
//! Both entry points are [`CountedNodePtr`]s. Before dereferencing the node
//! behind one, a thread bumps its external count with a CAS, so the node
//! cannot be freed underneath it. See [`crate::node`] for how the counts
//! are settled.

use std::fmt;
use std::marker::PhantomData;

use crossbeam_utils::CachePadded;
use lfq_core::TestableQueue;

use crate::counted_ptr::{AtomicCountedPtr, CountedNodePtr};
use crate::error::PushError;
use crate::node::Node;
use crate::sync::{spin, Ordering};

/// An unbounded lock-free multi-producer multi-consumer FIFO queue.
///
/// Nodes are reclaimed as soon as the last thread referencing them lets
/// go, without epochs or hazard pointers.
///
/// ```
/// use lfq::LockFreeQueue;
///
/// let queue = LockFreeQueue::new();
/// queue.push(1);
/// queue.push(2);
/// assert_eq!(queue.pop(), Some(1));
/// assert_eq!(queue.pop(), Some(2));
/// assert_eq!(queue.pop(), None);
/// ```
pub struct LockFreeQueue<T> {
    head: CachePadded<AtomicCountedPtr<T>>,
    tail: CachePadded<AtomicCountedPtr<T>>,
    _marker: PhantomData<T>,
}

impl<T> LockFreeQueue<T> {
    /// Create an empty queue holding only the sentinel node.
    #[must_use]
    pub fn new() -> Self {
        let sentinel = CountedNodePtr::new(Node::sentinel());
        Self {
            head: CachePadded::new(AtomicCountedPtr::new(sentinel)),
            tail: CachePadded::new(AtomicCountedPtr::new(sentinel)),
            _marker: PhantomData,
        }
    }

    /// Whether head and tail use a native double-width CAS on this target.
    ///
    /// When this is `false` the counted pointers fall back to a lock and the
    /// queue is no longer lock-free, although it stays correct.
    #[must_use]
    pub fn is_lock_free() -> bool {
        AtomicCountedPtr::<T>::is_lock_free()
    }

    /// Append a value at the tail.
    ///
    /// Aborts through [`std::alloc::handle_alloc_error`] if no node can be
    /// allocated; use [`try_push`](Self::try_push) to get the value back
    /// instead.
    pub fn push(&self, value: T) {
        if self.try_push(value).is_err() {
            std::alloc::handle_alloc_error(std::alloc::Layout::new::<Node<T>>());
        }
    }

    /// Append a value at the tail, handing it back if allocation fails.
    ///
    /// On error the queue is unchanged.
    pub fn try_push(&self, value: T) -> Result<(), PushError<T>> {
        let node = Node::try_new(value).map_err(PushError::AllocationFailed)?;
        let new_next = CountedNodePtr::new(node);

        loop {
            let old_tail = Self::reserve(&self.tail);

            // Safety: the reservation pins old_tail.node until move_next.
            let appended = unsafe { &(*old_tail.node).next }
                .compare_exchange(
                    CountedNodePtr::null(),
                    new_next,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok();

            // Winner or loser, the reference taken above is given back.
            // Safety: old_tail was reserved by this thread.
            unsafe { self.move_next(old_tail) };

            if appended {
                return Ok(());
            }
            spin();
        }
    }

    /// Remove the value at the head, or `None` if the queue looks empty.
    pub fn pop(&self) -> Option<T> {
        loop {
            let old_head = Self::reserve(&self.head);
            let head_node = old_head.node;

            if head_node == self.tail.load(Ordering::Acquire).node {
                // Only the sentinel is left.
                // Safety: old_head was reserved by this thread.
                unsafe { Node::release(head_node) };
                return None;
            }

            // Safety: pinned by the reservation.
            let next = unsafe { &(*head_node).next }.load(Ordering::Acquire);
            debug_assert!(!next.is_null(), "tail is past head, so head has a successor");

            match self.head.compare_exchange(
                old_head,
                next.with_count(1),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    // Safety: next.node is the new head; our head count of 1
                    // keeps it alive until the release below.
                    let value = unsafe { (*next.node).take_data() };
                    debug_assert!(value.is_some(), "a linked node always carries a value");
                    unsafe {
                        Node::release(next.node);
                        Self::pop_node(old_head);
                    }
                    return value;
                }
                Err(_) => {
                    // Safety: old_head was reserved by this thread.
                    unsafe { Node::release(head_node) };
                    spin();
                }
            }
        }
    }

    /// Best-effort emptiness check: head and tail on the same node.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire).node == self.tail.load(Ordering::Acquire).node
    }

    /// Bump the external count of `slot` and return the bumped pointer.
    fn reserve(slot: &AtomicCountedPtr<T>) -> CountedNodePtr<T> {
        let mut current = slot.load(Ordering::Relaxed);
        loop {
            let reserved = current.incremented();
            match slot.compare_exchange(current, reserved, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return reserved,
                Err(actual) => {
                    current = actual;
                    spin();
                }
            }
        }
    }

    /// Retire a reserved tail reference: record its count, help the tail
    /// forward, release the reference.
    ///
    /// # Safety
    ///
    /// `old_tail` must be a tail reservation owned by the caller whose node
    /// already has a successor.
    unsafe fn move_next(&self, old_tail: CountedNodePtr<T>) {
        let node = &*old_tail.node;
        let next = node.next.load(Ordering::Acquire);
        debug_assert!(!next.is_null(), "retiring a tail that has no successor");

        node.record_tail_external(old_tail.external_count);
        // Only succeeds for the last thread that reserved this tail; a
        // failure means someone already advanced it.
        let _ = self
            .tail
            .compare_exchange(old_tail, next, Ordering::AcqRel, Ordering::Acquire);
        Node::release(old_tail.node);
    }

    /// Settle the counts of a node that was just unlinked from `head`.
    ///
    /// # Safety
    ///
    /// `old_head` must be the reservation whose CAS unlinked the node.
    unsafe fn pop_node(old_head: CountedNodePtr<T>) {
        let node = &*old_head.node;
        let tail_external = node.tail_external.load(Ordering::Acquire);
        node.add_internal(tail_external + old_head.external_count);
        Node::release(old_head.node);
    }
}

impl<T: Clone> LockFreeQueue<T> {
    /// Copy out the queued values, head to tail.
    ///
    /// Takes `&mut self` so no push or pop can be in flight.
    #[must_use]
    pub fn snapshot(&mut self) -> Vec<T> {
        let mut values = Vec::new();
        let mut current = self.head.load(Ordering::Acquire).node;
        // Safety: exclusive access; every node from head on is live.
        unsafe {
            loop {
                let next = (*current).next.load(Ordering::Acquire);
                if next.is_null() {
                    break;
                }
                let data = (*next.node).data.load(Ordering::Acquire);
                if let Some(value) = data.as_ref() {
                    values.push(value.clone());
                }
                current = next.node;
            }
        }
        values
    }
}

impl<T> Default for LockFreeQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for LockFreeQueue<T> {
    fn drop(&mut self) {
        // Sole owner: walk from head and free everything, counts or not.
        let mut current = self.head.load(Ordering::Relaxed).node;
        while !current.is_null() {
            // Safety: nodes from head on are live and owned by the queue now.
            let node = unsafe { Box::from_raw(current) };
            current = node.next.load(Ordering::Relaxed).node;
        }
    }
}

// Safety: values move between threads through the queue, and all shared
// state is accessed atomically.
unsafe impl<T: Send> Send for LockFreeQueue<T> {}
unsafe impl<T: Send> Sync for LockFreeQueue<T> {}

impl<T> fmt::Debug for LockFreeQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockFreeQueue")
            .field("head", &*self.head)
            .field("tail", &*self.tail)
            .finish()
    }
}

/// Lets the DST harnesses, scenarios and verifier drive the queue directly.
impl TestableQueue for LockFreeQueue<u64> {
    fn new() -> Self {
        LockFreeQueue::new()
    }

    fn push(&self, value: u64) {
        LockFreeQueue::push(self, value);
    }

    fn try_push(&self, value: u64) -> Result<(), u64> {
        LockFreeQueue::try_push(self, value).map_err(PushError::into_inner)
    }

    fn pop(&self) -> Option<u64> {
        LockFreeQueue::pop(self)
    }

    fn is_empty(&self) -> bool {
        LockFreeQueue::is_empty(self)
    }

    fn contents(&mut self) -> Vec<u64> {
        self.snapshot()
    }
}


#[cfg(loom)]
mod loom_tests {
    use super::*;
    use loom::sync::Arc;
    use loom::thread;

    /// Two poppers that keep losing the head CAS to each other bump the
    /// head count on every retry; unbounded preemption explores that
    /// forever.
    const PREEMPTION_BOUND: usize = 3;

    fn model<F>(f: F)
    where
        F: Fn() + Sync + Send + 'static,
    {
        let mut builder = loom::model::Builder::new();
        builder.preemption_bound = Some(PREEMPTION_BOUND);
        builder.check(f);
    }

    #[test]
    fn loom_concurrent_push() {
        model(|| {
            let queue = Arc::new(LockFreeQueue::new());

            let q1 = Arc::clone(&queue);
            let t1 = thread::spawn(move || q1.push(1_u64));
            let q2 = Arc::clone(&queue);
            let t2 = thread::spawn(move || q2.push(2_u64));

            t1.join().unwrap();
            t2.join().unwrap();

            let mut values = vec![queue.pop().unwrap(), queue.pop().unwrap()];
            values.sort_unstable();
            assert_eq!(values, vec![1, 2]);
            assert_eq!(queue.pop(), None);
        });
    }

    #[test]
    fn loom_push_pop() {
        model(|| {
            let queue = Arc::new(LockFreeQueue::new());
            queue.push(1_u64);

            let q1 = Arc::clone(&queue);
            let pusher = thread::spawn(move || q1.push(2));
            let q2 = Arc::clone(&queue);
            let popper = thread::spawn(move || q2.pop());

            pusher.join().unwrap();
            // The element pushed before the threads started is always first.
            assert_eq!(popper.join().unwrap(), Some(1));

            assert_eq!(queue.pop(), Some(2));
            assert_eq!(queue.pop(), None);
        });
    }

    #[test]
    fn loom_concurrent_pop() {
        model(|| {
            let queue = Arc::new(LockFreeQueue::new());
            queue.push(1_u64);
            queue.push(2_u64);

            let q1 = Arc::clone(&queue);
            let t1 = thread::spawn(move || q1.pop());
            let q2 = Arc::clone(&queue);
            let t2 = thread::spawn(move || q2.pop());

            let mut values = vec![t1.join().unwrap(), t2.join().unwrap()];
            values.sort_unstable();
            assert_eq!(values, vec![Some(1), Some(2)]);
            assert_eq!(queue.pop(), None);
        });
    }

    #[test]
    fn loom_pop_races_last_element() {
        model(|| {
            let queue = Arc::new(LockFreeQueue::new());
            queue.push(1_u64);

            let q1 = Arc::clone(&queue);
            let t1 = thread::spawn(move || q1.pop());
            let q2 = Arc::clone(&queue);
            let t2 = thread::spawn(move || q2.pop());

            let mut values = vec![t1.join().unwrap(), t2.join().unwrap()];
            values.sort_unstable();
            assert_eq!(values, vec![None, Some(1)]);
        });
    }
}
