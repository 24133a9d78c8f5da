//! Queue nodes and their reference counts.
//!
//! # Counting
//!
//! | Counter | Held in | Meaning |
//! |---------|---------|---------|
//! | external | `head` / `tail` | references taken through that entry point |
//! | `tail_external` | node | largest tail count seen when the node stopped being the tail |
//! | `internal_count` | node | credits folded in minus references released |
//!
//! Every reference taken through `head` or `tail` is released exactly once
//! with [`Node::release`]. The credits for those references arrive when the
//! node is popped (`tail_external + head external`), and until then
//! `internal_count` only goes down. The release that takes the count from 1
//! to 0 frees the node.

use std::alloc::{self, Layout};
use std::ptr::{self, NonNull};

use crate::counted_ptr::{AtomicCountedPtr, CountedNodePtr};
use crate::sync::{spin, AtomicI64, AtomicPtr, Ordering};

/// A singly linked cell of the queue.
pub(crate) struct Node<T> {
    /// Owned value; null for the sentinel and once popped.
    pub(crate) data: AtomicPtr<T>,
    /// Successor; written once from null.
    pub(crate) next: AtomicCountedPtr<T>,
    pub(crate) internal_count: AtomicI64,
    pub(crate) tail_external: AtomicI64,
}

impl<T> Node<T> {
    fn with_data(data: *mut T) -> Self {
        Self {
            data: AtomicPtr::new(data),
            next: AtomicCountedPtr::new(CountedNodePtr::null()),
            internal_count: AtomicI64::new(0),
            tail_external: AtomicI64::new(0),
        }
    }

    /// Allocate the value-less node a new queue starts with.
    pub(crate) fn sentinel() -> *mut Node<T> {
        Box::into_raw(Box::new(Self::with_data(ptr::null_mut())))
    }

    /// Allocate a node owning `value` without aborting on allocation failure.
    ///
    /// On failure nothing is leaked and the value is returned.
    pub(crate) fn try_new(value: T) -> Result<*mut Node<T>, T> {
        let layout = Layout::new::<Node<T>>();
        // Safety: Node<T> always has a non-zero size (it holds atomics).
        let slot = unsafe { alloc::alloc(layout) }.cast::<Node<T>>();
        if slot.is_null() {
            return Err(value);
        }

        let data = match try_alloc(value) {
            Ok(data) => data,
            Err(value) => {
                // Safety: slot came from `alloc` with this layout and is unused.
                unsafe { alloc::dealloc(slot.cast(), layout) };
                return Err(value);
            }
        };

        // Safety: slot is freshly allocated and suitably aligned for Node<T>.
        unsafe { slot.write(Self::with_data(data)) };
        Ok(slot)
    }

    /// Take the value out, leaving the slot empty.
    ///
    /// The swap guarantees at most one caller ever receives it.
    pub(crate) fn take_data(&self) -> Option<T> {
        let data = self.data.swap(ptr::null_mut(), Ordering::Acquire);
        if data.is_null() {
            return None;
        }
        // Safety: data was produced by `try_alloc` and the swap made us its
        // only owner.
        Some(*unsafe { Box::from_raw(data) })
    }

    /// Fold a retired tail reference count into `tail_external`.
    ///
    /// Monotonic max: a smaller count arriving late never overwrites the
    /// count of the thread that advanced the tail.
    pub(crate) fn record_tail_external(&self, external_count: i64) {
        let mut current = self.tail_external.load(Ordering::Relaxed);
        while external_count > current {
            match self.tail_external.compare_exchange_weak(
                current,
                external_count,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => {
                    current = actual;
                    spin();
                }
            }
        }
    }

    /// Credit `count` references to the node.
    pub(crate) fn add_internal(&self, count: i64) {
        self.internal_count.fetch_add(count, Ordering::AcqRel);
    }

    /// Release one reference, freeing the node on the 1 -> 0 transition.
    ///
    /// # Safety
    ///
    /// `node` must be live and the caller must own one counted reference to
    /// it. The pointer must not be used afterwards.
    pub(crate) unsafe fn release(node: *mut Node<T>) {
        if (*node).internal_count.fetch_sub(1, Ordering::AcqRel) == 1 {
            drop(Box::from_raw(node));
        }
    }
}

impl<T> Drop for Node<T> {
    fn drop(&mut self) {
        // Dropped either by the last release (data already taken) or by the
        // queue's destructor, which may find an unpopped value.
        drop(self.take_data());
    }
}

/// Move `value` to the heap without aborting on allocation failure.
///
/// The result can be freed with `Box::from_raw`.
fn try_alloc<U>(value: U) -> Result<*mut U, U> {
    let layout = Layout::new::<U>();
    let raw = if layout.size() == 0 {
        NonNull::<U>::dangling().as_ptr()
    } else {
        // Safety: layout has a non-zero size.
        let raw = unsafe { alloc::alloc(layout) }.cast::<U>();
        if raw.is_null() {
            return Err(value);
        }
        raw
    };
    // Safety: raw is valid for writes of U (dangling is valid for ZSTs).
    unsafe { raw.write(value) };
    Ok(raw)
}
