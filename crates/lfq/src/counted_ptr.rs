//! Counted node pointers.
//!
//! A `CountedNodePtr` pairs a node address with an external reference
//! count. `head`, `tail` and every node's `next` hold one, and all loads,
//! stores and CASes act on the pair as a single unit: a thread that bumps
//! the count and a thread that swings the pointer can never both succeed
//! against the same expected value.
//!
//! The pair is 128 bits wide. Natively it lives in a
//! `portable_atomic::AtomicU128` (count in the high half, address in the
//! low half), which compiles to `cmpxchg16b`/`casp` where the CPU has
//! them. Under loom and Kani, which cannot see through that, the pair sits
//! behind a mutex and every operation is one critical section.

use std::fmt;
use std::marker::PhantomData;

use crate::node::Node;
use crate::sync::Ordering;

/// `(external_count, node)` pair.
///
/// Equality is address and count equality. The null value `{0, null}`
/// marks an empty `next` slot.
pub(crate) struct CountedNodePtr<T> {
    pub(crate) external_count: i64,
    pub(crate) node: *mut Node<T>,
}

impl<T> CountedNodePtr<T> {
    /// The empty `next` marker.
    pub(crate) const fn null() -> Self {
        Self {
            external_count: 0,
            node: std::ptr::null_mut(),
        }
    }

    /// A fresh pointer to `node` with no external references.
    pub(crate) const fn new(node: *mut Node<T>) -> Self {
        Self {
            external_count: 0,
            node,
        }
    }

    pub(crate) fn is_null(&self) -> bool {
        self.node.is_null()
    }

    /// Same node, one more external reference.
    #[must_use]
    pub(crate) fn incremented(self) -> Self {
        Self {
            external_count: self.external_count + 1,
            node: self.node,
        }
    }

    /// Same node, external count replaced.
    #[must_use]
    pub(crate) fn with_count(self, external_count: i64) -> Self {
        Self {
            external_count,
            node: self.node,
        }
    }

    #[cfg(not(any(loom, kani)))]
    fn pack(self) -> u128 {
        (u128::from(self.external_count as u64) << 64) | (self.node as usize as u64 as u128)
    }

    #[cfg(not(any(loom, kani)))]
    fn unpack(bits: u128) -> Self {
        Self {
            external_count: (bits >> 64) as u64 as i64,
            node: bits as u64 as usize as *mut Node<T>,
        }
    }
}

impl<T> Clone for CountedNodePtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for CountedNodePtr<T> {}

impl<T> PartialEq for CountedNodePtr<T> {
    fn eq(&self, other: &Self) -> bool {
        self.external_count == other.external_count && self.node == other.node
    }
}

impl<T> Eq for CountedNodePtr<T> {}

impl<T> fmt::Debug for CountedNodePtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {:p})", self.external_count, self.node)
    }
}

/// Atomic cell holding a [`CountedNodePtr`].
pub(crate) struct AtomicCountedPtr<T> {
    #[cfg(not(any(loom, kani)))]
    bits: portable_atomic::AtomicU128,
    #[cfg(any(loom, kani))]
    cell: crate::sync::Mutex<CountedNodePtr<T>>,
    _marker: PhantomData<*mut Node<T>>,
}

#[cfg(not(any(loom, kani)))]
impl<T> AtomicCountedPtr<T> {
    pub(crate) fn new(value: CountedNodePtr<T>) -> Self {
        Self {
            bits: portable_atomic::AtomicU128::new(value.pack()),
            _marker: PhantomData,
        }
    }

    pub(crate) fn load(&self, order: Ordering) -> CountedNodePtr<T> {
        CountedNodePtr::unpack(self.bits.load(order))
    }

    pub(crate) fn store(&self, value: CountedNodePtr<T>, order: Ordering) {
        self.bits.store(value.pack(), order);
    }

    /// CAS over the whole pair. On failure returns the value found.
    pub(crate) fn compare_exchange(
        &self,
        current: CountedNodePtr<T>,
        new: CountedNodePtr<T>,
        success: Ordering,
        failure: Ordering,
    ) -> Result<CountedNodePtr<T>, CountedNodePtr<T>> {
        self.bits
            .compare_exchange(current.pack(), new.pack(), success, failure)
            .map(CountedNodePtr::unpack)
            .map_err(CountedNodePtr::unpack)
    }

    /// Whether the pair is updated with a native double-width CAS.
    pub(crate) fn is_lock_free() -> bool {
        portable_atomic::AtomicU128::is_lock_free()
    }
}

#[cfg(any(loom, kani))]
impl<T> AtomicCountedPtr<T> {
    pub(crate) fn new(value: CountedNodePtr<T>) -> Self {
        Self {
            cell: crate::sync::Mutex::new(value),
            _marker: PhantomData,
        }
    }

    fn lock(&self) -> impl std::ops::DerefMut<Target = CountedNodePtr<T>> + '_ {
        self.cell
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub(crate) fn load(&self, _order: Ordering) -> CountedNodePtr<T> {
        *self.lock()
    }

    pub(crate) fn store(&self, value: CountedNodePtr<T>, _order: Ordering) {
        *self.lock() = value;
    }

    pub(crate) fn compare_exchange(
        &self,
        current: CountedNodePtr<T>,
        new: CountedNodePtr<T>,
        _success: Ordering,
        _failure: Ordering,
    ) -> Result<CountedNodePtr<T>, CountedNodePtr<T>> {
        let mut guard = self.lock();
        if *guard == current {
            *guard = new;
            Ok(current)
        } else {
            Err(*guard)
        }
    }

    pub(crate) fn is_lock_free() -> bool {
        false
    }
}

impl<T> fmt::Debug for AtomicCountedPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AtomicCountedPtr")
            .field(&self.load(Ordering::Relaxed))
            .finish()
    }
}
