//! Synchronization primitives, swapped for loom's under `--cfg loom`.

#[cfg(loom)]
pub(crate) use loom::sync::atomic::{AtomicI64, AtomicPtr, Ordering};
#[cfg(loom)]
pub(crate) use loom::sync::Mutex;

#[cfg(not(loom))]
pub(crate) use std::sync::atomic::{AtomicI64, AtomicPtr, Ordering};
#[cfg(all(not(loom), kani))]
pub(crate) use std::sync::Mutex;

/// Back off after losing a race.
///
/// Loom must be told about spins explicitly or it explores them forever.
#[inline]
pub(crate) fn spin() {
    #[cfg(loom)]
    loom::thread::yield_now();

    #[cfg(not(loom))]
    std::hint::spin_loop();
}
