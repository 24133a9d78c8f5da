//! Simulated clock.
//!
//! Time only moves when the simulation advances it, so injected delays
//! are reproducible and cost nothing.

use serde::Serialize;

/// Monotonic nanosecond clock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SimClock {
    now_ns: u64,
}

impl SimClock {
    /// Create a clock at time zero.
    #[must_use]
    pub fn new() -> Self {
        Self { now_ns: 0 }
    }

    /// Current time in nanoseconds.
    #[must_use]
    pub fn now_ns(&self) -> u64 {
        self.now_ns
    }

    /// Advance by `delta_ns`, saturating on overflow.
    pub fn advance_ns(&mut self, delta_ns: u64) {
        self.now_ns = self.now_ns.saturating_add(delta_ns);
    }

    /// Advance to an absolute time, which must not be in the past.
    pub fn advance_to(&mut self, t_ns: u64) {
        debug_assert!(t_ns >= self.now_ns, "clock cannot go backwards");
        self.now_ns = t_ns.max(self.now_ns);
    }
}
