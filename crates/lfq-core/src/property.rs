//! Property results and the checker trait shared by every verification layer.

use serde::Serialize;

use crate::counterexample::Counterexample;

/// Outcome of checking a single named property.
#[derive(Debug, Clone, Serialize)]
pub struct PropertyResult {
    /// Property name, e.g. `NoLostElements`
    pub name: &'static str,
    /// Where the property is defined (invariant module or model)
    pub source: &'static str,
    /// Whether the property holds
    pub holds: bool,
    /// Human-readable description of the violation
    pub violation: Option<String>,
    /// Failure path, when one could be reconstructed
    #[serde(skip)]
    pub counterexample: Option<Counterexample>,
}

impl PropertyResult {
    /// A property that holds.
    #[must_use]
    pub fn pass(name: &'static str, source: &'static str) -> Self {
        Self {
            name,
            source,
            holds: true,
            violation: None,
            counterexample: None,
        }
    }

    /// A violated property.
    #[must_use]
    pub fn fail(
        name: &'static str,
        source: &'static str,
        violation: String,
        counterexample: Option<Counterexample>,
    ) -> Self {
        debug_assert!(!violation.is_empty(), "Violation must be described");
        Self {
            name,
            source,
            holds: false,
            violation: Some(violation),
            counterexample,
        }
    }

    /// One-line summary, e.g. `[FAIL] FIFO_Order (queue): ...`.
    #[must_use]
    pub fn format(&self) -> String {
        match &self.violation {
            None => format!("[PASS] {} ({})", self.name, self.source),
            Some(v) => format!("[FAIL] {} ({}): {}", self.name, self.source, v),
        }
    }
}

/// Something that can evaluate a set of properties.
pub trait PropertyChecker {
    /// Evaluate every property.
    fn check_all(&self) -> Vec<PropertyResult>;

    /// True when every property holds.
    fn all_hold(&self) -> bool {
        self.check_all().iter().all(|r| r.holds)
    }

    /// Only the violated properties.
    fn violations(&self) -> Vec<PropertyResult> {
        self.check_all().into_iter().filter(|r| !r.holds).collect()
    }

    /// Multi-line report of every property.
    fn report(&self) -> String {
        self.check_all()
            .iter()
            .map(PropertyResult::format)
            .collect::<Vec<_>>()
            .join("\n")
    }
}
