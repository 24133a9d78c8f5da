//! Counterexample representation and rendering.
//!
//! When a property violation is detected, a counterexample shows the
//! interleaving of atomic steps that led to the failure, together with
//! any node-lifetime problems found along the way.

use std::fmt;

/// A counterexample showing the failure path.
///
/// Contains the thread steps that led to an invariant violation and can be
/// rendered as a thread diagram with one column per thread.
#[derive(Debug, Clone, Default)]
pub struct Counterexample {
    /// Sequence of state snapshots
    pub states: Vec<StateSnapshot>,
    /// Thread interleaving that caused the failure
    pub interleaving: Vec<ThreadAction>,
    /// Node-lifetime issues detected
    pub memory_issues: Vec<MemoryIssue>,
    /// DST seed for reproduction (if applicable)
    pub dst_seed: Option<u64>,
    /// Which property failed and how
    pub description: Option<String>,
}

/// Snapshot of shared queue state after a step.
#[derive(Debug, Clone)]
pub struct StateSnapshot {
    /// Step number in the execution
    pub step: u64,
    /// Short rendering, e.g. `head=(1,N0) tail=(0,N1)`
    pub description: String,
    /// Variable values at this point
    pub variables: Vec<(String, String)>,
}

/// One atomic step taken by a thread.
#[derive(Debug, Clone)]
pub struct ThreadAction {
    /// Thread identifier
    pub thread_id: u64,
    /// Step number when this action occurred
    pub step: u64,
    /// Description of the step, e.g. `cas tail`
    pub action: String,
    /// Whether the step's CAS (if any) succeeded
    pub success: bool,
}

/// Node-lifetime problem found while replaying a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryIssue {
    /// A thread dereferenced a node after it was freed
    UseAfterFree {
        node: u64,
        freed_at_step: u64,
        used_at_step: u64,
    },
    /// A node's internal count crossed 1 -> 0 twice
    DoubleFree {
        node: u64,
        first_free_step: u64,
        second_free_step: u64,
    },
    /// A retired node was never freed
    MemoryLeak { node: u64, allocated_at_step: u64 },
}

impl Counterexample {
    /// Create a new empty counterexample.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a counterexample with DST seed for reproduction.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        debug_assert!(seed != 0, "DST seed should not be zero");
        Self {
            dst_seed: Some(seed),
            ..Self::default()
        }
    }

    /// Set the description for this counterexample.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Add a state snapshot. Steps must be strictly increasing.
    pub fn add_state(&mut self, state: StateSnapshot) {
        debug_assert!(
            self.states.last().map_or(true, |last| state.step > last.step),
            "States must be added in order"
        );
        self.states.push(state);
    }

    /// Add a thread action.
    pub fn add_action(&mut self, action: ThreadAction) {
        self.interleaving.push(action);
    }

    /// Add a memory issue.
    pub fn add_memory_issue(&mut self, issue: MemoryIssue) {
        self.memory_issues.push(issue);
    }

    /// Number of atomic steps in the failure path.
    #[must_use]
    pub fn steps_count(&self) -> u64 {
        self.interleaving.iter().map(|a| a.step).max().unwrap_or(0)
    }

    /// Render the counterexample as a thread diagram.
    ///
    /// ```text
    /// DST_SEED=12345
    ///
    /// Step | Thread 0          | Thread 1          | State
    /// -----|-------------------|-------------------|------
    ///    1 | reserve tail      |                   | tail=(1,N0)
    ///    2 |                   | reserve head      | head=(1,N0)
    ///    3 | append N1         |                   |
    /// ```
    #[must_use]
    pub fn render_diagram(&self) -> String {
        let mut output = String::new();

        if let Some(seed) = self.dst_seed {
            output.push_str(&format!("DST_SEED={}\n\n", seed));
        }

        if let Some(ref desc) = self.description {
            output.push_str("Failure: ");
            output.push_str(desc);
            output.push_str("\n\n");
        }

        let mut threads: Vec<u64> = self.interleaving.iter().map(|a| a.thread_id).collect();
        threads.sort_unstable();
        threads.dedup();

        if threads.is_empty() {
            output.push_str("(no thread actions recorded)\n");
        } else {
            let cell = |a: &ThreadAction| {
                if a.success {
                    a.action.clone()
                } else {
                    format!("{} [FAIL]", a.action)
                }
            };
            let width = self
                .interleaving
                .iter()
                .map(|a| cell(a).len())
                .chain(threads.iter().map(|t| format!("Thread {}", t).len()))
                .max()
                .unwrap_or(8);

            output.push_str("Step |");
            for tid in &threads {
                output.push_str(&format!(" {:<width$} |", format!("Thread {}", tid)));
            }
            output.push_str(" State\n-----|");
            for _ in &threads {
                output.push_str(&"-".repeat(width + 2));
                output.push('|');
            }
            output.push_str("------\n");

            for step in 1..=self.steps_count() {
                output.push_str(&format!("{:4} |", step));
                for tid in &threads {
                    let text = self
                        .interleaving
                        .iter()
                        .find(|a| a.step == step && a.thread_id == *tid)
                        .map(cell)
                        .unwrap_or_default();
                    output.push_str(&format!(" {:<width$} |", text));
                }
                if let Some(state) = self.states.iter().find(|s| s.step == step) {
                    output.push(' ');
                    output.push_str(&state.description);
                }
                output.push('\n');
            }
        }

        if !self.memory_issues.is_empty() {
            output.push_str("\nMemory Issues:\n");
            for issue in &self.memory_issues {
                output.push_str(&format!("  - {}\n", issue));
            }
        }

        output
    }
}

impl fmt::Display for MemoryIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryIssue::UseAfterFree {
                node,
                freed_at_step,
                used_at_step,
            } => write!(
                f,
                "Use-after-free: node N{} freed at step {}, used at step {}",
                node, freed_at_step, used_at_step
            ),
            MemoryIssue::DoubleFree {
                node,
                first_free_step,
                second_free_step,
            } => write!(
                f,
                "Double free: node N{} freed at step {} and again at step {}",
                node, first_free_step, second_free_step
            ),
            MemoryIssue::MemoryLeak {
                node,
                allocated_at_step,
            } => write!(
                f,
                "Memory leak: node N{} allocated at step {}, retired but never freed",
                node, allocated_at_step
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counterexample_creation() {
        let ce = Counterexample::new();
        assert!(ce.states.is_empty());
        assert!(ce.interleaving.is_empty());
        assert!(ce.dst_seed.is_none());
        assert_eq!(ce.steps_count(), 0);
    }

    #[test]
    fn test_counterexample_with_seed() {
        let ce = Counterexample::with_seed(12345);
        assert_eq!(ce.dst_seed, Some(12345));
        assert!(ce.render_diagram().contains("(no thread actions recorded)"));
    }

    #[test]
    fn test_render_diagram() {
        let mut ce = Counterexample::with_seed(42).with_description("no use after free");

        ce.add_action(ThreadAction {
            thread_id: 0,
            step: 1,
            action: "reserve tail".to_string(),
            success: true,
        });
        ce.add_action(ThreadAction {
            thread_id: 1,
            step: 2,
            action: "cas head".to_string(),
            success: false,
        });
        ce.add_state(StateSnapshot {
            step: 1,
            description: "tail=(1,N0)".to_string(),
            variables: vec![],
        });
        ce.add_memory_issue(MemoryIssue::UseAfterFree {
            node: 0,
            freed_at_step: 1,
            used_at_step: 2,
        });

        let diagram = ce.render_diagram();
        assert!(diagram.contains("DST_SEED=42"));
        assert!(diagram.contains("Failure: no use after free"));
        assert!(diagram.contains("Thread 0"));
        assert!(diagram.contains("reserve tail"));
        assert!(diagram.contains("cas head [FAIL]"));
        assert!(diagram.contains("tail=(1,N0)"));
        assert!(diagram.contains("Use-after-free: node N0"));
    }

    #[test]
    fn test_memory_issue_display() {
        let issue = MemoryIssue::DoubleFree {
            node: 3,
            first_free_step: 10,
            second_free_step: 14,
        };
        assert_eq!(
            issue.to_string(),
            "Double free: node N3 freed at step 10 and again at step 14"
        );
    }
}
