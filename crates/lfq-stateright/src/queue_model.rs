//! Stateright model of the split reference counting protocol.
//!
//! Every atomic step of `push` and `pop` (each load, CAS, fetch-add and
//! release) is one model action, so BFS explores every interleaving of the
//! threads' steps. Nodes live in an arena and are never reused; a freed
//! node stays in the arena marked `freed`, which makes any later access
//! observable.
//!
//! # Properties
//!
//! | Property | Kind | Meaning |
//! |----------|------|---------|
//! | no use after free | always | no step touches a freed node or a null successor |
//! | no double free | always | no node's count crosses 1 -> 0 twice |
//! | no leaked nodes at quiescence | always | once all threads finish, every node behind `head` is freed and every node from `head` on is live |
//! | no lost or duplicated elements | always | at quiescence, delivered + queued = pushed |
//! | per-producer FIFO | always | a consumer sees one producer's values in push order |
//! | pop returns a value | sometimes | reachability |
//! | pop reports empty | sometimes | reachability |
//!
//! External counts grow on every reservation, and a livelocked pair of
//! poppers would grow them forever. States whose `head` or `tail` count
//! exceeds `max_external_count` are not expanded.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use lfq_core::{Counterexample, MemoryIssue, PropertyResult, StateSnapshot, ThreadAction};
use stateright::{Checker, Expectation, Model, Property};
use tracing::debug;

const SOURCE: &str = "stateright";

/// Index of a node in the arena.
pub type NodeId = u8;

/// Model of a `CountedNodePtr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CountedRef {
    pub count: i64,
    pub node: Option<NodeId>,
}

impl CountedRef {
    const NULL: Self = Self {
        count: 0,
        node: None,
    };

    fn to(node: NodeId) -> Self {
        Self {
            count: 0,
            node: Some(node),
        }
    }

    fn incremented(self) -> Self {
        Self {
            count: self.count + 1,
            ..self
        }
    }

    fn with_count(self, count: i64) -> Self {
        Self { count, ..self }
    }
}

impl fmt::Display for CountedRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.node {
            Some(n) => write!(f, "({},N{})", self.count, n),
            None => write!(f, "({},null)", self.count),
        }
    }
}

/// Model of a queue node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeState {
    pub data: Option<u64>,
    pub next: CountedRef,
    pub internal_count: i64,
    pub tail_external: i64,
    pub freed: bool,
}

impl NodeState {
    fn new(data: Option<u64>) -> Self {
        Self {
            data,
            next: CountedRef::NULL,
            internal_count: 0,
            tail_external: 0,
            freed: false,
        }
    }
}

/// Operation a model thread performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelOp {
    Push(u64),
    Pop,
}

/// Protocol variant under check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelVariant {
    /// The protocol as implemented
    Faithful,
    /// Retiring a tail never records its external count; the node is
    /// under-credited and never freed
    SkipTailExternalFold,
}

/// Next step of a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pc {
    /// Between operations
    Idle,
    PushLoadTail,
    PushReserveTail,
    PushAppend,
    MoveNextLoadNext,
    MoveNextFold,
    MoveNextCasTail,
    MoveNextRelease,
    PopLoadHead,
    PopReserveHead,
    PopCheckTail,
    PopReleaseEmpty,
    PopLoadNext,
    PopCasHead,
    PopReleaseRetry,
    PopTakeData,
    PopReleaseNext,
    PopReadTailExternal,
    PopAddInternal,
    PopReleaseHead,
}

/// Per-thread registers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ThreadState {
    pub op_index: usize,
    pub pc: Pc,
    pub new_node: Option<NodeId>,
    /// Last value loaded from `head` / `tail`
    pub seen: CountedRef,
    /// Reservation held (bumped `seen`)
    pub reserved: CountedRef,
    /// Successor loaded from the reserved node
    pub next: CountedRef,
    pub appended: bool,
    pub tail_external: i64,
    pub value: Option<u64>,
}

impl ThreadState {
    fn new() -> Self {
        Self {
            op_index: 0,
            pc: Pc::Idle,
            new_node: None,
            seen: CountedRef::NULL,
            reserved: CountedRef::NULL,
            next: CountedRef::NULL,
            appended: false,
            tail_external: 0,
            value: None,
        }
    }

    fn finish_op(&mut self) {
        *self = Self {
            op_index: self.op_index + 1,
            ..Self::new()
        };
    }
}

/// Global state: shared memory plus every thread's registers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueState {
    pub head: CountedRef,
    pub tail: CountedRef,
    pub nodes: Vec<NodeState>,
    pub threads: Vec<ThreadState>,
    /// Values each thread popped, in order
    pub delivered: Vec<Vec<u64>>,
    pub empty_pops: u8,
    /// First node touched after being freed
    pub use_after_free: Option<NodeId>,
    /// A step followed a null successor
    pub null_dereference: bool,
    /// First node freed twice
    pub double_free: Option<NodeId>,
}

impl QueueState {
    /// Record an access to `node`, flagging it if dangling.
    fn touch(&mut self, node: Option<NodeId>) -> Option<NodeId> {
        match node {
            Some(n) => {
                if self.nodes[n as usize].freed && self.use_after_free.is_none() {
                    self.use_after_free = Some(n);
                }
                Some(n)
            }
            None => {
                self.null_dereference = true;
                None
            }
        }
    }

    /// Decrement-and-maybe-free.
    fn release(&mut self, node: Option<NodeId>) {
        let Some(n) = self.touch(node) else { return };
        let node = &mut self.nodes[n as usize];
        let before = node.internal_count;
        node.internal_count -= 1;
        if before == 1 {
            if node.freed {
                self.double_free.get_or_insert(n);
            } else {
                node.freed = true;
            }
        }
    }

    /// Nodes from `head` following `next`.
    #[must_use]
    pub fn reachable(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut current = self.head.node;
        while let Some(n) = current {
            if out.contains(&n) {
                break;
            }
            out.push(n);
            current = self.nodes[n as usize].next.node;
        }
        out
    }

    /// Short rendering of shared state.
    #[must_use]
    pub fn describe(&self) -> String {
        let counts: Vec<String> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| {
                let mark = if n.freed { "x" } else { "" };
                format!("N{}{}[i={},te={}]", i, mark, n.internal_count, n.tail_external)
            })
            .collect();
        format!("head={} tail={} {}", self.head, self.tail, counts.join(" "))
    }
}

/// A model step: `thread` executes `label`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueAction {
    pub thread: usize,
    pub label: &'static str,
}

/// Model configuration.
#[derive(Debug, Clone)]
pub struct QueueModel {
    /// Operations per thread
    pub threads: Vec<Vec<ModelOp>>,
    /// Values pushed sequentially before the threads start
    pub prefill: Vec<u64>,
    pub variant: ModelVariant,
    pub max_external_count: i64,
}

impl QueueModel {
    /// Faithful model with the given per-thread operations.
    #[must_use]
    pub fn new(threads: Vec<Vec<ModelOp>>) -> Self {
        debug_assert!(!threads.is_empty(), "model needs at least one thread");
        Self {
            threads,
            prefill: Vec::new(),
            variant: ModelVariant::Faithful,
            max_external_count: 6,
        }
    }

    #[must_use]
    pub fn with_prefill(mut self, prefill: Vec<u64>) -> Self {
        self.prefill = prefill;
        self
    }

    #[must_use]
    pub fn with_variant(mut self, variant: ModelVariant) -> Self {
        self.variant = variant;
        self
    }

    #[must_use]
    pub fn with_max_external_count(mut self, max: i64) -> Self {
        self.max_external_count = max;
        self
    }

    /// Every value this model pushes, prefill included.
    #[must_use]
    pub fn pushed_values(&self) -> Vec<u64> {
        let mut values = self.prefill.clone();
        for ops in &self.threads {
            for op in ops {
                if let ModelOp::Push(v) = op {
                    values.push(*v);
                }
            }
        }
        values
    }

    /// `(producer thread, position in its pushes)` for a thread-pushed value.
    fn origin(&self, value: u64) -> Option<(usize, usize)> {
        self.threads.iter().enumerate().find_map(|(tid, ops)| {
            ops.iter()
                .filter_map(|op| match op {
                    ModelOp::Push(v) => Some(*v),
                    ModelOp::Pop => None,
                })
                .position(|v| v == value)
                .map(|pos| (tid, pos))
        })
    }

    fn is_quiescent(&self, state: &QueueState) -> bool {
        state
            .threads
            .iter()
            .zip(&self.threads)
            .all(|(t, ops)| t.op_index == ops.len())
    }

    fn initial_state(&self) -> QueueState {
        let mut state = QueueState {
            head: CountedRef::to(0),
            tail: CountedRef::to(0),
            nodes: vec![NodeState::new(None)],
            threads: vec![ThreadState::new(); self.threads.len()],
            delivered: vec![Vec::new(); self.threads.len()],
            empty_pops: 0,
            use_after_free: None,
            null_dereference: false,
            double_free: None,
        };
        // Uncontended pushes, collapsed.
        for &value in &self.prefill {
            let id = state.nodes.len() as NodeId;
            state.nodes.push(NodeState::new(Some(value)));
            let reserved = state.tail.incremented();
            if let Some(old) = reserved.node {
                let old = &mut state.nodes[old as usize];
                old.next = CountedRef::to(id);
                old.tail_external = old.tail_external.max(reserved.count);
                old.internal_count -= 1;
            }
            state.tail = CountedRef::to(id);
        }
        state
    }

    fn label(&self, state: &QueueState, tid: usize) -> Option<&'static str> {
        let thread = &state.threads[tid];
        let label = match thread.pc {
            Pc::Idle => match self.threads[tid].get(thread.op_index)? {
                ModelOp::Push(_) => "alloc node",
                ModelOp::Pop => "load head",
            },
            Pc::PushLoadTail => "load tail",
            Pc::PushReserveTail => "reserve tail",
            Pc::PushAppend => "cas next",
            Pc::MoveNextLoadNext => "load next",
            Pc::MoveNextFold => "fold tail_external",
            Pc::MoveNextCasTail => "cas tail",
            Pc::MoveNextRelease => "release tail ref",
            Pc::PopLoadHead => "load head",
            Pc::PopReserveHead => "reserve head",
            Pc::PopCheckTail => "compare tail",
            Pc::PopReleaseEmpty => "release (empty)",
            Pc::PopLoadNext => "load next",
            Pc::PopCasHead => "cas head",
            Pc::PopReleaseRetry => "release (retry)",
            Pc::PopTakeData => "take data",
            Pc::PopReleaseNext => "release next",
            Pc::PopReadTailExternal => "load tail_external",
            Pc::PopAddInternal => "add internal",
            Pc::PopReleaseHead => "release head ref",
        };
        Some(label)
    }

    /// Execute one step of `tid`. Returns the new state and whether the
    /// step's CAS (if any) succeeded.
    #[must_use]
    pub fn step(&self, state: &QueueState, tid: usize) -> Option<(QueueState, bool)> {
        let op = *self.threads[tid].get(state.threads[tid].op_index)?;
        let mut s = state.clone();
        let mut success = true;
        let mut t = s.threads[tid].clone();

        match t.pc {
            Pc::Idle => match op {
                ModelOp::Push(value) => {
                    let id = s.nodes.len() as NodeId;
                    s.nodes.push(NodeState::new(Some(value)));
                    t.new_node = Some(id);
                    t.pc = Pc::PushLoadTail;
                }
                ModelOp::Pop => {
                    t.seen = s.head;
                    t.pc = Pc::PopReserveHead;
                }
            },
            Pc::PushLoadTail => {
                t.seen = s.tail;
                t.pc = Pc::PushReserveTail;
            }
            Pc::PushReserveTail => {
                if s.tail == t.seen {
                    s.tail = t.seen.incremented();
                    t.reserved = s.tail;
                    t.pc = Pc::PushAppend;
                } else {
                    success = false;
                    t.pc = Pc::PushLoadTail;
                }
            }
            Pc::PushAppend => {
                if let Some(n) = s.touch(t.reserved.node) {
                    let node = &mut s.nodes[n as usize];
                    if node.next == CountedRef::NULL {
                        node.next = CountedRef {
                            count: 0,
                            node: t.new_node,
                        };
                        t.appended = true;
                    } else {
                        success = false;
                    }
                }
                t.pc = Pc::MoveNextLoadNext;
            }
            Pc::MoveNextLoadNext => {
                if let Some(n) = s.touch(t.reserved.node) {
                    t.next = s.nodes[n as usize].next;
                }
                t.pc = Pc::MoveNextFold;
            }
            Pc::MoveNextFold => {
                if let Some(n) = s.touch(t.reserved.node) {
                    if self.variant != ModelVariant::SkipTailExternalFold {
                        let node = &mut s.nodes[n as usize];
                        node.tail_external = node.tail_external.max(t.reserved.count);
                    }
                }
                t.pc = Pc::MoveNextCasTail;
            }
            Pc::MoveNextCasTail => {
                if s.tail == t.reserved {
                    s.tail = t.next;
                } else {
                    success = false;
                }
                t.pc = Pc::MoveNextRelease;
            }
            Pc::MoveNextRelease => {
                s.release(t.reserved.node);
                if t.appended {
                    t.finish_op();
                } else {
                    let new_node = t.new_node;
                    t = ThreadState {
                        op_index: t.op_index,
                        new_node,
                        pc: Pc::PushLoadTail,
                        ..ThreadState::new()
                    };
                }
            }
            Pc::PopLoadHead => {
                t.seen = s.head;
                t.pc = Pc::PopReserveHead;
            }
            Pc::PopReserveHead => {
                if s.head == t.seen {
                    s.head = t.seen.incremented();
                    t.reserved = s.head;
                    t.pc = Pc::PopCheckTail;
                } else {
                    success = false;
                    t.pc = Pc::PopLoadHead;
                }
            }
            Pc::PopCheckTail => {
                t.pc = if t.reserved.node == s.tail.node {
                    Pc::PopReleaseEmpty
                } else {
                    Pc::PopLoadNext
                };
            }
            Pc::PopReleaseEmpty => {
                s.release(t.reserved.node);
                s.empty_pops = s.empty_pops.saturating_add(1);
                t.finish_op();
            }
            Pc::PopLoadNext => {
                if let Some(n) = s.touch(t.reserved.node) {
                    t.next = s.nodes[n as usize].next;
                }
                t.pc = Pc::PopCasHead;
            }
            Pc::PopCasHead => {
                if s.head == t.reserved {
                    s.head = t.next.with_count(1);
                    t.pc = Pc::PopTakeData;
                } else {
                    success = false;
                    t.pc = Pc::PopReleaseRetry;
                }
            }
            Pc::PopReleaseRetry => {
                s.release(t.reserved.node);
                t = ThreadState {
                    op_index: t.op_index,
                    pc: Pc::PopLoadHead,
                    ..ThreadState::new()
                };
            }
            Pc::PopTakeData => {
                if let Some(n) = s.touch(t.next.node) {
                    t.value = s.nodes[n as usize].data.take();
                }
                t.pc = Pc::PopReleaseNext;
            }
            Pc::PopReleaseNext => {
                s.release(t.next.node);
                t.pc = Pc::PopReadTailExternal;
            }
            Pc::PopReadTailExternal => {
                if let Some(n) = s.touch(t.reserved.node) {
                    t.tail_external = s.nodes[n as usize].tail_external;
                }
                t.pc = Pc::PopAddInternal;
            }
            Pc::PopAddInternal => {
                if let Some(n) = s.touch(t.reserved.node) {
                    s.nodes[n as usize].internal_count += t.tail_external + t.reserved.count;
                }
                t.pc = Pc::PopReleaseHead;
            }
            Pc::PopReleaseHead => {
                s.release(t.reserved.node);
                if let Some(value) = t.value {
                    s.delivered[tid].push(value);
                }
                t.finish_op();
            }
        }

        s.threads[tid] = t;
        Some((s, success))
    }

    /// Replay `actions` from the initial state as a [`Counterexample`].
    #[must_use]
    pub fn counterexample(&self, actions: &[QueueAction], description: &str) -> Counterexample {
        let mut ce = Counterexample::new().with_description(description);
        let mut state = self.initial_state();
        let mut allocated_at: HashMap<NodeId, u64> = HashMap::new();
        let mut freed_at: HashMap<NodeId, u64> = HashMap::new();

        for (i, action) in actions.iter().enumerate() {
            let step = i as u64 + 1;
            let Some((next, success)) = self.step(&state, action.thread) else {
                break;
            };

            for id in state.nodes.len()..next.nodes.len() {
                allocated_at.insert(id as NodeId, step);
            }
            for (id, node) in next.nodes.iter().enumerate() {
                let was_freed = state.nodes.get(id).is_some_and(|n| n.freed);
                if node.freed && !was_freed {
                    freed_at.insert(id as NodeId, step);
                }
            }
            if let (None, Some(n)) = (state.use_after_free, next.use_after_free) {
                ce.add_memory_issue(MemoryIssue::UseAfterFree {
                    node: u64::from(n),
                    freed_at_step: freed_at.get(&n).copied().unwrap_or(0),
                    used_at_step: step,
                });
            }
            if let (None, Some(n)) = (state.double_free, next.double_free) {
                ce.add_memory_issue(MemoryIssue::DoubleFree {
                    node: u64::from(n),
                    first_free_step: freed_at.get(&n).copied().unwrap_or(0),
                    second_free_step: step,
                });
            }

            ce.add_action(ThreadAction {
                thread_id: action.thread as u64,
                step,
                action: action.label.to_string(),
                success,
            });
            ce.add_state(StateSnapshot {
                step,
                description: next.describe(),
                variables: vec![
                    ("head".to_string(), next.head.to_string()),
                    ("tail".to_string(), next.tail.to_string()),
                ],
            });
            state = next;
        }

        if self.is_quiescent(&state) {
            for n in leaked_nodes(&state) {
                ce.add_memory_issue(MemoryIssue::MemoryLeak {
                    node: u64::from(n),
                    allocated_at_step: allocated_at.get(&n).copied().unwrap_or(0),
                });
            }
        }
        ce
    }
}

/// Unreachable nodes that were never freed.
fn leaked_nodes(state: &QueueState) -> Vec<NodeId> {
    let reachable = state.reachable();
    (0..state.nodes.len() as NodeId)
        .filter(|n| !reachable.contains(n) && !state.nodes[*n as usize].freed)
        .collect()
}

fn no_leaks_at_quiescence(model: &QueueModel, state: &QueueState) -> bool {
    if !model.is_quiescent(state) {
        return true;
    }
    let live_from_head = state
        .reachable()
        .iter()
        .all(|n| !state.nodes[*n as usize].freed);
    live_from_head && leaked_nodes(state).is_empty()
}

fn no_lost_or_duplicated(model: &QueueModel, state: &QueueState) -> bool {
    let mut delivered: Vec<u64> = state.delivered.iter().flatten().copied().collect();
    let total = delivered.len();
    delivered.sort_unstable();
    delivered.dedup();
    if delivered.len() != total {
        return false;
    }
    if !model.is_quiescent(state) {
        return true;
    }

    let mut observed = delivered;
    observed.extend(
        state
            .reachable()
            .iter()
            .filter_map(|n| state.nodes[*n as usize].data),
    );
    observed.sort_unstable();
    let mut pushed = model.pushed_values();
    pushed.sort_unstable();
    observed == pushed
}

fn per_producer_fifo(model: &QueueModel, state: &QueueState) -> bool {
    state.delivered.iter().all(|values| {
        let mut last: HashMap<usize, usize> = HashMap::new();
        values.iter().all(|v| match model.origin(*v) {
            Some((producer, pos)) => {
                let ok = last.get(&producer).map_or(true, |prev| pos > *prev);
                last.insert(producer, pos);
                ok
            }
            None => true,
        })
    })
}

impl Model for QueueModel {
    type State = QueueState;
    type Action = QueueAction;

    fn init_states(&self) -> Vec<Self::State> {
        vec![self.initial_state()]
    }

    fn actions(&self, state: &Self::State, actions: &mut Vec<Self::Action>) {
        for tid in 0..self.threads.len() {
            if let Some(label) = self.label(state, tid) {
                actions.push(QueueAction { thread: tid, label });
            }
        }
    }

    fn next_state(&self, last_state: &Self::State, action: Self::Action) -> Option<Self::State> {
        self.step(last_state, action.thread).map(|(state, _)| state)
    }

    fn within_boundary(&self, state: &Self::State) -> bool {
        state.head.count <= self.max_external_count && state.tail.count <= self.max_external_count
    }

    fn properties(&self) -> Vec<Property<Self>> {
        vec![
            Property::always("no use after free", |_, s: &QueueState| {
                s.use_after_free.is_none() && !s.null_dereference
            }),
            Property::always("no double free", |_, s: &QueueState| s.double_free.is_none()),
            Property::always("no leaked nodes at quiescence", no_leaks_at_quiescence),
            Property::always("no lost or duplicated elements", no_lost_or_duplicated),
            Property::always("per-producer FIFO", per_producer_fifo),
            Property::sometimes("pop returns a value", |_, s: &QueueState| {
                s.delivered.iter().any(|d| !d.is_empty())
            }),
            Property::sometimes("pop reports empty", |_, s: &QueueState| s.empty_pops > 0),
        ]
    }
}

/// Outcome of an exhaustive check.
#[derive(Debug, Clone)]
pub struct ModelCheckResult {
    pub passed: bool,
    pub state_count: usize,
    pub complete: bool,
    pub results: Vec<PropertyResult>,
    pub duration: Duration,
}

impl ModelCheckResult {
    /// First violated property, if any.
    #[must_use]
    pub fn violation(&self, name: &str) -> Option<&PropertyResult> {
        self.results.iter().find(|r| r.name == name && !r.holds)
    }

    #[must_use]
    pub fn format(&self) -> String {
        let status = if self.passed { "PASS" } else { "FAIL" };
        let mut out = format!(
            "[{}] stateright: {} states explored in {:.2}s",
            status,
            self.state_count,
            self.duration.as_secs_f64()
        );
        for r in self.results.iter().filter(|r| !r.holds) {
            out.push_str(&format!("\n  {}", r.format()));
        }
        out
    }
}

impl QueueModel {
    /// Explore every interleaving breadth first on `threads` workers.
    ///
    /// An `always` property fails when the checker discovers a state
    /// violating it; a `sometimes` property fails when exploration completes
    /// without reaching a witness.
    #[must_use]
    pub fn check(self, threads: usize) -> ModelCheckResult {
        let start = Instant::now();
        let model = self.clone();
        let checker = self.checker().threads(threads.max(1)).spawn_bfs().join();
        let duration = start.elapsed();
        let complete = checker.is_done();

        let results: Vec<PropertyResult> = model
            .properties()
            .into_iter()
            .map(|property| {
                let discovery = checker.discovery(property.name);
                match (property.expectation, discovery) {
                    (Expectation::Always, Some(path)) => {
                        let actions = path.into_actions();
                        let violation = format!("violated after {} steps", actions.len());
                        debug!(property = property.name, steps = actions.len(), "counterexample found");
                        let ce = model.counterexample(&actions, property.name);
                        PropertyResult::fail(property.name, SOURCE, violation, Some(ce))
                    }
                    (Expectation::Sometimes, None) if complete => PropertyResult::fail(
                        property.name,
                        SOURCE,
                        "no reachable witness".to_string(),
                        None,
                    ),
                    _ => PropertyResult::pass(property.name, SOURCE),
                }
            })
            .collect();

        ModelCheckResult {
            passed: complete && results.iter().all(|r| r.holds),
            state_count: checker.unique_state_count(),
            complete,
            results,
            duration,
        }
    }
}
