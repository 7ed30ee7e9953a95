// Copyright (c) 2025 - Cowboy AI, Inc.
//! Node - Vertices of the propagation graph
//!
//! Every stream owns a `Node`. When a stream listens to another, the source
//! node is linked to the listener's node and ranks are raised so that the
//! listener's rank is strictly greater than the source's. The transaction
//! fires queued actions in ascending rank order, so a node fires only after
//! its upstream dependencies have fired.
//!
//! ```text
//! sink (0) ──▶ map (1) ──▶ merge (2)
//!                  ▲           │
//!                  └── loop ◀──┘   (back edge: loop rank raised to 3,
//!                                   the walk stops at visited nodes)
//! ```
//!
//! Edges point downstream and are weak: a node never keeps its listeners
//! alive.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_TARGET_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identity of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// Identity of one downstream edge, used to unlink it again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetId(u64);

struct Target {
    id: TargetId,
    node: Weak<NodeInner>,
}

struct NodeInner {
    id: NodeId,
    rank: AtomicU64,
    targets: Mutex<Vec<Target>>,
}

/// A vertex in the propagation dependency graph
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.inner.id)
            .field("rank", &self.rank())
            .finish()
    }
}

impl Node {
    /// Create a node with rank zero
    pub fn new() -> Self {
        Self::with_rank(0)
    }

    /// Create a node that sorts after every other node
    ///
    /// Used for user listeners, which never have downstream targets.
    pub fn terminal() -> Self {
        Self::with_rank(u64::MAX)
    }

    fn with_rank(rank: u64) -> Self {
        Self {
            inner: Arc::new(NodeInner {
                id: NodeId(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed)),
                rank: AtomicU64::new(rank),
                targets: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    pub fn rank(&self) -> u64 {
        self.inner.rank.load(Ordering::SeqCst)
    }

    /// Number of downstream edges that still point at a live node
    pub fn target_count(&self) -> usize {
        self.inner
            .targets
            .lock()
            .iter()
            .filter(|t| t.node.strong_count() > 0)
            .count()
    }

    /// Add a downstream edge to `target`
    ///
    /// Returns the edge id and whether any rank in the graph changed. A
    /// changed rank invalidates the order of already queued actions.
    pub fn link_to(&self, target: &Node) -> (TargetId, bool) {
        let id = TargetId(NEXT_TARGET_ID.fetch_add(1, Ordering::Relaxed));
        self.inner.targets.lock().push(Target {
            id,
            node: Arc::downgrade(&target.inner),
        });
        let mut visited = HashSet::new();
        let changed = ensure_bigger_than(&target.inner, self.rank(), &mut visited);
        (id, changed)
    }

    /// Remove a downstream edge previously added by `link_to`
    pub fn unlink_to(&self, id: TargetId) {
        self.inner.targets.lock().retain(|t| t.id != id);
    }
}

impl Default for Node {
    fn default() -> Self {
        Self::new()
    }
}

fn ensure_bigger_than(node: &Arc<NodeInner>, limit: u64, visited: &mut HashSet<NodeId>) -> bool {
    if node.rank.load(Ordering::SeqCst) > limit || !visited.insert(node.id) {
        return false;
    }
    let rank = limit.saturating_add(1);
    node.rank.store(rank, Ordering::SeqCst);

    // Snapshot so no two node locks are ever held together.
    let targets: Vec<Arc<NodeInner>> = node
        .targets
        .lock()
        .iter()
        .filter_map(|t| t.node.upgrade())
        .collect();
    for target in targets {
        ensure_bigger_than(&target, rank, visited);
    }
    true
}
