// Copyright (c) 2025 - Cowboy AI, Inc.
//! KeepAlive - Shared ownership of upstream stream state
//!
//! Graph edges between streams are weak in both directions, so something
//! else must keep upstream state alive while a downstream consumer can still
//! observe it. That is the job of a retention set:
//!
//! - every stream's set retains the stream's own state
//! - a derived stream's set *uses* the sets of its sources
//! - a listener pins the set of the stream it listens to
//!
//! # Loops
//!
//! Resolving a `StreamLoop` makes the loop's set use its target's set, and
//! the target's set usually reaches the loop's set again. Reference-counted
//! edges in a cycle would never be freed, so an edge that closes a cycle
//! merges every set on the cycle into one root instead:
//!
//! ```text
//! before absorb:  loop ──▶ ·        target ──▶ map ──▶ loop
//! after absorb:   { loop, target, map }   one root, retained items pooled
//! ```
//!
//! Members of a loop keep each other alive anyway, so merging them retains
//! nothing extra, and the set graph between roots stays acyclic.

use parking_lot::{const_mutex, Mutex};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Serializes structural changes (absorb) across all sets
static RETENTION_LOCK: Mutex<()> = const_mutex(());

type Retained = Arc<dyn Any + Send + Sync>;

#[derive(Default)]
struct RetentionNode {
    parent: Mutex<Option<Arc<RetentionNode>>>,
    retained: Mutex<Vec<Retained>>,
    uses: Mutex<Vec<Arc<RetentionNode>>>,
}

/// A listener-lifetime retention set
#[derive(Clone, Default)]
pub struct KeepAlive {
    node: Arc<RetentionNode>,
}

impl fmt::Debug for KeepAlive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeepAlive")
            .field("retained", &self.retained_len())
            .finish()
    }
}

impl KeepAlive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep `item` alive for as long as this set is reachable
    pub fn retain(&self, item: Arc<dyn Any + Send + Sync>) {
        let _structure = RETENTION_LOCK.lock();
        root_of(&self.node).retained.lock().push(item);
    }

    /// Extend this set so it also keeps everything `other` keeps alive
    ///
    /// Sharing, not copying: anything retained by `other` later is covered
    /// too. Never releases anything.
    pub fn absorb(&self, other: &KeepAlive) {
        let _structure = RETENTION_LOCK.lock();
        let mine = root_of(&self.node);
        let theirs = root_of(&other.node);
        if Arc::ptr_eq(&mine, &theirs) {
            return;
        }

        let mut memo = HashMap::new();
        if !reaches(&theirs, &mine, &mut memo) {
            mine.uses.lock().push(theirs);
            return;
        }

        // Every root on a path from `theirs` back to `mine` joins the cycle.
        let members: Vec<Arc<RetentionNode>> = memo
            .into_values()
            .filter_map(|(node, on_cycle)| on_cycle.then_some(node))
            .filter(|node| !Arc::ptr_eq(node, &mine))
            .collect();
        for member in &members {
            let retained = mem_take(&member.retained);
            let uses = mem_take(&member.uses);
            mine.retained.lock().extend(retained);
            mine.uses.lock().extend(uses);
            *member.parent.lock() = Some(mine.clone());
        }

        // Edges into the merged root would now be self references.
        let uses = mem_take(&mine.uses);
        let kept: Vec<Arc<RetentionNode>> = uses
            .into_iter()
            .filter(|used| !Arc::ptr_eq(&root_of(used), &mine))
            .collect();
        mine.uses.lock().extend(kept);
    }

    /// True if everything `other` retains is kept alive through this set
    pub fn keeps_alive(&self, other: &KeepAlive) -> bool {
        let _structure = RETENTION_LOCK.lock();
        let mine = root_of(&self.node);
        let theirs = root_of(&other.node);
        reaches(&mine, &theirs, &mut HashMap::new())
    }

    /// True if both handles belong to the same merged set
    pub fn shares_root_with(&self, other: &KeepAlive) -> bool {
        let _structure = RETENTION_LOCK.lock();
        Arc::ptr_eq(&root_of(&self.node), &root_of(&other.node))
    }

    /// Number of items retained directly by this set's root
    pub fn retained_len(&self) -> usize {
        let _structure = RETENTION_LOCK.lock();
        let len = root_of(&self.node).retained.lock().len();
        len
    }
}

fn mem_take<T>(slot: &Mutex<Vec<T>>) -> Vec<T> {
    std::mem::take(&mut *slot.lock())
}

fn root_of(node: &Arc<RetentionNode>) -> Arc<RetentionNode> {
    let mut current = node.clone();
    loop {
        let parent = current.parent.lock().clone();
        match parent {
            Some(parent) => current = parent,
            None => return current,
        }
    }
}

/// Whether `from` reaches `to` over `uses` edges between roots
///
/// `memo` records each visited root with its answer. The root graph is
/// acyclic, so a plain memoized depth-first walk terminates.
fn reaches(
    from: &Arc<RetentionNode>,
    to: &Arc<RetentionNode>,
    memo: &mut HashMap<*const RetentionNode, (Arc<RetentionNode>, bool)>,
) -> bool {
    let key = Arc::as_ptr(from);
    if let Some((_, answer)) = memo.get(&key) {
        return *answer;
    }
    if Arc::ptr_eq(from, to) {
        memo.insert(key, (from.clone(), true));
        return true;
    }
    memo.insert(key, (from.clone(), false));

    let used: Vec<Arc<RetentionNode>> = from.uses.lock().iter().map(root_of).collect();
    let mut found = false;
    for next in &used {
        // Visit every child so all roots on a path get recorded.
        if reaches(next, to, memo) {
            found = true;
        }
    }
    memo.insert(key, (from.clone(), found));
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Weak;

    struct Tracked;

    fn tracked() -> (Arc<Tracked>, Weak<Tracked>) {
        let item = Arc::new(Tracked);
        let weak = Arc::downgrade(&item);
        (item, weak)
    }

    #[test]
    fn test_retain_keeps_item_alive() {
        let set = KeepAlive::new();
        let (item, weak) = tracked();
        set.retain(item);
        assert!(weak.upgrade().is_some());
        drop(set);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_absorb_is_directional() {
        let upstream = KeepAlive::new();
        let downstream = KeepAlive::new();
        let (item, weak) = tracked();
        upstream.retain(item);

        downstream.absorb(&upstream);
        assert!(downstream.keeps_alive(&upstream));
        assert!(!upstream.keeps_alive(&downstream));

        drop(upstream);
        assert!(weak.upgrade().is_some());
        drop(downstream);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_absorb_shares_later_additions() {
        let upstream = KeepAlive::new();
        let downstream = KeepAlive::new();
        downstream.absorb(&upstream);

        let (item, weak) = tracked();
        upstream.retain(item);
        drop(upstream);
        assert!(weak.upgrade().is_some());
        drop(downstream);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_cycle_is_merged_and_freed() {
        let a = KeepAlive::new();
        let b = KeepAlive::new();
        let c = KeepAlive::new();
        let (item_a, weak_a) = tracked();
        let (item_c, weak_c) = tracked();
        a.retain(item_a);
        c.retain(item_c);

        b.absorb(&a);
        c.absorb(&b);
        // Closes a -> c -> b -> a.
        a.absorb(&c);

        assert!(a.shares_root_with(&b));
        assert!(a.shares_root_with(&c));
        assert_eq!(a.retained_len(), 2);

        drop(a);
        drop(b);
        assert!(weak_a.upgrade().is_some());
        drop(c);
        assert!(weak_a.upgrade().is_none());
        assert!(weak_c.upgrade().is_none());
    }

    #[test]
    fn test_cycle_keeps_outside_uses() {
        let source = KeepAlive::new();
        let (item, weak) = tracked();
        source.retain(item);

        let a = KeepAlive::new();
        let b = KeepAlive::new();
        b.absorb(&source);
        b.absorb(&a);
        a.absorb(&b);

        assert!(a.keeps_alive(&source));
        drop(source);
        drop(b);
        assert!(weak.upgrade().is_some());
        drop(a);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_absorb_self_is_noop() {
        let a = KeepAlive::new();
        a.absorb(&a.clone());
        assert!(a.keeps_alive(&a));
        assert_eq!(a.retained_len(), 0);
    }
}
