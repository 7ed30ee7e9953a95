// Copyright (c) 2025 - Cowboy AI, Inc.
//! Transaction - Atomic units of propagation
//!
//! All firings caused by one external stimulus are computed inside one
//! transaction. Sending a value only queues work; the queue is drained when
//! the outermost `Transaction::run` returns, in ascending node rank.
//!
//! # Phases
//!
//! ```text
//! run(f) ──▶ f(&trans) ──▶ commit checks ──▶ prioritized ──▶ last ──▶ release ──▶ post
//!                          (loops resolved?)  (by rank)      (cleanup)           (may open
//!                                                                                 new ones)
//! ```
//!
//! At most one transaction is open in the process. A thread that calls
//! `run` while another thread's transaction is open blocks until it closes.
//! A thread spawned inside a transaction can take part in it through
//! [`Transaction::enter`].
//!
//! Once propagation has finished, the transaction only accepts `last` and
//! `post` actions. Scheduling anything else, from a `last` action or on a
//! handle kept past commit, fails with `TransactionClosed`.

use parking_lot::{const_mutex, Mutex};
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::mem;
use std::sync::Arc;
use tracing::{debug, debug_span, error, trace, warn};
use uuid::Uuid;

use super::node::Node;
use super::stream_loop::Resolution;
use crate::config::ReactiveConfig;
use crate::errors::{ReactiveError, ReactiveResult};

pub(crate) type Action = Box<dyn FnOnce(&Transaction) -> ReactiveResult<()> + Send>;
type Deferred = Box<dyn FnOnce() + Send>;

/// Held by the thread that opened the transaction until it is released
static TRANSACTION_LOCK: Mutex<()> = const_mutex(());
static STATE: Mutex<Option<TransactionState>> = const_mutex(None);

thread_local! {
    static CURRENT: Cell<Option<TransactionId>> = const { Cell::new(None) };
}

/// Unique, time-ordered identity of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionId(Uuid);

impl TransactionId {
    fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct Prioritized {
    rank: u64,
    seq: u64,
    node: Node,
    action: Action,
}

impl PartialEq for Prioritized {
    fn eq(&self, other: &Self) -> bool {
        self.rank == other.rank && self.seq == other.seq
    }
}

impl Eq for Prioritized {}

impl PartialOrd for Prioritized {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Prioritized {
    // Reversed: BinaryHeap pops the lowest rank, then the oldest entry.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .rank
            .cmp(&self.rank)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct TransactionState {
    id: TransactionId,
    config: ReactiveConfig,
    queue: BinaryHeap<Prioritized>,
    next_seq: u64,
    needs_regenerating: bool,
    /// Cleared when propagation ends
    accepting: bool,
    steps: usize,
    last: Vec<Deferred>,
    post: Vec<Deferred>,
    loops: Vec<Arc<Resolution>>,
}

impl TransactionState {
    fn new(id: TransactionId, config: ReactiveConfig) -> Self {
        Self {
            id,
            config,
            queue: BinaryHeap::new(),
            next_seq: 0,
            needs_regenerating: false,
            accepting: true,
            steps: 0,
            last: Vec::new(),
            post: Vec::new(),
            loops: Vec::new(),
        }
    }

    fn push(&mut self, node: Node, action: Action) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(Prioritized {
            rank: node.rank(),
            seq,
            node,
            action,
        });
    }

    /// Re-read every queued node's rank after a link changed the graph
    fn regenerate(&mut self) {
        let mut entries = mem::take(&mut self.queue).into_vec();
        for entry in &mut entries {
            entry.rank = entry.node.rank();
        }
        self.queue = BinaryHeap::from(entries);
        self.needs_regenerating = false;
    }
}

/// Clears the thread's transaction on exit, also when `f` panics
struct OpenGuard;

impl Drop for OpenGuard {
    fn drop(&mut self) {
        CURRENT.with(|current| current.set(None));
        let stale = STATE.lock().take();
        if let Some(state) = stale {
            warn!(transaction = %state.id, "transaction released without commit");
            // Firing records must not outlive the transaction.
            for action in state.last {
                action();
            }
        }
    }
}

struct RestoreCurrent(Option<TransactionId>);

impl Drop for RestoreCurrent {
    fn drop(&mut self) {
        CURRENT.with(|current| current.set(self.0));
    }
}

/// Handle to the open transaction
#[derive(Debug, Clone)]
pub struct Transaction {
    id: TransactionId,
    config: ReactiveConfig,
}

impl Transaction {
    /// Run `f` in the current transaction, or in a new one if this thread has none
    ///
    /// A new transaction is committed before returning: queued firings are
    /// propagated and commit checks run. Nested calls reuse the outer
    /// transaction and leave the commit to it.
    pub fn run<R>(f: impl FnOnce(&Transaction) -> R) -> ReactiveResult<R> {
        Self::run_with_config(ReactiveConfig::default(), f)
    }

    /// Like [`Transaction::run`] with an explicit configuration
    ///
    /// The configuration is ignored when the call is nested.
    pub fn run_with_config<R>(
        config: ReactiveConfig,
        f: impl FnOnce(&Transaction) -> R,
    ) -> ReactiveResult<R> {
        if let Some(trans) = Self::current() {
            debug!(transaction = %trans.id, "joining current transaction");
            return Ok(f(&trans));
        }
        config.validate()?;
        let (value, result) = Self::execute(config, f);
        result.map(|_| value)
    }

    /// Run graph construction in a transaction, logging a failed commit
    ///
    /// Construction never queues firings of its own, so a fresh transaction
    /// opened here has nothing to fail on.
    pub(crate) fn apply<R>(f: impl FnOnce(&Transaction) -> R) -> R {
        if let Some(trans) = Self::current() {
            return f(&trans);
        }
        let (value, result) = Self::execute(ReactiveConfig::default(), f);
        if let Err(err) = result {
            error!("Transaction opened for graph construction failed: {}", err);
        }
        value
    }

    fn execute<R>(
        config: ReactiveConfig,
        f: impl FnOnce(&Transaction) -> R,
    ) -> (R, ReactiveResult<()>) {
        let lock = TRANSACTION_LOCK.lock();
        let trans = Self::open(config);
        let guard = OpenGuard;

        let value = f(&trans);
        let (result, post) = trans.close();

        drop(guard);
        drop(lock);

        if result.is_ok() {
            for action in post {
                action();
            }
        }
        (value, result)
    }

    fn open(config: ReactiveConfig) -> Transaction {
        let id = TransactionId::new();
        *STATE.lock() = Some(TransactionState::new(id, config.clone()));
        CURRENT.with(|current| current.set(Some(id)));
        debug!(transaction = %id, "transaction opened");
        Transaction { id, config }
    }

    /// True if this thread is inside an open transaction
    pub fn has_current() -> bool {
        Self::current().is_some()
    }

    /// The transaction this thread is running in, if any
    pub fn current() -> Option<Transaction> {
        let id = CURRENT.with(|current| current.get())?;
        STATE
            .lock()
            .as_ref()
            .filter(|state| state.id == id)
            .map(|state| Transaction {
                id,
                config: state.config.clone(),
            })
    }

    /// Make this transaction current on the calling thread while `f` runs
    ///
    /// For threads spawned inside a transaction that must act on it, for
    /// example to resolve a `StreamLoop` created by the spawning thread.
    pub fn enter<R>(&self, f: impl FnOnce() -> R) -> ReactiveResult<R> {
        if !self.is_open() {
            return Err(ReactiveError::OutsideTransaction);
        }
        let previous = CURRENT.with(|current| current.replace(Some(self.id)));
        let _restore = RestoreCurrent(previous);
        Ok(f())
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn config(&self) -> &ReactiveConfig {
        &self.config
    }

    /// True until the transaction has been committed and released
    pub fn is_open(&self) -> bool {
        STATE
            .lock()
            .as_ref()
            .is_some_and(|state| state.id == self.id)
    }

    /// True while queued firings can still run
    pub fn accepts_work(&self) -> bool {
        STATE
            .lock()
            .as_ref()
            .is_some_and(|state| state.id == self.id && state.accepting)
    }

    /// Queue `action` to run when `node`'s rank comes up
    ///
    /// # Errors
    ///
    /// `TransactionClosed` once propagation has finished.
    pub fn prioritized(
        &self,
        node: &Node,
        action: impl FnOnce(&Transaction) + Send + 'static,
    ) -> ReactiveResult<()> {
        self.schedule(
            node,
            Box::new(move |trans: &Transaction| {
                action(trans);
                Ok(())
            }),
        )
    }

    /// Queue `action` to run after propagation, before the transaction is released
    ///
    /// # Errors
    ///
    /// `TransactionClosed` once the transaction has been released.
    pub fn last(&self, action: impl FnOnce() + Send + 'static) -> ReactiveResult<()> {
        self.with_state(move |state| state.last.push(Box::new(action)))
    }

    /// Queue `action` to run after a successful commit, outside the transaction
    ///
    /// # Errors
    ///
    /// `TransactionClosed` once the transaction has been released.
    pub fn post(&self, action: impl FnOnce() + Send + 'static) -> ReactiveResult<()> {
        self.with_state(move |state| state.post.push(Box::new(action)))
    }

    pub(crate) fn schedule(&self, node: &Node, action: Action) -> ReactiveResult<()> {
        self.with_accepting_state(|state| state.push(node.clone(), action))
    }

    /// Queue replays of earlier firings if propagation is still running
    ///
    /// Values fired before propagation finished are history afterwards, so a
    /// listener attached from a `last` action does not see them.
    pub(crate) fn replay(&self, node: &Node, actions: Vec<Action>) {
        let mut state = STATE.lock();
        if let Some(state) = state.as_mut().filter(|s| s.id == self.id && s.accepting) {
            for action in actions {
                state.push(node.clone(), action);
            }
        }
    }

    /// Fail with `TransactionClosed` unless firings can still be scheduled
    pub(crate) fn check_accepting(&self) -> ReactiveResult<()> {
        self.with_accepting_state(|_| ())
    }

    pub(crate) fn set_needs_regenerating(&self) {
        // Only queue order depends on it; a released transaction has no queue.
        if let Some(state) = STATE.lock().as_mut().filter(|s| s.id == self.id) {
            state.needs_regenerating = true;
        }
    }

    pub(crate) fn register_loop(&self, resolution: Arc<Resolution>) -> ReactiveResult<()> {
        self.with_accepting_state(move |state| state.loops.push(resolution))
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut TransactionState) -> R) -> ReactiveResult<R> {
        let mut state = STATE.lock();
        match state.as_mut() {
            Some(state) if state.id == self.id => Ok(f(state)),
            _ => Err(self.closed()),
        }
    }

    fn with_accepting_state<R>(
        &self,
        f: impl FnOnce(&mut TransactionState) -> R,
    ) -> ReactiveResult<R> {
        self.with_state(|state| state.accepting.then(|| f(state)))?
            .ok_or_else(|| self.closed())
    }

    fn closed(&self) -> ReactiveError {
        warn!(transaction = %self.id, "transaction no longer accepts this work");
        ReactiveError::TransactionClosed {
            transaction: self.id,
        }
    }

    fn close(&self) -> (ReactiveResult<()>, Vec<Deferred>) {
        let span = debug_span!("transaction", id = %self.id);
        let _enter = span.enter();

        let mut result = self.check_loops();
        if result.is_ok() {
            result = self.propagate();
        }
        let discarded = self
            .with_state(|state| {
                state.accepting = false;
                mem::take(&mut state.queue)
            })
            .unwrap_or_default();
        if let Err(err) = &result {
            warn!(
                "Discarding {} queued action(s) after failed commit: {}",
                discarded.len(),
                err
            );
        }
        drop(discarded);

        // Last actions may queue further last actions.
        loop {
            let last = self
                .with_state(|state| mem::take(&mut state.last))
                .unwrap_or_default();
            if last.is_empty() {
                break;
            }
            for action in last {
                action();
            }
        }

        let state = STATE.lock().take();
        let (steps, post) = state
            .map(|state| (state.steps, state.post))
            .unwrap_or_default();
        debug!(steps, ok = result.is_ok(), "transaction closed");
        (result, post)
    }

    fn check_loops(&self) -> ReactiveResult<()> {
        if !self.config.reject_unresolved_loops {
            return Ok(());
        }
        let loops = self
            .with_state(|state| state.loops.clone())
            .unwrap_or_default();
        let count = loops.iter().filter(|r| !r.is_resolved()).count();
        if count > 0 {
            error!(count, "StreamLoop(s) left unresolved at commit");
            return Err(ReactiveError::UnresolvedLoop {
                transaction: self.id,
                count,
            });
        }
        Ok(())
    }

    fn propagate(&self) -> ReactiveResult<()> {
        let limit = self.config.max_propagation_steps;
        loop {
            let next = self.with_state(|state| {
                if state.needs_regenerating {
                    state.regenerate();
                }
                let entry = state.queue.pop()?;
                state.steps += 1;
                Some((entry, state.steps > limit))
            })?;

            let Some((entry, exceeded)) = next else {
                return Ok(());
            };
            if exceeded {
                error!(limit, "propagation did not settle");
                return Err(ReactiveError::PropagationLimitExceeded {
                    transaction: self.id,
                    limit,
                });
            }
            trace!(node = %entry.node.id(), rank = entry.rank, "firing");
            (entry.action)(self)?;
        }
    }
}
