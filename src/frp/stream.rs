// Copyright (c) 2025 - Cowboy AI, Inc.
//! Stream - Push-based discrete values
//!
//! A `Stream<T>` fires values inside transactions. Firing never calls a
//! listener directly: each listener's action is queued on the transaction at
//! the rank of the listener's node, so everything upstream of a node has
//! fired before the node itself runs.
//!
//! # Ownership
//!
//! ```text
//!   upstream state ◀──weak── cleanup ── downstream state
//!        │                                    ▲
//!        └── listener entry ──weak────────────┘
//!
//!   downstream KeepAlive ──uses──▶ upstream KeepAlive ──▶ upstream state
//! ```
//!
//! Stream state never owns other stream state. Only retention sets
//! ([`KeepAlive`]) hold strong references, which lets loops be freed.
//!
//! # Example
//!
//! ```rust,ignore
//! let sink = StreamSink::<i32>::new();
//! let doubled = sink.stream().map(|x: &i32| x * 2);
//! let _listener = doubled.listen(|x| println!("{x}"));
//! sink.send(21)?; // prints 42
//! ```

use parking_lot::Mutex;
use std::fmt;
use std::mem;
use std::sync::{Arc, Weak};

use super::keep_alive::KeepAlive;
use super::listener::Listener;
use super::node::{Node, TargetId};
use super::transaction::{Action, Transaction};
use crate::errors::ReactiveResult;

type Callback<T> = Arc<dyn Fn(&Transaction, &T) -> ReactiveResult<()> + Send + Sync>;

struct ListenerEntry<T> {
    id: TargetId,
    node: Node,
    action: Callback<T>,
}

/// Shared state behind a `Stream` handle
pub(crate) struct StreamInner<T> {
    node: Node,
    listeners: Mutex<Vec<ListenerEntry<T>>>,
    /// Values fired in the current transaction, replayed to late listeners
    firings: Mutex<Vec<T>>,
    /// Subscriptions to upstream streams, detached when this state drops
    cleanups: Mutex<Vec<Listener>>,
}

impl<T: Clone + Send + Sync + 'static> StreamInner<T> {
    /// Fire `value` to every current listener
    ///
    /// Fails with `TransactionClosed`, recording nothing, once `trans` has
    /// finished propagating.
    pub(crate) fn send(self: &Arc<Self>, trans: &Transaction, value: T) -> ReactiveResult<()> {
        trans.check_accepting()?;
        let (first, targets) = {
            let mut firings = self.firings.lock();
            let first = firings.is_empty();
            firings.push(value.clone());
            let targets: Vec<(Node, Callback<T>)> = self
                .listeners
                .lock()
                .iter()
                .map(|entry| (entry.node.clone(), entry.action.clone()))
                .collect();
            (first, targets)
        };

        if first {
            let weak = Arc::downgrade(self);
            trans.last(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.firings.lock().clear();
                }
            })?;
        }

        for (node, action) in targets {
            let value = value.clone();
            trans.schedule(&node, Box::new(move |trans: &Transaction| action(trans, &value)))?;
        }
        Ok(())
    }
}

/// A push-based stream of discrete values
pub struct Stream<T> {
    inner: Arc<StreamInner<T>>,
    keep_alive: KeepAlive,
}

impl<T> Clone for Stream<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            keep_alive: self.keep_alive.clone(),
        }
    }
}

impl<T> fmt::Debug for Stream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("node", &self.inner.node)
            .field("listeners", &self.inner.listeners.lock().len())
            .finish()
    }
}

impl<T: Clone + Send + Sync + 'static> Stream<T> {
    pub(crate) fn new() -> Self {
        let inner = Arc::new(StreamInner {
            node: Node::new(),
            listeners: Mutex::new(Vec::new()),
            firings: Mutex::new(Vec::new()),
            cleanups: Mutex::new(Vec::new()),
        });
        let keep_alive = KeepAlive::new();
        keep_alive.retain(inner.clone());
        Self { inner, keep_alive }
    }

    /// A stream that never fires
    pub fn never() -> Self {
        Self::new()
    }

    pub fn node(&self) -> &Node {
        &self.inner.node
    }

    /// The retention set that keeps this stream and its upstream alive
    pub fn keep_alive(&self) -> &KeepAlive {
        &self.keep_alive
    }

    /// Number of callbacks and downstream streams attached to this stream
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }

    /// Observe every value this stream fires
    ///
    /// Values already fired in the current transaction are delivered too,
    /// unless its propagation has already finished. The stream and
    /// everything upstream of it stay alive until the returned listener is
    /// dropped.
    pub fn listen(&self, f: impl Fn(&T) + Send + Sync + 'static) -> Listener {
        let action = move |_: &Transaction, value: &T| {
            f(value);
            Ok(())
        };
        let listener = Transaction::apply(|trans| {
            self.listen_internal(&Node::terminal(), trans, action, false)
        });
        listener.retaining(self.keep_alive.clone())
    }

    /// Attach `action` to run at `target`'s rank for every firing
    ///
    /// Links this stream's node to `target`, asking the transaction to
    /// re-sort its queue if ranks changed. Unless `suppress_earlier_firings`
    /// is set, values fired earlier in this transaction are replayed while
    /// propagation is still running.
    pub(crate) fn listen_internal(
        &self,
        target: &Node,
        trans: &Transaction,
        action: impl Fn(&Transaction, &T) -> ReactiveResult<()> + Send + Sync + 'static,
        suppress_earlier_firings: bool,
    ) -> Listener {
        let action: Callback<T> = Arc::new(action);
        let (id, changed) = self.inner.node.link_to(target);
        if changed {
            trans.set_needs_regenerating();
        }

        // Same lock order as `send`: a concurrent firing is either replayed
        // here or delivered through the new entry, never both.
        let earlier = {
            let firings = self.inner.firings.lock();
            self.inner.listeners.lock().push(ListenerEntry {
                id,
                node: target.clone(),
                action: action.clone(),
            });
            if suppress_earlier_firings {
                Vec::new()
            } else {
                firings.clone()
            }
        };
        if !earlier.is_empty() {
            let replays: Vec<Action> = earlier
                .into_iter()
                .map(|value| {
                    let action = action.clone();
                    Box::new(move |trans: &Transaction| action(trans, &value)) as Action
                })
                .collect();
            trans.replay(target, replays);
        }

        let weak: Weak<StreamInner<T>> = Arc::downgrade(&self.inner);
        Listener::new(move || {
            if let Some(inner) = weak.upgrade() {
                let removed: Vec<ListenerEntry<T>> = {
                    let mut listeners = inner.listeners.lock();
                    let (removed, kept): (Vec<_>, Vec<_>) = mem::take(&mut *listeners)
                        .into_iter()
                        .partition(|entry| entry.id == id);
                    *listeners = kept;
                    removed
                };
                inner.node.unlink_to(id);
                drop(removed);
            }
        })
    }

    /// Make `upstream` feed this stream for as long as this stream lives
    ///
    /// 1. this stream's node listens to `upstream`, running `action` with
    ///    this stream's state on every firing;
    /// 2. the subscription becomes a cleanup owned by this stream's state;
    /// 3. this stream's retention set absorbs `upstream`'s.
    pub(crate) fn attach_upstream<S>(
        &self,
        trans: &Transaction,
        upstream: &Stream<S>,
        action: impl Fn(&Transaction, &S, &Arc<StreamInner<T>>) -> ReactiveResult<()>
            + Send
            + Sync
            + 'static,
    ) where
        S: Clone + Send + Sync + 'static,
    {
        let weak = Arc::downgrade(&self.inner);
        let forward = move |trans: &Transaction, value: &S| match weak.upgrade() {
            Some(inner) => action(trans, value, &inner),
            None => Ok(()),
        };
        let listener = upstream.listen_internal(&self.inner.node, trans, forward, false);
        self.inner.cleanups.lock().push(listener);
        self.keep_alive.absorb(&upstream.keep_alive);
    }
}

/// Entry point for pushing values into the graph from outside
pub struct StreamSink<T> {
    stream: Stream<T>,
}

impl<T> fmt::Debug for StreamSink<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSink")
            .field("stream", &self.stream)
            .finish()
    }
}

impl<T: Clone + Send + Sync + 'static> StreamSink<T> {
    pub fn new() -> Self {
        Self {
            stream: Stream::new(),
        }
    }

    pub fn stream(&self) -> Stream<T> {
        self.stream.clone()
    }

    /// Fire `value`, in the current transaction if there is one
    ///
    /// Without a current transaction a new one is opened and committed,
    /// so listeners have run when this returns.
    ///
    /// # Errors
    ///
    /// `TransactionClosed` when called from a `last` action, where the
    /// value could no longer be propagated. Commit errors of a transaction
    /// opened here are returned too.
    pub fn send(&self, value: T) -> ReactiveResult<()> {
        Transaction::run(|trans| self.stream.inner.send(trans, value))?
    }
}

impl<T: Clone + Send + Sync + 'static> Default for StreamSink<T> {
    fn default() -> Self {
        Self::new()
    }
}
