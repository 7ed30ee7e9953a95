// Copyright (c) 2025 - Cowboy AI, Inc.
//! StreamLoop - Forward references for cyclic stream definitions
//!
//! A push-based graph needs every edge before it can order firings, so a
//! stream cannot be defined in terms of itself directly. A `StreamLoop` is a
//! placeholder that other definitions can use right away, and that is bound
//! to the real stream later in the same transaction:
//!
//! ```rust,ignore
//! use cim_frp::frp::*;
//!
//! let counter = Transaction::run(|_| {
//!     let total = StreamLoop::<u32>::new()?;
//!     let next = input.stream().merge(&total.stream().map(|n| n + 1).filter(|n| *n < 10));
//!     total.resolve(&next)?;
//!     Ok::<_, ReactiveError>(total.stream())
//! })??;
//! ```
//!
//! # Protocol
//!
//! 1. `new` only inside a transaction. The transaction id is stamped on the
//!    loop and the loop is registered for the commit check.
//! 2. `resolve` exactly once, in the same transaction. The check-and-set of
//!    the resolved flag happens under the loop's own guard, so of any number
//!    of concurrent callers exactly one wins.
//! 3. The winner wires the loop's node below the target, forwards every
//!    target firing into the loop, and shares the target's retention set.
//!
//! Breaking the protocol is reported as a [`ReactiveError`] whose
//! `is_contract_violation` is true. Correct programs never see one.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error};

use super::stream::Stream;
use super::transaction::{Transaction, TransactionId};
use crate::errors::{ReactiveError, ReactiveResult};

/// One-shot resolution guard shared with the creating transaction
#[derive(Debug)]
pub(crate) struct Resolution {
    resolved: Mutex<bool>,
    transaction: TransactionId,
    /// Policy of the creating transaction, applied wherever resolve is called
    enforce_same_transaction: bool,
}

impl Resolution {
    fn new(trans: &Transaction) -> Self {
        Self {
            resolved: Mutex::new(false),
            transaction: trans.id(),
            enforce_same_transaction: trans.config().enforce_same_transaction,
        }
    }

    pub(crate) fn is_resolved(&self) -> bool {
        *self.resolved.lock()
    }

    /// Flip the flag for `trans`, or report why this caller may not
    fn claim(&self, trans: &Transaction) -> ReactiveResult<()> {
        let mut resolved = self.resolved.lock();
        if *resolved {
            return Err(ReactiveError::DoubleResolution);
        }
        if self.enforce_same_transaction && trans.id() != self.transaction {
            return Err(ReactiveError::TransactionMismatch {
                created: self.transaction,
                current: trans.id(),
            });
        }
        *resolved = true;
        Ok(())
    }
}

/// A forward reference to a [`Stream`] that is resolved later
pub struct StreamLoop<T> {
    stream: Stream<T>,
    resolution: Arc<Resolution>,
}

impl<T> fmt::Debug for StreamLoop<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamLoop")
            .field("stream", &self.stream)
            .field("resolved", &self.resolution.is_resolved())
            .field("transaction", &self.resolution.transaction)
            .finish()
    }
}

impl<T: Clone + Send + Sync + 'static> StreamLoop<T> {
    /// Create an unresolved forward reference
    ///
    /// # Errors
    ///
    /// - `OutsideTransaction` if the calling thread has no current
    ///   transaction. Nothing is allocated in that case.
    /// - `TransactionClosed` if the transaction has finished propagating,
    ///   too late for the commit check to see the loop.
    pub fn new() -> ReactiveResult<Self> {
        let Some(trans) = Transaction::current() else {
            error!("StreamLoop created outside of a transaction");
            return Err(ReactiveError::OutsideTransaction);
        };

        let resolution = Arc::new(Resolution::new(&trans));
        trans.register_loop(resolution.clone())?;
        let stream = Stream::new();
        debug!(
            transaction = %trans.id(),
            node = %stream.node().id(),
            "StreamLoop created"
        );
        Ok(Self { stream, resolution })
    }

    /// The placeholder as an ordinary stream
    ///
    /// Usable before resolution; fires whatever the target fires after it.
    pub fn stream(&self) -> Stream<T> {
        self.stream.clone()
    }

    pub fn is_resolved(&self) -> bool {
        self.resolution.is_resolved()
    }

    /// The transaction this loop was created in
    pub fn transaction_id(&self) -> TransactionId {
        self.resolution.transaction
    }

    /// Bind this placeholder to `target`
    ///
    /// `target` may itself depend on this or other unresolved loops, as long
    /// as all of them are resolved before the transaction commits.
    ///
    /// # Errors
    ///
    /// - `DoubleResolution` if the loop was already resolved; the first
    ///   resolution is unaffected
    /// - `TransactionMismatch` if called in another transaction than the one
    ///   that created the loop
    /// - `OutsideTransaction` if the calling thread has no transaction
    ///
    /// The last two only apply when the creating transaction's config has
    /// `enforce_same_transaction` set. Otherwise a resolve without a
    /// transaction opens and commits one.
    pub fn resolve(&self, target: &Stream<T>) -> ReactiveResult<()> {
        match Transaction::current() {
            Some(trans) => self.resolve_in(&trans, target),
            None if self.resolution.enforce_same_transaction => {
                error!(
                    transaction = %self.resolution.transaction,
                    "StreamLoop resolved outside of a transaction"
                );
                Err(ReactiveError::OutsideTransaction)
            }
            None => Transaction::run(|trans| self.resolve_in(trans, target))?,
        }
    }

    fn resolve_in(&self, trans: &Transaction, target: &Stream<T>) -> ReactiveResult<()> {
        if let Err(err) = self.resolution.claim(trans) {
            error!(
                transaction = %trans.id(),
                node = %self.stream.node().id(),
                "StreamLoop resolution rejected: {}",
                err
            );
            return Err(err);
        }

        self.stream
            .attach_upstream(trans, target, |trans, value, stream| {
                stream.send(trans, value.clone())
            });

        debug!(
            transaction = %trans.id(),
            node = %self.stream.node().id(),
            rank = self.stream.node().rank(),
            target = %target.node().id(),
            target_rank = target.node().rank(),
            "StreamLoop resolved"
        );
        Ok(())
    }
}

impl<T> AsRef<Stream<T>> for StreamLoop<T> {
    fn as_ref(&self) -> &Stream<T> {
        &self.stream
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReactiveConfig;
    use crate::frp::StreamSink;

    #[test]
    fn test_new_outside_transaction() {
        let result = StreamLoop::<i32>::new();
        assert!(matches!(result, Err(ReactiveError::OutsideTransaction)));
    }

    #[test]
    fn test_new_is_unresolved() {
        Transaction::run(|trans| {
            let lp = StreamLoop::<i32>::new().unwrap();
            assert!(!lp.is_resolved());
            assert!(!lp.is_resolved());
            assert_eq!(lp.transaction_id(), trans.id());
            lp.resolve(&Stream::never()).unwrap();
        })
        .unwrap();
    }

    #[test]
    fn test_resolve_twice() {
        Transaction::run(|_| {
            let lp = StreamLoop::<i32>::new().unwrap();
            let target = Stream::never();
            assert_eq!(lp.resolve(&target), Ok(()));
            assert!(lp.is_resolved());
            assert_eq!(lp.resolve(&target), Err(ReactiveError::DoubleResolution));
            assert!(lp.is_resolved());
            assert_eq!(target.listener_count(), 1);
        })
        .unwrap();
    }

    #[test]
    fn test_resolve_forwards_values() {
        let sink = StreamSink::<i32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let (lp, _listener) = Transaction::run(|_| {
            let lp = StreamLoop::<i32>::new().unwrap();
            let s = seen.clone();
            let listener = lp.stream().listen(move |x| s.lock().push(*x));
            lp.resolve(&sink.stream()).unwrap();
            (lp, listener)
        })
        .unwrap();

        sink.send(5).unwrap();
        assert_eq!(*seen.lock(), vec![5]);
        assert!(lp.stream().node().rank() > sink.stream().node().rank());
    }

    #[test]
    fn test_unresolved_loop_fails_commit() {
        let result = Transaction::run(|_| StreamLoop::<i32>::new().map(|_| ()));
        assert!(matches!(
            result,
            Err(ReactiveError::UnresolvedLoop { count: 1, .. })
        ));
    }

    #[test]
    fn test_unresolved_loop_allowed_by_config() {
        let config = ReactiveConfig::default().with_reject_unresolved_loops(false);
        let result = Transaction::run_with_config(config, |_| StreamLoop::<i32>::new().map(|_| ()));
        assert!(matches!(result, Ok(Ok(()))));
    }

    #[test]
    fn test_resolve_in_later_transaction() {
        let config = ReactiveConfig::default().with_reject_unresolved_loops(false);
        let lp = Transaction::run_with_config(config, |_| StreamLoop::<i32>::new().unwrap())
            .unwrap();

        let created = lp.transaction_id();
        let result =
            Transaction::run(|trans| (trans.id(), lp.resolve(&Stream::never()))).unwrap();
        assert_eq!(
            result.1,
            Err(ReactiveError::TransactionMismatch {
                created,
                current: result.0,
            })
        );
        assert!(!lp.is_resolved());

        assert_eq!(
            lp.resolve(&Stream::never()),
            Err(ReactiveError::OutsideTransaction)
        );
    }

    #[test]
    fn test_mismatch_allowed_by_config() {
        let lenient = ReactiveConfig::default()
            .with_reject_unresolved_loops(false)
            .with_enforce_same_transaction(false);
        let lp =
            Transaction::run_with_config(lenient.clone(), |_| StreamLoop::<i32>::new().unwrap())
                .unwrap();
        let result =
            Transaction::run_with_config(lenient, |_| lp.resolve(&Stream::never())).unwrap();
        assert_eq!(result, Ok(()));
        assert!(lp.is_resolved());
    }
}
