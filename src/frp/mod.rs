// Copyright (c) 2025 - Cowboy AI, Inc.
//! Functional Reactive Programming (FRP) Streams
//!
//! This module provides a transactional, push-based stream engine in the
//! style of Sodium, with forward references that make cyclic definitions
//! possible.
//!
//! # Core Concepts
//!
//! ## Transaction
//!
//! The atomic unit of propagation. Everything one external stimulus causes is
//! computed inside one transaction, in rank order, before it commits.
//!
//! ## Stream<T>
//!
//! Values that occur at specific moments (inside a transaction).
//!
//! ```text
//! Transaction:  ──[ t1 ]────[ t2 ]──[ t3 ]──→
//! Value:            ●          ●●      ●
//! ```
//!
//! ## StreamLoop<T>
//!
//! A placeholder stream used before its definition exists, resolved later in
//! the same transaction:
//!
//! ```text
//!              ┌──────────── map(+1) ◀──────────┐
//!              ▼                                 │
//! input ──▶ merge ══ resolve ══▶ StreamLoop ─────┘
//! ```
//!
//! # Rank Ordering
//!
//! Every stream has a [`Node`] whose rank is strictly greater than the ranks
//! of the streams it listens to. Queued firings run lowest rank first, so a
//! stream fires only after all of its upstream streams fired in the same
//! transaction, also across a resolved loop.
//!
//! # Lifetimes
//!
//! Streams are kept alive by their downstream consumers through
//! [`KeepAlive`] retention sets. Dropping the last listener releases a whole
//! chain, loops included.
//!
//! # Example
//!
//! ```rust,ignore
//! use cim_frp::frp::*;
//!
//! let input = StreamSink::<u32>::new();
//! let (evens, odds) = Transaction::run(|_| -> ReactiveResult<_> {
//!     let evens = StreamLoop::<u32>::new()?;
//!     let odds = StreamLoop::<u32>::new()?;
//!     evens.resolve(&input.stream().merge(&odds.stream().map(|n| n + 1).filter(|n| *n < 10)))?;
//!     odds.resolve(&evens.stream().map(|n| n + 1).filter(|n| *n < 10))?;
//!     Ok((evens.stream(), odds.stream()))
//! })??;
//! ```

pub mod combinators;
pub mod keep_alive;
pub mod listener;
pub mod node;
pub mod stream;
pub mod stream_loop;
pub mod transaction;

pub use combinators::{filter, map, merge, merge_all};
pub use keep_alive::KeepAlive;
pub use listener::Listener;
pub use node::{Node, NodeId, TargetId};
pub use stream::{Stream, StreamSink};
pub use stream_loop::StreamLoop;
pub use transaction::{Transaction, TransactionId};

pub use crate::errors::{ReactiveError, ReactiveResult};
