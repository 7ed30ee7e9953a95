// Copyright (c) 2025 - Cowboy AI, Inc.
//! Stream Combinators
//!
//! The small set of combinators needed to build looped graphs. Each creates
//! a new stream whose node ranks below nothing it depends on, and whose
//! retention set uses the sets of its sources.
//!
//! # Available Combinators
//!
//! - `map` - Transform every value
//! - `filter` - Keep only values matching a predicate
//! - `merge` - Forward the values of two streams (no coalescing)
//! - `merge_all` - Forward the values of any number of streams
//!
//! Each is also available as a free function taking the source first.
//!
//! # Examples
//!
//! ```rust,ignore
//! use cim_frp::frp::*;
//!
//! let clicks = StreamSink::<u32>::new();
//! let keys = StreamSink::<u32>::new();
//!
//! let codes = clicks.stream().merge(&keys.stream());
//! let large = codes.filter(|code| *code > 100).map(|code| code * 2);
//! ```

use super::stream::Stream;
use super::transaction::Transaction;

impl<T: Clone + Send + Sync + 'static> Stream<T> {
    /// Transform every value with `f`
    pub fn map<U, F>(&self, f: F) -> Stream<U>
    where
        U: Clone + Send + Sync + 'static,
        F: Fn(&T) -> U + Send + Sync + 'static,
    {
        let out = Stream::new();
        Transaction::apply(|trans| {
            out.attach_upstream(trans, self, move |trans, value, out| {
                out.send(trans, f(value))
            })
        });
        out
    }

    /// Keep only values for which `predicate` returns true
    pub fn filter<F>(&self, predicate: F) -> Stream<T>
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let out = Stream::new();
        Transaction::apply(|trans| {
            out.attach_upstream(trans, self, move |trans, value, out| {
                if predicate(value) {
                    out.send(trans, value.clone())
                } else {
                    Ok(())
                }
            })
        });
        out
    }

    /// Forward the values of both streams
    ///
    /// If both fire in one transaction, the output fires twice, this
    /// stream's value first when both sources share a rank.
    pub fn merge(&self, other: &Stream<T>) -> Stream<T> {
        merge_all(&[self.clone(), other.clone()])
    }
}

/// Transform every value of `stream` with `f`
pub fn map<T, U, F>(stream: &Stream<T>, f: F) -> Stream<U>
where
    T: Clone + Send + Sync + 'static,
    U: Clone + Send + Sync + 'static,
    F: Fn(&T) -> U + Send + Sync + 'static,
{
    stream.map(f)
}

/// Keep only values of `stream` for which `predicate` returns true
pub fn filter<T, F>(stream: &Stream<T>, predicate: F) -> Stream<T>
where
    T: Clone + Send + Sync + 'static,
    F: Fn(&T) -> bool + Send + Sync + 'static,
{
    stream.filter(predicate)
}

/// Forward the values of both streams
pub fn merge<T>(left: &Stream<T>, right: &Stream<T>) -> Stream<T>
where
    T: Clone + Send + Sync + 'static,
{
    left.merge(right)
}

/// Forward the values of every stream in `streams`
///
/// # Examples
///
/// ```rust,ignore
/// let all = merge_all(&[a.stream(), b.stream(), c.stream()]);
/// ```
pub fn merge_all<T>(streams: &[Stream<T>]) -> Stream<T>
where
    T: Clone + Send + Sync + 'static,
{
    let out = Stream::new();
    Transaction::apply(|trans| {
        for source in streams {
            out.attach_upstream(trans, source, |trans, value, out| {
                out.send(trans, value.clone())
            });
        }
    });
    out
}
