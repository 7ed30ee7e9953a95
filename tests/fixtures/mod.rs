// Copyright (c) 2025 - Cowboy AI, Inc.
//! Test Fixtures for cim-frp
//!
//! Shared graph shapes and a recording listener, so every test builds the
//! same loops the same way.

use parking_lot::Mutex;
use std::sync::Arc;

use cim_frp::frp::{Listener, Stream, StreamLoop, StreamSink, Transaction};

/// Collects every value a stream fires, for as long as it lives
pub struct Recorder<T> {
    seen: Arc<Mutex<Vec<T>>>,
    _listener: Listener,
}

impl<T: Clone + Send + Sync + 'static> Recorder<T> {
    pub fn listen(stream: &Stream<T>) -> Self {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let listener = stream.listen(move |value: &T| s.lock().push(value.clone()));
        Self {
            seen,
            _listener: listener,
        }
    }

    pub fn values(&self) -> Vec<T> {
        self.seen.lock().clone()
    }
}

/// Two streams defined in terms of each other:
///
/// ```text
/// P = input ∪ (Q + 1 where < 10)
/// Q = P * 2 where < 10
/// ```
///
/// Sending 1 into `input` makes P fire 1, 3, 7 and Q fire 2, 6.
pub fn mutual_recursion(input: &StreamSink<u32>) -> (Stream<u32>, Stream<u32>) {
    Transaction::run(|_| {
        let p = StreamLoop::<u32>::new().expect("inside a transaction");
        let q = StreamLoop::<u32>::new().expect("inside a transaction");

        let p_def = input
            .stream()
            .merge(&q.stream().map(|n| n + 1).filter(|n| *n < 10));
        let q_def = p.stream().map(|n| n * 2).filter(|n| *n < 10);

        p.resolve(&p_def).expect("first resolution");
        q.resolve(&q_def).expect("first resolution");
        (p.stream(), q.stream())
    })
    .expect("all loops resolved")
}
