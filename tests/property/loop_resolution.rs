// Copyright (c) 2025 - Cowboy AI, Inc.
//! Property-Based Tests for StreamLoop Resolution
//!
//! A resolved loop must behave exactly like its target: same values, same
//! order, every transaction. Resolution itself must succeed exactly once no
//! matter how many callers race for it.

use cim_frp::frp::{Stream, StreamLoop, StreamSink, Transaction};
use cim_frp::{ReactiveError, ReactiveResult};
use parking_lot::Mutex;
use proptest::prelude::*;
use std::sync::Arc;

// ============================================================================
// Test Graph Helpers
// ============================================================================

/// Resolve a fresh loop to `target` and return the loop's stream
fn looped(target: &Stream<i64>) -> Stream<i64> {
    Transaction::run(|_| {
        let lp = StreamLoop::<i64>::new().unwrap();
        lp.resolve(target).unwrap();
        lp.stream()
    })
    .unwrap()
}

/// Listen to `stream`, returning the collected values and the listener
fn collect(stream: &Stream<i64>) -> (Arc<Mutex<Vec<i64>>>, cim_frp::Listener) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = seen.clone();
    let listener = stream.listen(move |value: &i64| s.lock().push(*value));
    (seen, listener)
}

/// What P fires for one input in `P = input ∪ (Q + 1 where < limit)`,
/// `Q = P * 2 where < limit`
fn expected_p(start: i64, limit: i64) -> Vec<i64> {
    let mut fired = vec![start];
    let mut p = start;
    loop {
        let q = p * 2;
        if q >= limit || q + 1 >= limit {
            return fired;
        }
        p = q + 1;
        fired.push(p);
    }
}

// ============================================================================
// Property Test Strategies
// ============================================================================

fn value_sequence() -> impl Strategy<Value = Vec<i64>> {
    prop::collection::vec(-1_000i64..1_000, 0..40)
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: A resolved loop forwards every target value, in order
    #[test]
    fn prop_loop_forwards_in_order(values in value_sequence()) {
        let sink = StreamSink::<i64>::new();
        let lp = looped(&sink.stream());
        let (seen, _listener) = collect(&lp);

        for value in &values {
            sink.send(*value).unwrap();
        }

        prop_assert_eq!(seen.lock().clone(), values);
    }

    /// Property: Values sent in one transaction arrive in that transaction
    #[test]
    fn prop_single_transaction_batch(values in value_sequence()) {
        let sink = StreamSink::<i64>::new();
        let lp = looped(&sink.stream());
        let (seen, _listener) = collect(&lp);

        Transaction::run(|_| {
            for value in &values {
                sink.send(*value).unwrap();
            }
        })
        .unwrap();

        prop_assert_eq!(seen.lock().clone(), values);
    }

    /// Property: Only the first of any number of resolve calls succeeds
    #[test]
    fn prop_resolve_once(attempts in 1usize..10) {
        let sink = StreamSink::<i64>::new();
        let target = sink.stream();

        let results: Vec<ReactiveResult<()>> = Transaction::run(|_| {
            let lp = StreamLoop::<i64>::new().unwrap();
            (0..attempts).map(|_| lp.resolve(&target)).collect()
        })
        .unwrap();

        prop_assert_eq!(results[0].clone(), Ok(()));
        for result in &results[1..] {
            prop_assert_eq!(result.clone(), Err(ReactiveError::DoubleResolution));
        }
        prop_assert_eq!(target.listener_count(), 1);
    }

    /// Property: Racing resolvers produce exactly one winner
    #[test]
    fn prop_concurrent_resolvers_one_winner(resolvers in 1usize..8) {
        let sink = StreamSink::<i64>::new();
        let target = sink.stream();

        let results: Vec<ReactiveResult<()>> = Transaction::run(|trans| {
            let lp = StreamLoop::<i64>::new().unwrap();
            let (lp_ref, target_ref) = (&lp, &target);
            std::thread::scope(|scope| {
                let handles: Vec<_> = (0..resolvers)
                    .map(|_| {
                        scope.spawn(move || trans.enter(|| lp_ref.resolve(target_ref)).unwrap())
                    })
                    .collect();
                handles.into_iter().map(|h| h.join().unwrap()).collect()
            })
        })
        .unwrap();

        let wins = results.iter().filter(|r| r.is_ok()).count();
        prop_assert_eq!(wins, 1);
        prop_assert_eq!(results.len() - wins, resolvers - 1);
        prop_assert_eq!(target.listener_count(), 1);
    }

    /// Property: Mutually recursive loops fire the fixpoint sequence
    #[test]
    fn prop_mutual_recursion_fixpoint(start in 0i64..50, limit in 1i64..200) {
        let input = StreamSink::<i64>::new();
        let p = Transaction::run(|_| {
            let p = StreamLoop::<i64>::new().unwrap();
            let q = StreamLoop::<i64>::new().unwrap();
            p.resolve(&input.stream().merge(&q.stream().map(|n| n + 1).filter(move |n| *n < limit)))
                .unwrap();
            q.resolve(&p.stream().map(|n| n * 2).filter(move |n| *n < limit))
                .unwrap();
            p.stream()
        })
        .unwrap();
        let (seen, _listener) = collect(&p);

        input.send(start).unwrap();

        prop_assert_eq!(seen.lock().clone(), expected_p(start, limit));
    }
}

// ============================================================================
// Standard Unit Tests
// ============================================================================

#[cfg(test)]
mod unit_tests {
    use super::*;

    #[test]
    fn test_expected_p() {
        assert_eq!(expected_p(1, 10), vec![1, 3, 7]);
        assert_eq!(expected_p(4, 10), vec![4, 9]);
        assert_eq!(expected_p(12, 10), vec![12]);
    }
}
