// Copyright (c) 2025 - Cowboy AI, Inc.
//! StreamLoop Example
//!
//! Two streams defined in terms of each other, wired up with forward
//! references inside one transaction.
//!
//! ```text
//!            ┌──── + 1, < limit ◀──── Q ◀──┐
//!            ▼                              │
//! input ──▶ merge ══▶ P ──── * 2, < limit ──┘
//! ```
//!
//! Set `CIM_FRP_CONFIG` to a JSON object to override the transaction
//! configuration, and `RUST_LOG=cim_frp=debug` to watch loops being created
//! and resolved.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::info;

use cim_frp::frp::{StreamLoop, StreamSink, Transaction};
use cim_frp::{ReactiveConfig, ReactiveError};

const LIMIT: u32 = 100;

fn load_config() -> Result<ReactiveConfig> {
    match std::env::var("CIM_FRP_CONFIG") {
        Ok(json) => ReactiveConfig::from_json(&json).context("Invalid CIM_FRP_CONFIG"),
        Err(_) => Ok(ReactiveConfig::default()),
    }
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config = load_config()?;
    info!("📋 Configuration: {:?}", config);

    // === Example 1: Misuse is reported, not fatal ===
    match StreamLoop::<u32>::new() {
        Err(err @ ReactiveError::OutsideTransaction) => {
            info!("Loop outside a transaction rejected: {}", err)
        }
        other => anyhow::bail!("expected OutsideTransaction, got {:?}", other),
    }

    // === Example 2: Mutual recursion ===
    let input = StreamSink::<u32>::new();
    let (p, q) = Transaction::run_with_config(config, |trans| -> Result<_> {
        let p = StreamLoop::<u32>::new()?;
        let q = StreamLoop::<u32>::new()?;
        info!("Created loops in transaction {}", trans.id());

        p.resolve(
            &input
                .stream()
                .merge(&q.stream().map(|n| n + 1).filter(|n| *n < LIMIT)),
        )?;
        q.resolve(&p.stream().map(|n| n * 2).filter(|n| *n < LIMIT))?;

        let again = p.resolve(&input.stream());
        info!("Resolving P a second time: {:?}", again);
        Ok((p.stream(), q.stream()))
    })
    .context("Transaction failed to commit")??;

    let p_values = Arc::new(Mutex::new(Vec::new()));
    let q_values = Arc::new(Mutex::new(Vec::new()));
    let pv = p_values.clone();
    let qv = q_values.clone();
    let _p_listener = p.listen(move |n| pv.lock().push(*n));
    let _q_listener = q.listen(move |n| qv.lock().push(*n));

    for start in [1, 5] {
        input.send(start)?;
        info!(
            "input {:>2} -> P {:?}, Q {:?}",
            start,
            p_values.lock().drain(..).collect::<Vec<_>>(),
            q_values.lock().drain(..).collect::<Vec<_>>()
        );
    }

    Ok(())
}
