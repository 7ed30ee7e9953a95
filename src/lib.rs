//! Transactional FRP streams for the Composable Information Machine
//!
//! This crate provides a push-based reactive stream engine with atomic
//! transactions, rank-ordered propagation, and forward references
//! (`StreamLoop`) for defining streams in terms of each other.

pub mod config;
pub mod errors;
pub mod frp;

// Re-export commonly used types
pub use config::ReactiveConfig;
pub use errors::{ReactiveError, ReactiveResult};
pub use frp::{Listener, Stream, StreamLoop, StreamSink, Transaction};
