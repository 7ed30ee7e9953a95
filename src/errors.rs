//! Error types for reactive graph construction and propagation

use thiserror::Error;

use crate::frp::TransactionId;

/// Errors that can occur while building or propagating a stream graph
///
/// The first four variants are contract violations: they mean the code that
/// builds the graph is wrong, and never occur in correct usage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReactiveError {
    /// A forward reference was created (or resolved) with no active transaction
    #[error("StreamLoop must be created and resolved within an explicit transaction")]
    OutsideTransaction,

    /// A forward reference was resolved a second time
    #[error("StreamLoop was resolved more than once")]
    DoubleResolution,

    /// A forward reference was resolved in a different transaction than the
    /// one it was created in
    #[error("StreamLoop from transaction {created} cannot be resolved in transaction {current}")]
    TransactionMismatch {
        created: TransactionId,
        current: TransactionId,
    },

    /// Work was scheduled on a transaction whose propagation has finished
    #[error("Transaction {transaction} no longer accepts propagation work")]
    TransactionClosed { transaction: TransactionId },

    /// The transaction committed while forward references were still unresolved
    #[error("{count} StreamLoop(s) left unresolved at commit of transaction {transaction}")]
    UnresolvedLoop {
        transaction: TransactionId,
        count: usize,
    },

    /// Propagation did not settle within the configured number of steps
    #[error("Propagation in transaction {transaction} exceeded {limit} steps")]
    PropagationLimitExceeded {
        transaction: TransactionId,
        limit: usize,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl ReactiveError {
    /// True for errors caused by misuse of the forward reference protocol
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            ReactiveError::OutsideTransaction
                | ReactiveError::DoubleResolution
                | ReactiveError::TransactionMismatch { .. }
                | ReactiveError::TransactionClosed { .. }
        )
    }
}

/// Result type for reactive operations
pub type ReactiveResult<T> = Result<T, ReactiveError>;

impl From<serde_json::Error> for ReactiveError {
    fn from(err: serde_json::Error) -> Self {
        ReactiveError::Configuration(err.to_string())
    }
}
