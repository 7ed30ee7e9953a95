//! Configuration for transactions and forward reference checks

use serde::{Deserialize, Serialize};

use crate::errors::{ReactiveError, ReactiveResult};

/// Configuration applied to a transaction for its whole lifetime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReactiveConfig {
    /// Reject resolving a `StreamLoop` outside the transaction it was created in
    pub enforce_same_transaction: bool,
    /// Fail the commit when a `StreamLoop` created in the transaction is unresolved
    pub reject_unresolved_loops: bool,
    /// Upper bound on prioritized actions run by one transaction
    pub max_propagation_steps: usize,
}

impl Default for ReactiveConfig {
    fn default() -> Self {
        Self {
            enforce_same_transaction: true,
            reject_unresolved_loops: true,
            max_propagation_steps: 1_000_000,
        }
    }
}

impl ReactiveConfig {
    /// Parse and validate a configuration from JSON
    ///
    /// Missing fields take their default values.
    pub fn from_json(json: &str) -> ReactiveResult<Self> {
        let config: ReactiveConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values the engine cannot run with
    pub fn validate(&self) -> ReactiveResult<()> {
        if self.max_propagation_steps == 0 {
            return Err(ReactiveError::Configuration(
                "max_propagation_steps must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_enforce_same_transaction(mut self, enforce: bool) -> Self {
        self.enforce_same_transaction = enforce;
        self
    }

    pub fn with_reject_unresolved_loops(mut self, reject: bool) -> Self {
        self.reject_unresolved_loops = reject;
        self
    }

    pub fn with_max_propagation_steps(mut self, steps: usize) -> Self {
        self.max_propagation_steps = steps;
        self
    }
}
