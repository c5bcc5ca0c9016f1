//! Domain error model.

use thiserror::Error;

/// Domain-level error shared by all aggregates.
///
/// Aggregate-specific rule violations live in each aggregate's own error type;
/// this enum only covers failures common to every domain value.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
