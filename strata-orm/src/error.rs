//! # Error Module
//!
//! Crate-wide error type for Strata ORM. Expected query failures never
//! surface through this type from a terminal builder method; those are
//! absorbed into the [`QueryOutcome`](crate::QueryOutcome) envelope. `Error`
//! covers connection setup, raw queries, and the internal plumbing that the
//! terminals translate into `runtimeError` strings.

use thiserror::Error as ThisError;

/// Errors produced by the database layer and statement compilation.
#[derive(Debug, ThisError)]
pub enum Error {
    /// An error bubbled up from the underlying sqlx driver.
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    /// A column reference that does not exist on the target collection.
    #[error("unknown column '{column}' on collection '{collection}'")]
    UnknownColumn {
        collection: String,
        column: String,
    },

    /// Builder misuse or an invalid accumulated statement.
    #[error("{0}")]
    Query(String),

    /// A lifecycle hook rejected the operation.
    #[error("hook '{phase}' failed: {message}")]
    Hook {
        phase: &'static str,
        message: String,
    },
}

impl Error {
    /// Shorthand for a statement-level error with a formatted message.
    pub(crate) fn query(message: impl Into<String>) -> Self {
        Self::Query(message.into())
    }
}
