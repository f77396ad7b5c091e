// SPDX-FileCopyrightText: 2026 Keelson Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Keelson persistence layer.

use thiserror::Error;

/// Boxed error source carried by store-facing variants.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Convenience alias used throughout the workspace.
pub type KeelsonResult<T> = Result<T, KeelsonError>;

/// The primary error type returned by engines, connections and sessions.
#[derive(Debug, Error)]
pub enum KeelsonError {
    /// Invalid engine or session configuration (bad URL scheme, bad option).
    #[error("configuration error: {0}")]
    Config(String),

    /// The backing store could not be reached.
    #[error("could not connect to `{target}`: {source}")]
    Connection { target: String, source: BoxError },

    /// Commit or rollback invoked out of sequence, or rejected by the store.
    #[error("transaction error: {message}")]
    Transaction {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// A session flush or commit was rejected by the store.
    ///
    /// The transaction has been rolled back and the session's pending state kept.
    #[error("commit failed: {source}")]
    Commit { source: BoxError },

    /// A single statement was rejected by the store.
    #[error("statement failed: {source}\n[SQL: {sql}]")]
    Statement { sql: String, source: BoxError },

    /// `one()` matched zero rows.
    #[error("no row was found for one(): {0}")]
    NotFound(String),

    /// `one()` matched more than one row.
    #[error("multiple rows were found for one() ({count} rows): {what}")]
    MultipleResults { what: String, count: usize },

    /// Caller passed something the layer refuses to act on.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A row could not be converted into the requested type or entity.
    #[error("mapping error: {0}")]
    Mapping(String),
}

impl KeelsonError {
    /// Build a `Transaction` error without an underlying store error.
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
            source: None,
        }
    }

    /// Build a `Statement` error from any store error.
    pub fn statement(sql: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Statement {
            sql: sql.into(),
            source: source.into(),
        }
    }

    /// Wrap an error raised during flush/commit as a `Commit` error.
    ///
    /// Errors that already are `Commit` pass through unchanged.
    pub fn into_commit(self) -> Self {
        match self {
            Self::Commit { .. } => self,
            other => Self::Commit {
                source: Box::new(other),
            },
        }
    }

    /// True for the cardinality failures raised by `one()`.
    pub fn is_cardinality(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::MultipleResults { .. })
    }
}
