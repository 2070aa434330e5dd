// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for armada-core.
//!
//! [`CoreError`] is the service-level taxonomy the HTTP layer maps to status
//! codes. Engine-level control signals and backend failures live in
//! [`crate::engine::EngineError`] and are wrapped here when they cross the
//! service boundary.

use thiserror::Error;

/// Result type using CoreError.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core errors that can occur while servicing requests or worker ticks.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CoreError {
    /// Input failed validation: bad template, schema mismatch, unknown
    /// engine, unknown filter key.
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// A template, run, or worker row does not exist.
    #[error("record not found: {0}")]
    RecordNotFound(String),

    /// A uniqueness constraint was violated, e.g. duplicate
    /// `(template_name, version)`.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Database operation failed.
    #[error("database error during '{operation}': {details}")]
    Database {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },

    /// An engine call failed; the inner error keeps the retryable /
    /// not-found distinction workers act on.
    #[error(transparent)]
    Engine(#[from] crate::engine::EngineError),

    /// Rendering a command template failed.
    #[error("template render failed: {0}")]
    Render(String),
}

impl CoreError {
    /// True when the error means "the requested record does not exist".
    pub fn is_not_found(&self) -> bool {
        matches!(self, CoreError::RecordNotFound(_))
    }

    pub(crate) fn database(operation: &str, err: impl std::fmt::Display) -> Self {
        CoreError::Database {
            operation: operation.to_string(),
            details: err.to_string(),
        }
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        CoreError::database("query", err)
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::database("json", err)
    }
}
