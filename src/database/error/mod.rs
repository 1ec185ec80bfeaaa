//! Canonical data-access errors
//!
//! Every failure that leaves the database layer is a [`DataAccessError`]
//! tagged with an [`ErrorKind`]. Callers branch on the kind; the vendor error
//! that caused it is only reachable through [`std::error::Error::source`].
//!
//! - `NotFound` is raised directly by repositories and never goes through
//!   the translator.
//! - Driver failures are classified by an [`ErrorTranslator`].
//! - `ProgrammingUsage` marks misuse of the transaction API and is never
//!   worth retrying.

mod translator;

pub use translator::{ErrorCodeTable, ErrorTranslator, SqliteErrorTranslator};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Result alias used across the transaction and repository layers
pub type Result<T> = std::result::Result<T, DataAccessError>;

/// Category of a data-access failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// The requested record does not exist
    NotFound,
    /// A constraint rejected the write (duplicate key, not null, check, ...)
    ConstraintViolation,
    /// Pool exhaustion, busy/locked database, I/O failure. Safe to retry.
    TransientConnectivity,
    /// The driver failed while executing or decoding data
    DataIntegrity,
    /// Unrecognized driver failure
    Unknown,
    /// Misuse of the transaction API (double bind, unbind without binding, ...)
    ProgrammingUsage,
    /// The execution context was cancelled or its deadline passed
    Cancelled,
    /// Commit was requested but an inner scope forced a rollback
    UnexpectedRollback,
}

impl ErrorKind {
    /// Whether a caller may reasonably retry the whole unit of work
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::TransientConnectivity)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not-found",
            ErrorKind::ConstraintViolation => "constraint-violation",
            ErrorKind::TransientConnectivity => "transient-connectivity",
            ErrorKind::DataIntegrity => "data-integrity",
            ErrorKind::Unknown => "unknown",
            ErrorKind::ProgrammingUsage => "programming-usage",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::UnexpectedRollback => "unexpected-rollback",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for ErrorKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "not-found" => Ok(ErrorKind::NotFound),
            "constraint-violation" | "constraint" => Ok(ErrorKind::ConstraintViolation),
            "transient-connectivity" | "transient" => Ok(ErrorKind::TransientConnectivity),
            "data-integrity" => Ok(ErrorKind::DataIntegrity),
            "unknown" => Ok(ErrorKind::Unknown),
            "programming-usage" | "usage" => Ok(ErrorKind::ProgrammingUsage),
            "cancelled" => Ok(ErrorKind::Cancelled),
            "unexpected-rollback" => Ok(ErrorKind::UnexpectedRollback),
            _ => Err(format!("Unknown error kind: {}", s)),
        }
    }
}

/// Canonical error produced by the data-access layer
#[derive(Debug, Error)]
#[error("{kind} in {operation}: {message}")]
pub struct DataAccessError {
    kind: ErrorKind,
    operation: String,
    statement: Option<String>,
    message: String,
    #[source]
    source: Option<rusqlite::Error>,
}

impl DataAccessError {
    pub fn new(kind: ErrorKind, operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            operation: operation.into(),
            statement: None,
            message: message.into(),
            source: None,
        }
    }

    /// Attach the statement text that was being executed
    pub fn with_statement(mut self, statement: impl Into<String>) -> Self {
        self.statement = Some(statement.into());
        self
    }

    /// Attach the driver failure that caused this error
    pub fn with_source(mut self, source: rusqlite::Error) -> Self {
        self.source = Some(source);
        self
    }

    pub fn not_found(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, operation, message)
    }

    pub fn usage(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ProgrammingUsage, operation, message)
    }

    pub fn cancelled(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, operation, message)
    }

    pub fn constraint(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConstraintViolation, operation, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn statement(&self) -> Option<&str> {
        self.statement.as_deref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }
}
