//! Translation of SQLite driver failures into canonical errors

use super::{DataAccessError, ErrorKind};
use crate::database::core::ProviderError;
use rusqlite::ffi;
use std::collections::HashMap;

// Extended result codes are `primary | (n << 8)`.
const SQLITE_CONSTRAINT_CHECK: i32 = 275;
const SQLITE_CONSTRAINT_FOREIGNKEY: i32 = 787;
const SQLITE_CONSTRAINT_NOTNULL: i32 = 1299;
const SQLITE_CONSTRAINT_PRIMARYKEY: i32 = 1555;
const SQLITE_CONSTRAINT_UNIQUE: i32 = 2067;

/// Maps a failing `(operation, statement, driver error)` to one canonical error.
///
/// Implementations must be infallible and hold no per-call state, so one
/// instance can be shared by every caller.
pub trait ErrorTranslator: Send + Sync {
    fn translate(&self, operation: &str, statement: &str, error: rusqlite::Error)
        -> DataAccessError;

    /// Translate a failure to obtain a connection from the provider
    fn translate_provider(&self, operation: &str, error: ProviderError) -> DataAccessError {
        let kind = match error {
            ProviderError::Cancelled => ErrorKind::Cancelled,
            ProviderError::Exhausted { .. } | ProviderError::Closed => {
                ErrorKind::TransientConnectivity
            }
        };
        DataAccessError::new(kind, operation, format!("Failed to acquire connection: {}", error))
    }
}

/// Read-only SQLite result code table
///
/// Lookups try the extended result code first, then the primary code
/// (low byte), and fall back to [`ErrorKind::Unknown`].
#[derive(Debug, Clone)]
pub struct ErrorCodeTable {
    extended: HashMap<i32, ErrorKind>,
    primary: HashMap<i32, ErrorKind>,
}

impl ErrorCodeTable {
    /// Table with no entries; everything classifies as unknown
    pub fn empty() -> Self {
        Self {
            extended: HashMap::new(),
            primary: HashMap::new(),
        }
    }

    /// Default classification for SQLite
    pub fn sqlite() -> Self {
        let mut table = Self::empty();

        for code in [
            SQLITE_CONSTRAINT_CHECK,
            SQLITE_CONSTRAINT_FOREIGNKEY,
            SQLITE_CONSTRAINT_NOTNULL,
            SQLITE_CONSTRAINT_PRIMARYKEY,
            SQLITE_CONSTRAINT_UNIQUE,
        ] {
            table.extended.insert(code, ErrorKind::ConstraintViolation);
        }

        let primary = [
            (ffi::SQLITE_CONSTRAINT, ErrorKind::ConstraintViolation),
            (ffi::SQLITE_BUSY, ErrorKind::TransientConnectivity),
            (ffi::SQLITE_LOCKED, ErrorKind::TransientConnectivity),
            (ffi::SQLITE_CANTOPEN, ErrorKind::TransientConnectivity),
            (ffi::SQLITE_IOERR, ErrorKind::TransientConnectivity),
            (ffi::SQLITE_PROTOCOL, ErrorKind::TransientConnectivity),
            (ffi::SQLITE_INTERRUPT, ErrorKind::TransientConnectivity),
            (ffi::SQLITE_CORRUPT, ErrorKind::DataIntegrity),
            (ffi::SQLITE_NOTADB, ErrorKind::DataIntegrity),
            (ffi::SQLITE_MISMATCH, ErrorKind::DataIntegrity),
            (ffi::SQLITE_TOOBIG, ErrorKind::DataIntegrity),
            (ffi::SQLITE_RANGE, ErrorKind::DataIntegrity),
            (ffi::SQLITE_SCHEMA, ErrorKind::DataIntegrity),
            (ffi::SQLITE_READONLY, ErrorKind::DataIntegrity),
            (ffi::SQLITE_FULL, ErrorKind::DataIntegrity),
            (ffi::SQLITE_MISUSE, ErrorKind::ProgrammingUsage),
        ];
        for (code, kind) in primary {
            table.primary.insert(code, kind);
        }

        table
    }

    /// Add or replace an entry. Codes above 255 are treated as extended codes.
    pub fn insert(&mut self, code: i32, kind: ErrorKind) {
        if code > 0xff {
            self.extended.insert(code, kind);
        } else {
            self.primary.insert(code, kind);
        }
    }

    /// Remove the extended entries that refine `primary`
    pub fn clear_extended(&mut self, primary: i32) {
        self.extended.retain(|code, _| code & 0xff != primary);
    }

    pub fn classify(&self, extended_code: i32) -> ErrorKind {
        self.extended
            .get(&extended_code)
            .or_else(|| self.primary.get(&(extended_code & 0xff)))
            .copied()
            .unwrap_or(ErrorKind::Unknown)
    }

    pub fn len(&self) -> usize {
        self.extended.len() + self.primary.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ErrorCodeTable {
    fn default() -> Self {
        Self::sqlite()
    }
}

/// Translator backed by an [`ErrorCodeTable`]
#[derive(Debug, Clone, Default)]
pub struct SqliteErrorTranslator {
    table: ErrorCodeTable,
}

impl SqliteErrorTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a translator whose table is the SQLite default plus `overrides`.
    ///
    /// Overriding a primary code reclassifies every extended code under it,
    /// except extended codes that `overrides` names explicitly.
    pub fn with_overrides(overrides: &HashMap<i32, ErrorKind>) -> Self {
        let mut table = ErrorCodeTable::sqlite();
        for code in overrides.keys().filter(|code| **code <= 0xff) {
            table.clear_extended(*code);
        }
        for (code, kind) in overrides {
            table.insert(*code, *kind);
        }
        Self { table }
    }

    pub fn table(&self) -> &ErrorCodeTable {
        &self.table
    }

    /// Classify a driver failure without building an error
    pub fn classify(&self, error: &rusqlite::Error) -> ErrorKind {
        use rusqlite::Error;

        match error {
            Error::SqliteFailure(err, _) => self.table.classify(err.extended_code),
            Error::FromSqlConversionFailure(..)
            | Error::InvalidColumnType(..)
            | Error::IntegralValueOutOfRange(..) => ErrorKind::DataIntegrity,
            Error::InvalidParameterCount(..)
            | Error::InvalidParameterName(..)
            | Error::InvalidColumnIndex(..)
            | Error::InvalidColumnName(..)
            | Error::ExecuteReturnedResults
            | Error::InvalidQuery
            | Error::MultipleStatement => ErrorKind::ProgrammingUsage,
            _ => ErrorKind::Unknown,
        }
    }
}

impl ErrorTranslator for SqliteErrorTranslator {
    fn translate(
        &self,
        operation: &str,
        statement: &str,
        error: rusqlite::Error,
    ) -> DataAccessError {
        let kind = self.classify(&error);
        DataAccessError::new(kind, operation, error.to_string())
            .with_statement(statement)
            .with_source(error)
    }
}
