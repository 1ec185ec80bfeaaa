//! Database connection management
//!
//! This module provides the connection setup shared by the pool and by
//! one-off administrative connections (schema checks, CLI inspection).

use anyhow::{anyhow, Result};
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

/// Per-connection settings applied right after a connection is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// How long SQLite waits on a locked database before returning `SQLITE_BUSY`
    pub busy_timeout: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_millis(5000),
        }
    }
}

/// Configure a connection with the settings every pooled connection shares
pub fn configure(conn: &Connection, settings: &ConnectionSettings) -> rusqlite::Result<()> {
    // Enable WAL mode so readers are not blocked by an open write transaction
    let _: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;

    conn.execute("PRAGMA synchronous=NORMAL", [])?;
    conn.execute("PRAGMA temp_store=MEMORY", [])?;
    conn.execute("PRAGMA foreign_keys=ON", [])?;
    conn.busy_timeout(settings.busy_timeout)?;

    Ok(())
}

/// Core database connection wrapper
///
/// `DatabaseConn` is a single connection used outside of the pool, for
/// schema initialization and inspection.
pub struct DatabaseConn {
    pub conn: Connection,
}

impl DatabaseConn {
    /// Open a database at the specified path
    ///
    /// If the path is `None`, an in-memory database is created.
    pub fn open(path: Option<&Path>, settings: &ConnectionSettings) -> Result<Self> {
        let conn = match path {
            Some(p) => Connection::open(p)
                .map_err(|e| anyhow!("Failed to open database at '{}': {}", p.display(), e))?,
            None => Connection::open_in_memory()
                .map_err(|e| anyhow!("Failed to create in-memory database: {}", e))?,
        };

        configure(&conn, settings).map_err(|e| anyhow!("Failed to configure database: {}", e))?;
        Ok(DatabaseConn { conn })
    }

    /// Open a database at the specified path with default settings
    pub fn open_path(path: &Path) -> Result<Self> {
        Self::open(Some(path), &ConnectionSettings::default())
    }

    /// Create an in-memory database
    pub fn open_in_memory() -> Result<Self> {
        Self::open(None, &ConnectionSettings::default())
    }

    /// Check if a table exists in the database
    pub fn table_exists(&self, table_name: &str) -> Result<bool> {
        let count: i32 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                [table_name],
                |row| row.get(0),
            )
            .map_err(|e| anyhow!("Failed to check table existence: {}", e))?;
        Ok(count > 0)
    }

    /// Get the row count for a table
    pub fn table_count(&self, table_name: &str) -> Result<u64> {
        let query = format!("SELECT COUNT(*) FROM {}", table_name);
        let count: u64 = self
            .conn
            .query_row(&query, [], |row| row.get(0))
            .map_err(|e| anyhow!("Failed to get table count: {}", e))?;
        Ok(count)
    }
}
