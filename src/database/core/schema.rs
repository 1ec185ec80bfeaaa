//! Member ledger schema
//!
//! The schema version lives in SQLite's `user_version` header field. Opening
//! a database only ever moves it forward: an empty file gets the current
//! schema, an older one gets the pending migrations, and anything else is
//! reported back untouched. Dropping the ledger is [`SchemaManager::reset`],
//! which nothing calls implicitly.

use anyhow::{anyhow, Result};
use rusqlite::Connection;

/// Version written by the last entry of [`MIGRATIONS`]
pub const SCHEMA_VERSION: u32 = 1;

/// `(version, DDL)` pairs, applied in order to reach each version
const MIGRATIONS: &[(u32, &str)] = &[(
    1,
    r#"
    CREATE TABLE member (
        member_id TEXT PRIMARY KEY NOT NULL,
        money INTEGER NOT NULL DEFAULT 0
    );
    "#,
)];

/// Tables the current version must have
pub const LEDGER_TABLES: &[&str] = &["member"];

/// What [`SchemaManager::status`] found
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaStatus {
    /// No version and no ledger tables
    Empty,
    Current,
    /// Older version; migrating keeps every row
    Outdated { found: u32 },
    /// Written by a newer txscope
    Newer { found: u32 },
    /// Version and tables disagree
    Damaged { reason: String },
}

pub struct SchemaManager<'a> {
    conn: &'a Connection,
}

impl<'a> SchemaManager<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Schema version recorded in the database header, 0 when never set
    pub fn version(&self) -> Result<u32> {
        self.conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .map_err(|e| anyhow!("Failed to read schema version: {}", e))
    }

    pub fn status(&self) -> Result<SchemaStatus> {
        let found = self.version()?;
        let missing = self.missing_tables()?;

        Ok(match found {
            0 if missing.len() == LEDGER_TABLES.len() => SchemaStatus::Empty,
            0 => SchemaStatus::Damaged {
                reason: "ledger tables exist but no schema version is recorded".to_string(),
            },
            v if v > SCHEMA_VERSION => SchemaStatus::Newer { found: v },
            v if v < SCHEMA_VERSION => SchemaStatus::Outdated { found: v },
            _ if !missing.is_empty() => SchemaStatus::Damaged {
                reason: format!("missing tables: {}", missing.join(", ")),
            },
            _ => SchemaStatus::Current,
        })
    }

    /// Bring an empty or outdated database to [`SCHEMA_VERSION`].
    ///
    /// Pending migrations run in one transaction. Newer or damaged schemas
    /// are left alone and reported as errors.
    pub fn migrate(&self) -> Result<()> {
        let from = match self.status()? {
            SchemaStatus::Current => return Ok(()),
            SchemaStatus::Empty => 0,
            SchemaStatus::Outdated { found } => found,
            SchemaStatus::Newer { found } => {
                return Err(anyhow!(
                    "database schema v{} is newer than supported v{}",
                    found,
                    SCHEMA_VERSION
                ))
            }
            SchemaStatus::Damaged { reason } => {
                return Err(anyhow!("database schema is damaged: {}", reason))
            }
        };

        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(|e| anyhow!("Failed to start schema migration: {}", e))?;
        for (version, ddl) in MIGRATIONS.iter().filter(|(v, _)| *v > from) {
            tx.execute_batch(ddl)
                .map_err(|e| anyhow!("Failed to apply schema v{}: {}", version, e))?;
        }
        tx.pragma_update(None, "user_version", SCHEMA_VERSION)
            .map_err(|e| anyhow!("Failed to record schema version: {}", e))?;
        tx.commit()
            .map_err(|e| anyhow!("Failed to commit schema migration: {}", e))?;

        Ok(())
    }

    /// Drop every ledger table and recreate the current schema.
    ///
    /// All members are lost.
    pub fn reset(&self) -> Result<()> {
        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(|e| anyhow!("Failed to start schema reset: {}", e))?;
        for table in LEDGER_TABLES {
            tx.execute_batch(&format!("DROP TABLE IF EXISTS {}", table))
                .map_err(|e| anyhow!("Failed to drop {}: {}", table, e))?;
        }
        tx.pragma_update(None, "user_version", 0)
            .map_err(|e| anyhow!("Failed to clear schema version: {}", e))?;
        tx.commit()
            .map_err(|e| anyhow!("Failed to commit schema reset: {}", e))?;

        self.migrate()
    }

    fn missing_tables(&self) -> Result<Vec<String>> {
        let mut missing = Vec::new();
        for table in LEDGER_TABLES {
            let count: i64 = self
                .conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                    [table],
                    |row| row.get(0),
                )
                .map_err(|e| anyhow!("Failed to inspect schema: {}", e))?;
            if count == 0 {
                missing.push(table.to_string());
            }
        }
        Ok(missing)
    }
}
