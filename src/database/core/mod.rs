//! Core database infrastructure
//!
//! This module provides the foundational database components:
//! - `DatabaseConn`: single SQLite connection used outside the pool
//! - `ConnectionProvider`: the seam the transaction layer acquires connections through
//! - `SqlitePool`: `r2d2` pool implementing `ConnectionProvider`
//! - `SchemaManager`: versioned ledger schema, forward migrations

mod connection;
mod pool;
mod provider;
mod schema;

pub use connection::{configure, ConnectionSettings, DatabaseConn};
pub use pool::{PoolSettings, PoolStats, PooledConnection, SqliteManager, SqlitePool};
pub use provider::{ConnectionProvider, ProviderError};
pub use schema::{SchemaManager, SchemaStatus, LEDGER_TABLES, SCHEMA_VERSION};
