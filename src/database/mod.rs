//! Database module
//!
//! Transaction-scoped data access over SQLite, organized into:
//!
//! - **core**: connection setup, schema management, the connection pool
//! - **error**: canonical errors and the driver error translator
//! - **tx**: execution contexts, the context registry, the coordinator
//! - **datasource**: resolves the connection an operation runs on
//! - **member**: the member repository
//!
//! # Architecture
//!
//! ```text
//! database/
//! ├── core/           # Foundation
//! │   ├── connection  # PRAGMA setup, DatabaseConn wrapper
//! │   ├── pool        # r2d2-backed SqlitePool (ConnectionProvider)
//! │   ├── provider    # ConnectionProvider trait
//! │   └── schema      # versioned ledger schema
//! │
//! ├── error/          # DataAccessError, ErrorKind, ErrorTranslator
//! ├── tx/             # ExecutionContext, TransactionRegistry, TransactionCoordinator
//! ├── datasource      # bound-or-autonomous connection resolution
//! ├── member          # MemberRepository
//! └── store           # Database facade
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use txscope::database::{Database, DatabaseSettings, ExecutionContext, Member};
//!
//! let db = Database::open_in_dir("~/.txscope", DatabaseSettings::default())?;
//! let ctx = ExecutionContext::new();
//!
//! // Autonomous: each call leases and releases its own connection
//! db.members().create(&ctx, &Member::new("memberA", 10000))?;
//!
//! // Scoped: every call inside shares one connection and one transaction
//! db.transactions().execute(&ctx, |_uow| {
//!     db.members().update_balance(&ctx, "memberA", 8000)?;
//!     db.members().read_by_key(&ctx, "memberA")
//! })?;
//! ```

pub mod core;
pub mod datasource;
pub mod error;
pub mod member;
pub mod store;
pub mod tx;

// SQLite connection, pool and schema management
pub use core::{
    ConnectionProvider, ConnectionSettings, DatabaseConn, PoolSettings, PoolStats,
    PooledConnection, ProviderError, SchemaManager, SchemaStatus, SqliteManager, SqlitePool,
    LEDGER_TABLES, SCHEMA_VERSION,
};

// Canonical errors
pub use error::{
    DataAccessError, ErrorCodeTable, ErrorKind, ErrorTranslator, Result, SqliteErrorTranslator,
};

// Transaction scoping
pub use tx::{
    BeginBehavior, BoundConnection, BoundEntry, ContextId, CoordinatorSettings, ExecutionContext,
    NestingPolicy, TransactionCoordinator, TransactionRegistry, UnitOfWork,
};

pub use datasource::{ConnectionLease, DataSource, ResolvedConnection};
pub use member::{BalancePolicy, Member, MemberRepository};
pub use store::{Database, DatabaseSettings, DATABASE_FILE_NAME};
