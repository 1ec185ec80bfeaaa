#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

//! txscope - transaction-scoped data access for SQLite
//!
//! txscope binds one physical connection to a logical unit of work and lets
//! repository code discover that connection through an explicit execution
//! context instead of receiving it as a parameter. Driver failures are
//! translated into a small set of canonical error kinds, so callers never
//! branch on SQLite result codes.
//!
//! # Feature Flags
//!
//! | Feature | Description | Key Dependencies |
//! |---------|-------------|------------------|
//! | (none) | Library: contexts, coordinator, repository, pool | `rusqlite`, `r2d2`, `parking_lot` |
//! | `display` | Table formatting with `tabled` | `tabled` |
//! | `cli` | The `txscope` binary | All above + `clap`, `tracing-subscriber` |
//!
//! ```toml
//! # Library only
//! txscope = { version = "0.1", default-features = false }
//!
//! # Default (CLI binary)
//! txscope = "0.1"
//! ```
//!
//! # Architecture
//!
//! - **[`database`]**: everything that touches SQLite
//!   - `core`: connection setup, schema, the connection pool
//!   - `error`: `DataAccessError`, `ErrorKind` and the error translator
//!   - `tx`: `ExecutionContext`, `TransactionRegistry`, `TransactionCoordinator`
//!   - `member`: `MemberRepository`
//! - **[`service`]**: business operations (`TransferService`) and output formats
//! - **[`config`]**: configuration management
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use txscope::{Database, ExecutionContext, Member, TxscopeConfig};
//!
//! let config = TxscopeConfig::new(&None)?;
//! let db = Database::open(&config)?;
//!
//! let ctx = ExecutionContext::new();
//! db.members().create(&ctx, &Member::new("memberA", 10000))?;
//! db.members().create(&ctx, &Member::new("memberB", 10000))?;
//!
//! // One connection, one transaction, committed or rolled back as a whole
//! let receipt = db.transfers().transfer(&ctx, "memberA", "memberB", 2000)?;
//! println!("{} now has {}", receipt.to.member_id, receipt.to.money);
//! ```
//!
//! ## Error handling
//!
//! ```rust,ignore
//! use txscope::ErrorKind;
//!
//! match db.members().read_by_key(&ctx, "nobody") {
//!     Ok(member) => println!("{:?}", member),
//!     Err(e) if e.kind() == ErrorKind::NotFound => println!("no such member"),
//!     Err(e) if e.is_retryable() => println!("try again later: {}", e),
//!     Err(e) => return Err(e.into()),
//! }
//! ```

pub mod config;
pub mod database;
pub mod service;

// =============================================================================
// Configuration
// =============================================================================

pub use config::{format_size, get_database_info, DatabaseInfo, TxscopeConfig};

// =============================================================================
// Database
// =============================================================================

pub use database::{Database, DatabaseSettings};

pub use database::{DataAccessError, ErrorKind, ErrorTranslator, Result, SqliteErrorTranslator};

pub use database::{
    BeginBehavior, ContextId, CoordinatorSettings, ExecutionContext, NestingPolicy,
    TransactionCoordinator, TransactionRegistry, UnitOfWork,
};

pub use database::{BalancePolicy, Member, MemberRepository};

pub use database::{
    ConnectionProvider, DataSource, PoolSettings, PoolStats, PooledConnection, SqlitePool,
};

// =============================================================================
// Services
// =============================================================================

pub use service::{OutputFormat, TransferReceipt, TransferService};
