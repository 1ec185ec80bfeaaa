//! txscope database
//!
//! [`Database`] wires the pieces together for one SQLite file: the pool,
//! the context registry, the error translator, the coordinator and the
//! repositories built on them.
//!
//! Opening migrates an empty or outdated ledger forward and refuses a newer
//! or damaged one. Only [`Database::reset_path`] drops member data.

use crate::config::TxscopeConfig;
use crate::database::core::{
    ConnectionProvider, ConnectionSettings, DatabaseConn, PoolSettings, PoolStats, SchemaManager,
    SchemaStatus, SqlitePool, SCHEMA_VERSION,
};
use crate::database::datasource::DataSource;
use crate::database::error::{ErrorKind, SqliteErrorTranslator};
use crate::database::member::{BalancePolicy, MemberRepository};
use crate::database::tx::{CoordinatorSettings, TransactionCoordinator};
use crate::service::TransferService;
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// File name of the database inside the data directory
pub const DATABASE_FILE_NAME: &str = "txscope.sqlite3";

/// Everything needed to open a [`Database`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabaseSettings {
    pub pool: PoolSettings,
    pub coordinator: CoordinatorSettings,
    pub balance_policy: BalancePolicy,
    /// Extra `extended result code -> kind` entries for the error translator
    pub error_overrides: HashMap<i32, ErrorKind>,
}

pub struct Database {
    path: PathBuf,
    pool: Arc<SqlitePool>,
    source: DataSource,
    coordinator: TransactionCoordinator,
    members: MemberRepository,
    transfers: TransferService,
}

impl Database {
    /// Open the database described by `config`
    pub fn open(config: &TxscopeConfig) -> Result<Self> {
        Self::open_path(config.sqlite_path(), config.database_settings())
    }

    /// Open the database at `path`, creating or migrating the schema as needed
    pub fn open_path(path: impl AsRef<Path>, settings: DatabaseSettings) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    anyhow!(
                        "Failed to create data directory '{}': {}",
                        parent.display(),
                        e
                    )
                })?;
            }
        }

        prepare_schema(&path, &settings.pool.connection)?;

        let pool = Arc::new(SqlitePool::new(&path, settings.pool));
        let provider: Arc<dyn ConnectionProvider> = pool.clone();
        let translator = Arc::new(SqliteErrorTranslator::with_overrides(
            &settings.error_overrides,
        ));
        let source = DataSource::new(provider, translator);

        let coordinator = TransactionCoordinator::new(source.clone(), settings.coordinator);
        let members = MemberRepository::new(source.clone(), settings.balance_policy);
        let transfers = TransferService::new(members.clone(), coordinator.clone());

        Ok(Self {
            path,
            pool,
            source,
            coordinator,
            members,
            transfers,
        })
    }

    /// Drop every member at `path` and recreate the current schema
    pub fn reset_path(path: impl AsRef<Path>, connection: &ConnectionSettings) -> Result<()> {
        let path = path.as_ref();
        let db = DatabaseConn::open(Some(path), connection)?;
        warn!("Resetting txscope database at {}", path.display());
        SchemaManager::new(&db.conn).reset()
    }

    /// Open `{data_dir}/txscope.sqlite3`
    pub fn open_in_dir(data_dir: impl AsRef<Path>, settings: DatabaseSettings) -> Result<Self> {
        Self::open_path(data_dir.as_ref().join(DATABASE_FILE_NAME), settings)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn members(&self) -> &MemberRepository {
        &self.members
    }

    pub fn transactions(&self) -> &TransactionCoordinator {
        &self.coordinator
    }

    pub fn transfers(&self) -> &TransferService {
        &self.transfers
    }

    pub fn data_source(&self) -> &DataSource {
        &self.source
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Close the pool; later operations fail with a transient error
    pub fn close(&self) {
        self.pool.close();
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        self.pool.close();
    }
}

/// Check the schema on a standalone connection and migrate it forward
fn prepare_schema(path: &Path, connection: &ConnectionSettings) -> Result<()> {
    let db = DatabaseConn::open(Some(path), connection)?;
    let schema = SchemaManager::new(&db.conn);

    match schema.status()? {
        SchemaStatus::Current => {
            info!("txscope database schema is current");
            Ok(())
        }
        SchemaStatus::Empty => {
            info!("Initializing txscope database schema v{}", SCHEMA_VERSION);
            schema.migrate()
        }
        SchemaStatus::Outdated { found } => {
            info!(
                "Migrating txscope database schema from v{} to v{}",
                found, SCHEMA_VERSION
            );
            schema.migrate()
        }
        SchemaStatus::Newer { found } => Err(anyhow!(
            "database at '{}' uses schema v{}, newer than supported v{}",
            path.display(),
            found,
            SCHEMA_VERSION
        )),
        SchemaStatus::Damaged { reason } => Err(anyhow!(
            "database at '{}' is damaged ({}); `txscope reset --yes` recreates it empty",
            path.display(),
            reason
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::member::Member;
    use crate::database::tx::ExecutionContext;

    #[test]
    fn test_open_initializes_schema() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in_dir(dir.path().join("nested"), DatabaseSettings::default())
            .unwrap();
        assert!(db.path().ends_with(DATABASE_FILE_NAME));

        let conn = DatabaseConn::open_path(db.path()).unwrap();
        assert!(conn.table_exists("member").unwrap());
        assert_eq!(
            SchemaManager::new(&conn.conn).version().unwrap(),
            SCHEMA_VERSION
        );
    }

    #[test]
    fn test_reopen_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ExecutionContext::new();
        {
            let db = Database::open_in_dir(dir.path(), DatabaseSettings::default()).unwrap();
            db.members().create(&ctx, &Member::new("memberA", 42)).unwrap();
        }

        let db = Database::open_in_dir(dir.path(), DatabaseSettings::default()).unwrap();
        assert_eq!(db.members().read_by_key(&ctx, "memberA").unwrap().money, 42);
    }

    #[test]
    fn test_newer_schema_refuses_to_open_and_keeps_members() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DATABASE_FILE_NAME);
        let ctx = ExecutionContext::new();
        {
            let db = Database::open_path(&path, DatabaseSettings::default()).unwrap();
            db.members().create(&ctx, &Member::new("memberA", 42)).unwrap();
        }
        {
            let conn = DatabaseConn::open_path(&path).unwrap();
            conn.conn
                .pragma_update(None, "user_version", SCHEMA_VERSION + 1)
                .unwrap();
        }

        assert!(Database::open_path(&path, DatabaseSettings::default()).is_err());

        let conn = DatabaseConn::open_path(&path).unwrap();
        assert_eq!(conn.table_count("member").unwrap(), 1);
    }

    #[test]
    fn test_damaged_schema_needs_explicit_reset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DATABASE_FILE_NAME);
        {
            let db = Database::open_path(&path, DatabaseSettings::default()).unwrap();
            drop(db);
            let conn = DatabaseConn::open_path(&path).unwrap();
            conn.conn.execute("DROP TABLE member", []).unwrap();
        }

        assert!(Database::open_path(&path, DatabaseSettings::default()).is_err());

        Database::reset_path(&path, &ConnectionSettings::default()).unwrap();
        let db = Database::open_path(&path, DatabaseSettings::default()).unwrap();
        let ctx = ExecutionContext::new();
        assert!(db.members().read_by_key(&ctx, "memberA").unwrap_err().is_not_found());
    }

    #[test]
    fn test_closed_database_reports_transient_error() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in_dir(dir.path(), DatabaseSettings::default()).unwrap();
        db.close();

        let ctx = ExecutionContext::new();
        let err = db.members().read_by_key(&ctx, "memberA").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransientConnectivity);
        assert!(err.is_retryable());
    }
}
