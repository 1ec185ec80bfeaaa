//! SQLite connection pool
//!
//! [`SqlitePool`] is the [`ConnectionProvider`] the database uses: an
//! `r2d2` pool over `r2d2_sqlite` connections, each configured with
//! [`configure`] when it is opened. The wait for a connection is bounded by
//! the acquire timeout and by the caller's deadline, whichever is sooner.

use super::connection::{configure, ConnectionSettings};
use super::provider::{ConnectionProvider, ProviderError};
use crate::database::tx::ExecutionContext;
use r2d2::ManageConnection;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Connection checked out of a [`SqlitePool`]
pub type PooledConnection = r2d2::PooledConnection<SqliteManager>;

/// Pool sizing and timeouts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    pub max_size: usize,
    pub acquire_timeout: Duration,
    pub connection: ConnectionSettings,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_size: 8,
            acquire_timeout: Duration::from_millis(5000),
            connection: ConnectionSettings::default(),
        }
    }
}

/// Snapshot of pool counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Connections handed out since the pool was created
    pub acquired: u64,
    /// Connections handed back since the pool was created
    pub released: u64,
    /// Connections currently open (idle or checked out)
    pub open: usize,
    /// Connections currently idle
    pub idle: usize,
}

impl PoolStats {
    /// Connections currently checked out
    pub fn outstanding(&self) -> u64 {
        self.acquired.saturating_sub(self.released)
    }
}

/// [`SqliteConnectionManager`] that never pools a connection still inside a
/// transaction
#[derive(Debug)]
pub struct SqliteManager {
    inner: SqliteConnectionManager,
}

impl SqliteManager {
    pub fn file(path: impl AsRef<Path>, settings: ConnectionSettings) -> Self {
        Self {
            inner: SqliteConnectionManager::file(path)
                .with_init(move |conn| configure(conn, &settings)),
        }
    }

    /// Private shared-cache in-memory database
    pub fn memory(settings: ConnectionSettings) -> Self {
        Self {
            inner: SqliteConnectionManager::memory()
                .with_init(move |conn| configure(conn, &settings)),
        }
    }
}

impl ManageConnection for SqliteManager {
    type Connection = Connection;
    type Error = rusqlite::Error;

    fn connect(&self) -> Result<Connection, rusqlite::Error> {
        self.inner.connect()
    }

    fn is_valid(&self, conn: &mut Connection) -> Result<(), rusqlite::Error> {
        self.inner.is_valid(conn)
    }

    fn has_broken(&self, conn: &mut Connection) -> bool {
        !conn.is_autocommit()
    }
}

pub struct SqlitePool {
    path: PathBuf,
    settings: PoolSettings,
    pool: r2d2::Pool<SqliteManager>,
    closed: AtomicBool,
    acquired: AtomicU64,
    released: AtomicU64,
}

impl SqlitePool {
    pub fn new(path: impl AsRef<Path>, settings: PoolSettings) -> Self {
        let path = path.as_ref().to_path_buf();
        let max_size = u32::try_from(settings.max_size).unwrap_or(u32::MAX).max(1);
        info!(
            "Creating SQLite pool for {} (max size {})",
            path.display(),
            max_size
        );

        // Connections are opened on first demand, so building never blocks
        let pool = r2d2::Pool::builder()
            .max_size(max_size)
            .min_idle(Some(0))
            .build_unchecked(SqliteManager::file(&path, settings.connection));

        Self {
            path,
            settings,
            pool,
            closed: AtomicBool::new(false),
            acquired: AtomicU64::new(0),
            released: AtomicU64::new(0),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.pool.state();
        PoolStats {
            acquired: self.acquired.load(Ordering::SeqCst),
            released: self.released.load(Ordering::SeqCst),
            open: state.connections as usize,
            idle: state.idle_connections as usize,
        }
    }

    /// Refuse further acquires. Connections already out can still be released.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!("Closing SQLite pool for {}", self.path.display());
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl ConnectionProvider for SqlitePool {
    fn acquire(&self, ctx: &ExecutionContext) -> Result<PooledConnection, ProviderError> {
        if self.is_closed() {
            return Err(ProviderError::Closed);
        }
        if ctx.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }

        let timeout = match ctx.remaining() {
            Some(remaining) => remaining.min(self.settings.acquire_timeout),
            None => self.settings.acquire_timeout,
        };

        let started = Instant::now();
        match self.pool.get_timeout(timeout) {
            Ok(conn) => {
                self.acquired.fetch_add(1, Ordering::SeqCst);
                Ok(conn)
            }
            Err(e) => {
                if ctx.is_cancelled() {
                    return Err(ProviderError::Cancelled);
                }
                let waited = started.elapsed();
                warn!("No pooled connection after {:?}: {}", waited, e);
                Err(ProviderError::Exhausted {
                    waited,
                    max_size: self.settings.max_size,
                })
            }
        }
    }

    fn release(&self, conn: PooledConnection) {
        self.released.fetch_add(1, Ordering::SeqCst);

        // A connection still inside a transaction is dropped by the manager
        if !conn.is_autocommit() {
            match conn.execute_batch("ROLLBACK") {
                Ok(()) => warn!("Released connection had an open transaction, rolled back"),
                Err(e) => warn!("Discarding connection, rollback on release failed: {}", e),
            }
        }
        drop(conn);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn pool(dir: &tempfile::TempDir, max_size: usize, timeout_ms: u64) -> SqlitePool {
        SqlitePool::new(
            dir.path().join("pool.sqlite3"),
            PoolSettings {
                max_size,
                acquire_timeout: Duration::from_millis(timeout_ms),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_acquire_and_reuse() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool(&dir, 2, 1000);
        let ctx = ExecutionContext::new();

        let conn = pool.acquire(&ctx).unwrap();
        pool.release(conn);
        let conn = pool.acquire(&ctx).unwrap();
        pool.release(conn);

        let stats = pool.stats();
        assert_eq!(stats.acquired, 2);
        assert_eq!(stats.released, 2);
        assert!(stats.open >= 1);
        assert_eq!(stats.idle, stats.open);
        assert_eq!(stats.outstanding(), 0);
    }

    #[test]
    fn test_pooled_connections_are_configured() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool(&dir, 1, 1000);
        let conn = pool.acquire(&ExecutionContext::new()).unwrap();

        let mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
        let fk: i64 = conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(fk, 1);
        pool.release(conn);
    }

    #[test]
    fn test_exhausted() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool(&dir, 1, 50);
        let ctx = ExecutionContext::new();

        let held = pool.acquire(&ctx).unwrap();
        let err = pool.acquire(&ctx).unwrap_err();
        assert!(matches!(err, ProviderError::Exhausted { max_size: 1, .. }));

        pool.release(held);
        assert!(pool.acquire(&ctx).is_ok());
    }

    #[test]
    fn test_waiter_gets_released_connection() {
        let dir = tempfile::tempdir().unwrap();
        let pool = Arc::new(pool(&dir, 1, 5000));
        let ctx = ExecutionContext::new();
        let held = pool.acquire(&ctx).unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                let ctx = ExecutionContext::new();
                let conn = pool.acquire(&ctx).map_err(|e| e.to_string())?;
                pool.release(conn);
                Ok::<(), String>(())
            })
        };

        thread::sleep(Duration::from_millis(50));
        pool.release(held);
        assert!(waiter.join().unwrap().is_ok());
        assert_eq!(pool.stats().outstanding(), 0);
    }

    #[test]
    fn test_deadline_bounds_the_wait() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool(&dir, 1, 5000);
        let ctx = ExecutionContext::new();
        let _held = pool.acquire(&ctx).unwrap();

        let started = Instant::now();
        let waiting = ExecutionContext::with_timeout(Duration::from_millis(30));
        let err = pool.acquire(&waiting).unwrap_err();
        assert!(matches!(err, ProviderError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_release_rolls_back_open_transaction() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool(&dir, 1, 1000);
        let ctx = ExecutionContext::new();

        let conn = pool.acquire(&ctx).unwrap();
        conn.execute_batch("CREATE TABLE t (x INTEGER); BEGIN; INSERT INTO t VALUES (1);")
            .unwrap();
        assert!(!conn.is_autocommit());
        pool.release(conn);

        let conn = pool.acquire(&ctx).unwrap();
        assert!(conn.is_autocommit());
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
        pool.release(conn);
    }

    #[test]
    fn test_connection_dropped_inside_transaction_is_not_reused() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool(&dir, 1, 1000);
        let ctx = ExecutionContext::new();

        let conn = pool.acquire(&ctx).unwrap();
        conn.execute_batch("CREATE TABLE t (x INTEGER); BEGIN; INSERT INTO t VALUES (1);")
            .unwrap();
        // skipping release hands the connection straight back to r2d2
        drop(conn);

        let conn = pool.acquire(&ctx).unwrap();
        assert!(conn.is_autocommit());
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
        pool.release(conn);
    }

    #[test]
    fn test_closed_pool() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool(&dir, 2, 1000);
        let ctx = ExecutionContext::new();
        let conn = pool.acquire(&ctx).unwrap();

        pool.close();
        assert!(pool.is_closed());
        assert!(matches!(pool.acquire(&ctx), Err(ProviderError::Closed)));

        // a connection out before the close can still come back
        pool.release(conn);
        assert_eq!(pool.stats().outstanding(), 0);
    }
}
