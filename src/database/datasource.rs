//! Connection resolution
//!
//! [`DataSource`] bundles the provider, the registry and the error
//! translator. Repositories ask it for a connection and get either the one
//! bound to the caller's unit of work or a fresh autonomous lease.

use crate::database::core::{ConnectionProvider, PooledConnection};
use crate::database::error::{DataAccessError, ErrorTranslator, Result};
use crate::database::tx::{BoundConnection, ExecutionContext, TransactionRegistry};
use rusqlite::Connection;
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct DataSource {
    provider: Arc<dyn ConnectionProvider>,
    registry: Arc<TransactionRegistry>,
    translator: Arc<dyn ErrorTranslator>,
}

impl DataSource {
    /// Data source with its own, empty registry
    pub fn new(provider: Arc<dyn ConnectionProvider>, translator: Arc<dyn ErrorTranslator>) -> Self {
        Self::with_registry(provider, translator, Arc::new(TransactionRegistry::new()))
    }

    pub fn with_registry(
        provider: Arc<dyn ConnectionProvider>,
        translator: Arc<dyn ErrorTranslator>,
        registry: Arc<TransactionRegistry>,
    ) -> Self {
        Self {
            provider,
            registry,
            translator,
        }
    }

    pub fn provider(&self) -> &Arc<dyn ConnectionProvider> {
        &self.provider
    }

    pub fn registry(&self) -> &Arc<TransactionRegistry> {
        &self.registry
    }

    pub fn translator(&self) -> &Arc<dyn ErrorTranslator> {
        &self.translator
    }

    /// Acquire a connection directly from the provider
    pub fn acquire(&self, ctx: &ExecutionContext, operation: &str) -> Result<PooledConnection> {
        ctx.check(operation)?;
        self.provider
            .acquire(ctx)
            .map_err(|e| self.translator.translate_provider(operation, e))
    }

    /// Hand a connection obtained from [`acquire`](Self::acquire) back
    pub fn release(&self, conn: PooledConnection) {
        self.provider.release(conn);
    }

    /// Resolve the connection `operation` should run on
    pub fn resolve(&self, ctx: &ExecutionContext, operation: &str) -> Result<ResolvedConnection> {
        if let Some(bound) = self.registry.lookup(ctx.id()) {
            debug!("{} joins unit of work of context {}", operation, ctx.id());
            return Ok(ResolvedConnection::Bound(bound));
        }

        let conn = self.acquire(ctx, operation)?;
        debug!("{} runs autonomously for context {}", operation, ctx.id());
        Ok(ResolvedConnection::Autonomous(ConnectionLease {
            conn: Some(conn),
            provider: Arc::clone(&self.provider),
        }))
    }
}

/// A connection resolved for a single repository operation
#[derive(Debug)]
pub enum ResolvedConnection {
    /// Owned by the open unit of work; never released here
    Bound(BoundConnection),
    /// Owned by this operation; released when dropped
    Autonomous(ConnectionLease),
}

impl ResolvedConnection {
    pub fn with<T>(
        &self,
        operation: &str,
        f: impl FnOnce(&Connection) -> Result<T>,
    ) -> Result<T> {
        match self {
            ResolvedConnection::Bound(bound) => bound.with(operation, f),
            ResolvedConnection::Autonomous(lease) => lease.with(operation, f),
        }
    }

    pub fn is_bound(&self) -> bool {
        matches!(self, ResolvedConnection::Bound(_))
    }
}

/// Connection on loan from the provider for one autonomous operation
pub struct ConnectionLease {
    conn: Option<PooledConnection>,
    provider: Arc<dyn ConnectionProvider>,
}

impl ConnectionLease {
    fn with<T>(&self, operation: &str, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        match self.conn.as_ref() {
            Some(conn) => f(conn),
            None => Err(DataAccessError::usage(
                operation,
                "leased connection was already released",
            )),
        }
    }
}

impl Drop for ConnectionLease {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.provider.release(conn);
        }
    }
}

impl std::fmt::Debug for ConnectionLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionLease").finish_non_exhaustive()
    }
}
