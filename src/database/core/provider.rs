//! Connection provider seam
//!
//! The transaction layer never opens connections itself; it asks a
//! [`ConnectionProvider`] and hands every connection back exactly once.

use super::pool::PooledConnection;
use crate::database::tx::ExecutionContext;
use std::time::Duration;
use thiserror::Error;

/// Supplies pooled connections on demand
pub trait ConnectionProvider: Send + Sync {
    /// Obtain a connection, blocking while the provider is exhausted.
    ///
    /// Implementations should give up when `ctx` is cancelled.
    fn acquire(&self, ctx: &ExecutionContext) -> Result<PooledConnection, ProviderError>;

    /// Return a connection obtained from [`acquire`](Self::acquire)
    fn release(&self, conn: PooledConnection);
}

/// Failure to obtain a connection
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("no connection available after waiting {waited:?} (max size {max_size})")]
    Exhausted { waited: Duration, max_size: usize },

    #[error("provider is closed")]
    Closed,

    #[error("acquire cancelled")]
    Cancelled,
}
