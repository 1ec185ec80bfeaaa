//! Transaction context registry
//!
//! Maps each [`ContextId`] to the one physical connection its unit of work
//! is using. Repository operations look the binding up instead of receiving
//! a connection parameter.
//!
//! The map lock only guards bookkeeping. Statements run against the
//! [`BoundConnection`] handle handed out by [`TransactionRegistry::lookup`],
//! so a slow statement in one context never blocks another context's
//! bind, lookup or unbind.

use super::context::ContextId;
use crate::database::core::PooledConnection;
use crate::database::error::{DataAccessError, Result};
use parking_lot::{Mutex, RwLock};
use rusqlite::Connection;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// Shared handle to a connection bound to a unit of work
///
/// The slot is emptied exactly once, when the coordinator takes the
/// connection back to release it to the provider.
#[derive(Clone)]
pub struct BoundConnection {
    slot: Arc<Mutex<Option<PooledConnection>>>,
}

impl BoundConnection {
    pub fn new(conn: PooledConnection) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(conn))),
        }
    }

    /// Run `f` against the bound connection
    pub fn with<T>(
        &self,
        operation: &str,
        f: impl FnOnce(&Connection) -> Result<T>,
    ) -> Result<T> {
        let slot = self.slot.lock();
        match slot.as_ref() {
            Some(conn) => f(conn),
            None => Err(DataAccessError::usage(
                operation,
                "bound connection was already released",
            )),
        }
    }

    /// Remove the connection from the handle. Later `with` calls fail.
    pub fn take(&self) -> Option<PooledConnection> {
        self.slot.lock().take()
    }

    pub fn is_released(&self) -> bool {
        self.slot.lock().is_none()
    }

    /// Whether two handles share the same slot
    pub fn same_as(&self, other: &BoundConnection) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }
}

impl fmt::Debug for BoundConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundConnection")
            .field("released", &self.is_released())
            .finish()
    }
}

/// Registry entry for one execution context
#[derive(Debug)]
pub struct BoundEntry {
    pub connection: BoundConnection,
    /// Number of open unit-of-work levels, at least 1 while bound
    pub depth: u32,
    /// Set when an inner level rolled back; the outermost level must not commit
    pub rollback_only: bool,
    pub bound_at: Instant,
}

impl BoundEntry {
    pub fn age(&self) -> Duration {
        self.bound_at.elapsed()
    }
}

#[derive(Default)]
pub struct TransactionRegistry {
    entries: RwLock<HashMap<ContextId, BoundEntry>>,
}

impl TransactionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `connection` to `id` at depth 1.
    ///
    /// Binding a context that is already bound is a programming error.
    pub fn bind(&self, id: ContextId, connection: BoundConnection) -> Result<()> {
        let mut entries = self.entries.write();
        if entries.contains_key(&id) {
            error!("Context {} already has a bound connection", id);
            return Err(DataAccessError::usage(
                "bind",
                format!("context {} already has a bound connection", id),
            ));
        }
        entries.insert(
            id,
            BoundEntry {
                connection,
                depth: 1,
                rollback_only: false,
                bound_at: Instant::now(),
            },
        );
        debug!("Bound connection to context {}", id);
        Ok(())
    }

    /// The connection bound to `id`, if any
    pub fn lookup(&self, id: ContextId) -> Option<BoundConnection> {
        self.entries
            .read()
            .get(&id)
            .map(|entry| entry.connection.clone())
    }

    /// Remove and return the binding for `id`
    pub fn unbind(&self, id: ContextId) -> Result<BoundEntry> {
        match self.entries.write().remove(&id) {
            Some(entry) => {
                debug!(
                    "Unbound connection from context {} after {:?}",
                    id,
                    entry.age()
                );
                Ok(entry)
            }
            None => {
                error!("Context {} has no bound connection to unbind", id);
                Err(DataAccessError::usage(
                    "unbind",
                    format!("context {} has no bound connection", id),
                ))
            }
        }
    }

    /// Open one more nesting level, returning the new depth
    pub fn enter(&self, id: ContextId) -> Result<u32> {
        self.update(id, "enter", |entry| {
            entry.depth += 1;
            entry.depth
        })
    }

    /// Close one nesting level, returning the remaining depth.
    ///
    /// The outermost level is closed by [`unbind`](Self::unbind), never here.
    pub fn leave(&self, id: ContextId) -> Result<u32> {
        let mut entries = self.entries.write();
        let entry = entries.get_mut(&id).ok_or_else(|| {
            DataAccessError::usage("leave", format!("context {} has no bound connection", id))
        })?;
        if entry.depth <= 1 {
            return Err(DataAccessError::usage(
                "leave",
                format!("context {} is at its outermost level", id),
            ));
        }
        entry.depth -= 1;
        Ok(entry.depth)
    }

    pub fn mark_rollback_only(&self, id: ContextId) -> Result<()> {
        self.update(id, "mark_rollback_only", |entry| {
            entry.rollback_only = true;
        })
    }

    pub fn is_rollback_only(&self, id: ContextId) -> bool {
        self.entries
            .read()
            .get(&id)
            .is_some_and(|entry| entry.rollback_only)
    }

    /// Current depth of `id` if it is still bound to `connection`
    pub fn level(&self, id: ContextId, connection: &BoundConnection) -> Option<u32> {
        self.entries
            .read()
            .get(&id)
            .filter(|entry| entry.connection.same_as(connection))
            .map(|entry| entry.depth)
    }

    /// Nesting depth of `id`, `None` when unbound
    pub fn depth(&self, id: ContextId) -> Option<u32> {
        self.entries.read().get(&id).map(|entry| entry.depth)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Contexts that currently hold a binding
    pub fn contexts(&self) -> Vec<ContextId> {
        self.entries.read().keys().copied().collect()
    }

    fn update<T>(
        &self,
        id: ContextId,
        operation: &str,
        f: impl FnOnce(&mut BoundEntry) -> T,
    ) -> Result<T> {
        let mut entries = self.entries.write();
        match entries.get_mut(&id) {
            Some(entry) => Ok(f(entry)),
            None => Err(DataAccessError::usage(
                operation,
                format!("context {} has no bound connection", id),
            )),
        }
    }
}

impl fmt::Debug for TransactionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionRegistry")
            .field("bound", &self.len())
            .finish()
    }
}
