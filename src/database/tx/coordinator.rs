//! Transaction coordinator
//!
//! Opens and closes units of work. Opening acquires a connection, starts a
//! transaction on it and binds it to the caller's context; closing commits
//! or rolls back, restores autocommit, unbinds and releases, in that order.
//! The unbind and release always happen, even when `COMMIT` or `ROLLBACK`
//! itself fails.
//!
//! Joined handles close innermost first. Closing a handle out of order is a
//! usage error and leaves the unit of work rollback-only.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let ctx = ExecutionContext::new();
//! coordinator.execute(&ctx, |_uow| {
//!     members.create(&ctx, &Member::new("a", 100))?;
//!     members.update_balance(&ctx, "a", 50)?;
//!     Ok(())
//! })?;
//! ```

use super::context::{ContextId, ExecutionContext};
use super::registry::BoundConnection;
use crate::database::datasource::DataSource;
use crate::database::error::{DataAccessError, ErrorKind, Result};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, error, info, warn};

/// What `begin` does when the context already has an open unit of work
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NestingPolicy {
    /// Fail with a programming-usage error
    #[default]
    Reject,
    /// Join the open unit of work; only the outermost level finalizes it
    Join,
}

impl fmt::Display for NestingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NestingPolicy::Reject => write!(f, "reject"),
            NestingPolicy::Join => write!(f, "join"),
        }
    }
}

impl FromStr for NestingPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "reject" => Ok(NestingPolicy::Reject),
            "join" => Ok(NestingPolicy::Join),
            _ => Err(format!("Unknown nesting policy: {} (expected reject or join)", s)),
        }
    }
}

/// SQLite locking behavior of the `BEGIN` that opens a unit of work
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BeginBehavior {
    Deferred,
    /// Take the write lock up front, so concurrent writers queue on
    /// `busy_timeout` instead of failing mid-transaction
    #[default]
    Immediate,
    Exclusive,
}

impl BeginBehavior {
    pub fn statement(&self) -> &'static str {
        match self {
            BeginBehavior::Deferred => "BEGIN DEFERRED",
            BeginBehavior::Immediate => "BEGIN IMMEDIATE",
            BeginBehavior::Exclusive => "BEGIN EXCLUSIVE",
        }
    }
}

impl fmt::Display for BeginBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BeginBehavior::Deferred => write!(f, "deferred"),
            BeginBehavior::Immediate => write!(f, "immediate"),
            BeginBehavior::Exclusive => write!(f, "exclusive"),
        }
    }
}

impl FromStr for BeginBehavior {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "deferred" => Ok(BeginBehavior::Deferred),
            "immediate" => Ok(BeginBehavior::Immediate),
            "exclusive" => Ok(BeginBehavior::Exclusive),
            _ => Err(format!(
                "Unknown begin behavior: {} (expected deferred, immediate or exclusive)",
                s
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoordinatorSettings {
    pub nesting: NestingPolicy,
    pub begin_behavior: BeginBehavior,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Completion {
    Commit,
    Rollback,
}

impl Completion {
    fn operation(&self) -> &'static str {
        match self {
            Completion::Commit => "commit",
            Completion::Rollback => "rollback",
        }
    }

    fn statement(&self) -> &'static str {
        match self {
            Completion::Commit => "COMMIT",
            Completion::Rollback => "ROLLBACK",
        }
    }
}

/// Demarcates units of work over a [`DataSource`]
#[derive(Clone)]
pub struct TransactionCoordinator {
    source: DataSource,
    settings: CoordinatorSettings,
}

impl TransactionCoordinator {
    pub fn new(source: DataSource, settings: CoordinatorSettings) -> Self {
        Self { source, settings }
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    pub fn data_source(&self) -> &DataSource {
        &self.source
    }

    /// Open a unit of work for `ctx`
    pub fn begin(&self, ctx: &ExecutionContext) -> Result<UnitOfWork> {
        let registry = self.source.registry();
        let id = ctx.id();

        if let Some(bound) = registry.lookup(id) {
            return match self.settings.nesting {
                NestingPolicy::Reject => {
                    error!("Context {} already has an open unit of work", id);
                    Err(DataAccessError::usage(
                        "begin",
                        format!("context {} already has an open unit of work", id),
                    ))
                }
                NestingPolicy::Join => {
                    let depth = registry.enter(id)?;
                    debug!("Context {} joined its unit of work at depth {}", id, depth);
                    Ok(UnitOfWork::new(self.clone(), id, depth, bound))
                }
            };
        }

        let conn = self.source.acquire(ctx, "begin")?;

        let begin = self.settings.begin_behavior.statement();
        if let Err(e) = conn.execute_batch(begin) {
            let err = self.source.translator().translate("begin", begin, e);
            self.source.release(conn);
            return Err(err);
        }

        let bound = BoundConnection::new(conn);
        if let Err(e) = registry.bind(id, bound.clone()) {
            if let Some(conn) = bound.take() {
                restore_autocommit(&conn);
                self.source.release(conn);
            }
            return Err(e);
        }

        info!("Opened unit of work for context {}", id);
        Ok(UnitOfWork::new(self.clone(), id, 1, bound))
    }

    /// Commit `uow`; at an inner level this only closes that level
    pub fn commit(&self, uow: UnitOfWork) -> Result<()> {
        let (id, depth, bound) = uow.finish();
        self.complete(id, depth, &bound, Completion::Commit)
    }

    /// Roll back `uow`; at an inner level this marks the unit of work rollback-only
    pub fn rollback(&self, uow: UnitOfWork) -> Result<()> {
        let (id, depth, bound) = uow.finish();
        self.complete(id, depth, &bound, Completion::Rollback)
    }

    /// Run `f` inside a unit of work: commit on `Ok`, roll back on `Err`
    pub fn execute<T, E, F>(&self, ctx: &ExecutionContext, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&UnitOfWork) -> std::result::Result<T, E>,
        E: From<DataAccessError>,
    {
        let uow = self.begin(ctx)?;
        match f(&uow) {
            Ok(value) => {
                self.commit(uow)?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = self.rollback(uow) {
                    warn!("Rollback after failed unit of work also failed: {}", rollback_err);
                }
                Err(e)
            }
        }
    }

    fn complete(
        &self,
        id: ContextId,
        depth: u32,
        bound: &BoundConnection,
        completion: Completion,
    ) -> Result<()> {
        let registry = self.source.registry();
        let operation = completion.operation();

        // Handles close innermost first, and only on the unit of work they opened
        match registry.level(id, bound) {
            None => {
                error!("Context {} has no open unit of work for this handle", id);
                return Err(DataAccessError::usage(
                    operation,
                    format!("unit of work of context {} is no longer open", id),
                ));
            }
            Some(current) if current != depth => {
                error!(
                    "Context {} closed level {} while level {} is still open",
                    id, depth, current
                );
                registry.mark_rollback_only(id)?;
                if depth == 1 {
                    // Nothing else can finish the unit of work once its outermost handle is gone
                    if let Err(e) = self.finalize(id, bound, Completion::Rollback) {
                        warn!("Rollback of out-of-order unit of work failed: {}", e);
                    }
                }
                return Err(DataAccessError::usage(
                    operation,
                    format!(
                        "context {} closed level {} while level {} is still open",
                        id, depth, current
                    ),
                ));
            }
            Some(_) => {}
        }

        if depth > 1 {
            if completion == Completion::Rollback {
                registry.mark_rollback_only(id)?;
            }
            let remaining = registry.leave(id)?;
            debug!(
                "Context {} closed nested level with {}, depth now {}",
                id, operation, remaining
            );
            return Ok(());
        }

        self.finalize(id, bound, completion)
    }

    /// Finish the outermost level: commit or roll back, then unbind and release
    fn finalize(&self, id: ContextId, bound: &BoundConnection, completion: Completion) -> Result<()> {
        let registry = self.source.registry();
        let operation = completion.operation();

        let rollback_only = registry.is_rollback_only(id);
        let effective = if rollback_only {
            Completion::Rollback
        } else {
            completion
        };

        let outcome = bound.with(operation, |conn| {
            let statement = effective.statement();
            let result = conn
                .execute_batch(statement)
                .map_err(|e| self.source.translator().translate(operation, statement, e));
            restore_autocommit(conn);
            result
        });

        // Teardown runs regardless of the outcome above
        let unbound = registry.unbind(id);
        match bound.take() {
            Some(conn) => self.source.release(conn),
            None => warn!("Connection for context {} was already released", id),
        }

        outcome?;
        unbound?;

        if completion == Completion::Commit && rollback_only {
            warn!("Context {} requested commit but was marked rollback-only", id);
            return Err(DataAccessError::new(
                ErrorKind::UnexpectedRollback,
                operation,
                "an inner unit of work rolled back, the transaction was rolled back",
            ));
        }

        info!("Closed unit of work for context {} with {}", id, effective.operation());
        Ok(())
    }
}

impl fmt::Debug for TransactionCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionCoordinator")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Leave the connection in autocommit mode after a failed `COMMIT`
fn restore_autocommit(conn: &Connection) {
    if !conn.is_autocommit() {
        if let Err(e) = conn.execute_batch("ROLLBACK") {
            warn!("Failed to restore autocommit: {}", e);
        }
    }
}

/// Handle to an open unit of work
///
/// Consumed by [`TransactionCoordinator::commit`] or
/// [`TransactionCoordinator::rollback`]. Dropping an open handle rolls it back.
pub struct UnitOfWork {
    coordinator: TransactionCoordinator,
    context: ContextId,
    depth: u32,
    connection: BoundConnection,
    open: bool,
}

impl UnitOfWork {
    fn new(
        coordinator: TransactionCoordinator,
        context: ContextId,
        depth: u32,
        connection: BoundConnection,
    ) -> Self {
        Self {
            coordinator,
            context,
            depth,
            connection,
            open: true,
        }
    }

    pub fn context(&self) -> ContextId {
        self.context
    }

    /// Nesting level of this handle, 1 for the outermost
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Whether this handle joined an already open unit of work
    pub fn is_joined(&self) -> bool {
        self.depth > 1
    }

    pub fn commit(self) -> Result<()> {
        let coordinator = self.coordinator.clone();
        coordinator.commit(self)
    }

    pub fn rollback(self) -> Result<()> {
        let coordinator = self.coordinator.clone();
        coordinator.rollback(self)
    }

    fn finish(mut self) -> (ContextId, u32, BoundConnection) {
        self.open = false;
        (self.context, self.depth, self.connection.clone())
    }
}

impl Drop for UnitOfWork {
    fn drop(&mut self) {
        if self.open {
            warn!(
                "Unit of work for context {} dropped while open, rolling back",
                self.context
            );
            if let Err(e) = self.coordinator.complete(
                self.context,
                self.depth,
                &self.connection,
                Completion::Rollback,
            ) {
                warn!("Implicit rollback failed: {}", e);
            }
        }
    }
}

impl fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("context", &self.context)
            .field("depth", &self.depth)
            .field("open", &self.open)
            .finish()
    }
}
