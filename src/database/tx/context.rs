//! Execution context tokens
//!
//! An [`ExecutionContext`] identifies one logical caller. It is threaded
//! explicitly through coordinator and repository calls and is the key the
//! registry binds connections to, so two callers never share a binding
//! regardless of which thread or task they run on.

use crate::database::error::{DataAccessError, Result};
use std::fmt;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Identifier of an execution context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(Uuid);

impl ContextId {
    fn generate() -> Self {
        ContextId(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Token for the current logical caller
///
/// Not `Clone`: handing a copy to another caller would let it observe this
/// caller's bound connection. Share the [`CancellationToken`] instead.
#[derive(Debug)]
pub struct ExecutionContext {
    id: ContextId,
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self {
            id: ContextId::generate(),
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Context that is considered cancelled once `timeout` has elapsed.
    ///
    /// A timeout too large to represent means no deadline.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now().checked_add(timeout),
            ..Self::new()
        }
    }

    /// Context driven by an externally owned cancellation token
    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            ..Self::new()
        }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    /// A handle that can cancel this context from elsewhere
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, `None` when there is no deadline
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Fail with [`ErrorKind::Cancelled`](crate::database::error::ErrorKind::Cancelled)
    /// if the context is no longer live
    pub fn check(&self, operation: &str) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(DataAccessError::cancelled(
                operation,
                format!("context {} was cancelled", self.id),
            ));
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(DataAccessError::cancelled(
                operation,
                format!("context {} passed its deadline", self.id),
            ));
        }
        Ok(())
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}
