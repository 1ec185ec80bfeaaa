//! Transaction scoping
//!
//! - `context`: the explicit token identifying one logical flow of work
//! - `registry`: context to bound-connection map
//! - `coordinator`: begin / commit / rollback of units of work

mod context;
mod coordinator;
mod registry;

pub use context::{ContextId, ExecutionContext};
pub use coordinator::{
    BeginBehavior, CoordinatorSettings, NestingPolicy, TransactionCoordinator, UnitOfWork,
};
pub use registry::{BoundConnection, BoundEntry, TransactionRegistry};
