//! Service layer
//!
//! Business operations built on top of the database layer. Services open
//! units of work through the [`TransactionCoordinator`](crate::database::TransactionCoordinator)
//! and let the repositories discover the bound connection.
//!
//! | Module | Provides |
//! |--------|----------|
//! | `transfer` | `TransferService`, money transfer between members |
//! | `utils` | `OutputFormat` used by the CLI |

pub mod transfer;
pub mod utils;

pub use transfer::{TransferReceipt, TransferService, FAULT_MEMBER_ID};
pub use utils::OutputFormat;
