//! Money transfer between two members
//!
//! The whole transfer runs as one unit of work. The repositories find the
//! bound connection through the execution context, so nothing here passes
//! a connection around.
//!
//! # Example
//!
//! ```rust,ignore
//! let transfers = db.transfers();
//! let ctx = ExecutionContext::new();
//! let receipt = transfers.transfer(&ctx, "memberA", "memberB", 2000)?;
//! println!("{} -> {}", receipt.from.money, receipt.to.money);
//! ```

use crate::database::{
    DataAccessError, ErrorKind, ExecutionContext, Member, MemberRepository, Result,
    TransactionCoordinator,
};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Member id whose transfers always fail after the debit has been written
pub const FAULT_MEMBER_ID: &str = "ex";

/// Balances of both members after a committed transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub from: Member,
    pub to: Member,
    pub amount: i64,
}

#[derive(Debug, Clone)]
pub struct TransferService {
    members: MemberRepository,
    coordinator: TransactionCoordinator,
}

impl TransferService {
    pub fn new(members: MemberRepository, coordinator: TransactionCoordinator) -> Self {
        Self {
            members,
            coordinator,
        }
    }

    /// Move `amount` from `from_id` to `to_id`, all or nothing
    pub fn transfer(
        &self,
        ctx: &ExecutionContext,
        from_id: &str,
        to_id: &str,
        amount: i64,
    ) -> Result<TransferReceipt> {
        const OP: &str = "transfer";

        if amount < 0 {
            return Err(DataAccessError::constraint(
                OP,
                format!("transfer amount must not be negative: {}", amount),
            ));
        }
        if from_id == to_id {
            return Err(DataAccessError::constraint(
                OP,
                format!("cannot transfer from {} to itself", from_id),
            ));
        }

        let receipt = self.coordinator.execute(ctx, |_uow| -> Result<TransferReceipt> {
            let from = self.members.read_by_key(ctx, from_id)?;
            let to = self.members.read_by_key(ctx, to_id)?;

            let debited = from.money.checked_sub(amount).ok_or_else(|| {
                DataAccessError::new(
                    ErrorKind::DataIntegrity,
                    OP,
                    format!("balance of {} would overflow", from_id),
                )
            })?;
            self.members.update_balance(ctx, from_id, debited)?;

            validate(&to)?;

            let credited = to.money.checked_add(amount).ok_or_else(|| {
                DataAccessError::new(
                    ErrorKind::DataIntegrity,
                    OP,
                    format!("balance of {} would overflow", to_id),
                )
            })?;
            self.members.update_balance(ctx, to_id, credited)?;

            Ok(TransferReceipt {
                from: Member::new(from.member_id, debited),
                to: Member::new(to.member_id, credited),
                amount,
            })
        })?;

        info!("Transferred {} from {} to {}", amount, from_id, to_id);
        Ok(receipt)
    }
}

fn validate(to: &Member) -> Result<()> {
    if to.member_id == FAULT_MEMBER_ID {
        return Err(DataAccessError::new(
            ErrorKind::DataIntegrity,
            "transfer",
            format!("exception during transfer to {}", to.member_id),
        ));
    }
    Ok(())
}
