//! Member repository
//!
//! Data access for the `member` table. Operations take an
//! [`ExecutionContext`] instead of a connection: inside an open unit of work
//! they run on the connection bound to that context, otherwise each
//! operation leases its own connection and hands it back when done.

use crate::database::datasource::DataSource;
use crate::database::error::{DataAccessError, Result};
use crate::database::tx::ExecutionContext;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

const INSERT_MEMBER: &str = "INSERT INTO member (member_id, money) VALUES (?1, ?2)";
const SELECT_MEMBER: &str = "SELECT member_id, money FROM member WHERE member_id = ?1";
const UPDATE_MEMBER: &str = "UPDATE member SET money = ?1 WHERE member_id = ?2";
const DELETE_MEMBER: &str = "DELETE FROM member WHERE member_id = ?1";

/// A member and its balance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "display", derive(tabled::Tabled))]
pub struct Member {
    pub member_id: String,
    pub money: i64,
}

impl Member {
    pub fn new(member_id: impl Into<String>, money: i64) -> Self {
        Self {
            member_id: member_id.into(),
            money,
        }
    }
}

/// Which balances the repository accepts on write
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BalancePolicy {
    /// Any `i64`, including negative balances
    #[default]
    Unconstrained,
    /// Negative balances are rejected before reaching the database
    NonNegative,
}

impl BalancePolicy {
    fn validate(&self, operation: &str, member_id: &str, money: i64) -> Result<()> {
        match self {
            BalancePolicy::NonNegative if money < 0 => Err(DataAccessError::constraint(
                operation,
                format!("negative balance {} for member {}", money, member_id),
            )),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for BalancePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BalancePolicy::Unconstrained => write!(f, "unconstrained"),
            BalancePolicy::NonNegative => write!(f, "non-negative"),
        }
    }
}

impl FromStr for BalancePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "unconstrained" => Ok(BalancePolicy::Unconstrained),
            "non-negative" => Ok(BalancePolicy::NonNegative),
            _ => Err(format!(
                "Unknown balance policy: {} (expected unconstrained or non-negative)",
                s
            )),
        }
    }
}

/// Repository for member records
#[derive(Clone)]
pub struct MemberRepository {
    source: DataSource,
    policy: BalancePolicy,
}

impl MemberRepository {
    pub fn new(source: DataSource, policy: BalancePolicy) -> Self {
        Self { source, policy }
    }

    pub fn policy(&self) -> BalancePolicy {
        self.policy
    }

    /// Insert a new member
    pub fn create(&self, ctx: &ExecutionContext, member: &Member) -> Result<Member> {
        const OP: &str = "create";
        self.policy.validate(OP, &member.member_id, member.money)?;

        self.run(ctx, OP, |conn| {
            let mut stmt = conn
                .prepare(INSERT_MEMBER)
                .map_err(|e| self.translate(OP, INSERT_MEMBER, e))?;
            stmt.execute(params![member.member_id, member.money])
                .map_err(|e| self.translate(OP, INSERT_MEMBER, e))?;
            drop(stmt);

            debug!("Created member {} with money {}", member.member_id, member.money);
            Ok(member.clone())
        })
    }

    /// Fetch the member with `member_id`
    ///
    /// A missing row is reported as not-found without consulting the
    /// error translator.
    pub fn read_by_key(&self, ctx: &ExecutionContext, member_id: &str) -> Result<Member> {
        const OP: &str = "read_by_key";

        self.run(ctx, OP, |conn| {
            let mut stmt = conn
                .prepare(SELECT_MEMBER)
                .map_err(|e| self.translate(OP, SELECT_MEMBER, e))?;
            let mut rows = stmt
                .query(params![member_id])
                .map_err(|e| self.translate(OP, SELECT_MEMBER, e))?;

            let found = match rows.next().map_err(|e| self.translate(OP, SELECT_MEMBER, e))? {
                Some(row) => Some(Member {
                    member_id: row
                        .get(0)
                        .map_err(|e| self.translate(OP, SELECT_MEMBER, e))?,
                    money: row
                        .get(1)
                        .map_err(|e| self.translate(OP, SELECT_MEMBER, e))?,
                }),
                None => None,
            };
            drop(rows);
            drop(stmt);

            found.ok_or_else(|| {
                debug!("Member {} not found", member_id);
                DataAccessError::not_found(OP, format!("member not found member_id={}", member_id))
                    .with_statement(SELECT_MEMBER)
            })
        })
    }

    /// Set the balance of `member_id`, returning the number of rows changed
    pub fn update_balance(
        &self,
        ctx: &ExecutionContext,
        member_id: &str,
        money: i64,
    ) -> Result<usize> {
        const OP: &str = "update_balance";
        self.policy.validate(OP, member_id, money)?;

        self.run(ctx, OP, |conn| {
            let mut stmt = conn
                .prepare(UPDATE_MEMBER)
                .map_err(|e| self.translate(OP, UPDATE_MEMBER, e))?;
            let affected = stmt
                .execute(params![money, member_id])
                .map_err(|e| self.translate(OP, UPDATE_MEMBER, e))?;
            drop(stmt);

            debug!("Updated member {} to money {}: {} row(s)", member_id, money, affected);
            Ok(affected)
        })
    }

    /// Remove `member_id`, returning the number of rows deleted
    pub fn delete(&self, ctx: &ExecutionContext, member_id: &str) -> Result<usize> {
        const OP: &str = "delete";

        self.run(ctx, OP, |conn| {
            let mut stmt = conn
                .prepare(DELETE_MEMBER)
                .map_err(|e| self.translate(OP, DELETE_MEMBER, e))?;
            let affected = stmt
                .execute(params![member_id])
                .map_err(|e| self.translate(OP, DELETE_MEMBER, e))?;
            drop(stmt);

            debug!("Deleted member {}: {} row(s)", member_id, affected);
            Ok(affected)
        })
    }

    /// Resolve a connection for `operation` and run `f` on it.
    ///
    /// An autonomous lease is dropped, and its connection released, after
    /// `f` has dropped its statement.
    fn run<T>(
        &self,
        ctx: &ExecutionContext,
        operation: &str,
        f: impl FnOnce(&Connection) -> Result<T>,
    ) -> Result<T> {
        ctx.check(operation)?;
        let resolved = self.source.resolve(ctx, operation)?;
        resolved.with(operation, |conn| {
            ctx.check(operation)?;
            f(conn)
        })
    }

    fn translate(&self, operation: &str, statement: &str, error: rusqlite::Error) -> DataAccessError {
        self.source.translator().translate(operation, statement, error)
    }
}

impl fmt::Debug for MemberRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemberRepository")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
