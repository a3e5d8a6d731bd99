//! Ledger contract
//!
//! The conversation engine and the reporting job only see the ledger through
//! [`Ledger`]. [`Database`] implements it by running each SQLite call on the
//! blocking thread pool.

use async_trait::async_trait;
use tracing::error;

use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::{ExpenseRecord, NewExpense, UserIdentity, YearMonth};

/// Append-only store of committed expenses
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Durably append an expense. Returning `Ok` means the record is persisted.
    async fn append(&self, expense: NewExpense) -> Result<ExpenseRecord>;

    async fn query_by_owner_and_month(
        &self,
        owner: &UserIdentity,
        month: YearMonth,
    ) -> Result<Vec<ExpenseRecord>>;

    async fn query_all_by_owner(&self, owner: &UserIdentity) -> Result<Vec<ExpenseRecord>>;

    /// Owners with at least one expense in `month` (for the monthly report run)
    async fn owners_with_expenses(&self, month: YearMonth) -> Result<Vec<UserIdentity>>;
}

#[async_trait]
impl Ledger for Database {
    async fn append(&self, expense: NewExpense) -> Result<ExpenseRecord> {
        let db = self.clone();
        let owner = expense.owner.clone();
        tokio::task::spawn_blocking(move || db.append_expense(&expense))
            .await?
            .map_err(|e| {
                error!(owner = %owner, error = %e, "Ledger append failed");
                Error::Persistence(e.to_string())
            })
    }

    async fn query_by_owner_and_month(
        &self,
        owner: &UserIdentity,
        month: YearMonth,
    ) -> Result<Vec<ExpenseRecord>> {
        let db = self.clone();
        let owner = owner.clone();
        tokio::task::spawn_blocking(move || db.list_expenses_for_month(&owner, month)).await?
    }

    async fn query_all_by_owner(&self, owner: &UserIdentity) -> Result<Vec<ExpenseRecord>> {
        let db = self.clone();
        let owner = owner.clone();
        tokio::task::spawn_blocking(move || db.list_expenses_for_owner(&owner)).await?
    }

    async fn owners_with_expenses(&self, month: YearMonth) -> Result<Vec<UserIdentity>> {
        let db = self.clone();
        tokio::task::spawn_blocking(move || db.owners_with_expenses(month)).await?
    }
}
