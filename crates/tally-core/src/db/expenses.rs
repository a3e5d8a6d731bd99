//! Expense ledger operations
//!
//! The `expenses` table is append-only: rows are inserted by [`Database::append_expense`]
//! and never updated (a trigger rejects UPDATE statements).

use chrono::{NaiveDate, SecondsFormat};
use rusqlite::types::Type;
use rusqlite::params;
use tracing::debug;

use super::{parse_datetime, Database};
use crate::error::Result;
use crate::models::*;

const EXPENSE_COLUMNS: &str = "id, owner, amount_original, currency, rate_class, rate_used,
     converted_amount, merchant, source, receipt_hash, expense_date, confidence, committed_at";

/// Timestamp format used for `committed_at`: fixed width so text order is time order
pub(crate) fn format_timestamp(ts: &chrono::DateTime<chrono::Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

const DATE_FORMAT: &str = "%Y-%m-%d";

impl Database {
    /// Append a committed expense and return it with its generated id.
    ///
    /// The converted amount is computed here from the original amount and
    /// rate; callers cannot supply it. An expense carrying an idempotency key
    /// that is already in the ledger is not inserted again; the stored record
    /// is returned instead.
    pub fn append_expense(&self, expense: &NewExpense) -> Result<ExpenseRecord> {
        let converted_amount = expense.converted_amount();
        let expense_date = expense.effective_date();
        let month = YearMonth::from_date(expense_date);
        let committed_at = format_timestamp(&expense.committed_at);

        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT INTO expenses (owner, amount_original, currency, rate_class, rate_used,
             converted_amount, merchant, month_year, source, receipt_hash, expense_date,
             confidence, idempotency_key, committed_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(idempotency_key) DO NOTHING",
            params![
                expense.owner.as_str(),
                expense.amount_original,
                expense.currency.as_str(),
                expense.rate_class.as_str(),
                expense.rate_used,
                converted_amount,
                expense.merchant,
                month.to_string(),
                expense.source.as_str(),
                expense.receipt_hash,
                expense_date.format(DATE_FORMAT).to_string(),
                expense.confidence.map(|c| c.as_str()),
                expense.idempotency_key,
                committed_at,
            ],
        )?;

        if inserted == 0 {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM expenses WHERE idempotency_key = ?",
                EXPENSE_COLUMNS
            ))?;
            let existing = stmt.query_row(params![expense.idempotency_key], |row| {
                Self::row_to_expense(row)
            })?;
            debug!(
                owner = %existing.owner,
                id = existing.id,
                "Expense already recorded under this idempotency key"
            );
            return Ok(existing);
        }

        Ok(ExpenseRecord {
            id: conn.last_insert_rowid(),
            owner: expense.owner.clone(),
            amount_original: expense.amount_original,
            currency: expense.currency,
            rate_class: expense.rate_class,
            rate_used: expense.rate_used,
            converted_amount,
            merchant: expense.merchant.clone(),
            source: expense.source,
            receipt_hash: expense.receipt_hash.clone(),
            expense_date,
            confidence: expense.confidence,
            // What a later read returns: the stored text has microsecond precision
            committed_at: parse_datetime(&committed_at),
        })
    }

    /// Get an expense by ID
    pub fn get_expense(&self, id: i64) -> Result<Option<ExpenseRecord>> {
        use rusqlite::OptionalExtension;

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM expenses WHERE id = ?",
            EXPENSE_COLUMNS
        ))?;

        let expense = stmt
            .query_row(params![id], |row| Self::row_to_expense(row))
            .optional()?;

        Ok(expense)
    }

    /// Expenses for one owner in one calendar month, oldest first
    pub fn list_expenses_for_month(
        &self,
        owner: &UserIdentity,
        month: YearMonth,
    ) -> Result<Vec<ExpenseRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM expenses WHERE owner = ? AND month_year = ?
             ORDER BY committed_at ASC, id ASC",
            EXPENSE_COLUMNS
        ))?;

        let expenses = stmt
            .query_map(params![owner.as_str(), month.to_string()], |row| {
                Self::row_to_expense(row)
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(expenses)
    }

    /// Every expense for one owner, oldest first
    pub fn list_expenses_for_owner(&self, owner: &UserIdentity) -> Result<Vec<ExpenseRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM expenses WHERE owner = ? ORDER BY committed_at ASC, id ASC",
            EXPENSE_COLUMNS
        ))?;

        let expenses = stmt
            .query_map(params![owner.as_str()], |row| Self::row_to_expense(row))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(expenses)
    }

    /// Every expense in the ledger, optionally restricted to one month
    pub fn list_all_expenses(&self, month: Option<YearMonth>) -> Result<Vec<ExpenseRecord>> {
        let conn = self.conn()?;

        let expenses = match month {
            Some(month) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM expenses WHERE month_year = ?
                     ORDER BY committed_at ASC, id ASC",
                    EXPENSE_COLUMNS
                ))?;
                let rows = stmt
                    .query_map(params![month.to_string()], |row| Self::row_to_expense(row))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                rows
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM expenses ORDER BY committed_at ASC, id ASC",
                    EXPENSE_COLUMNS
                ))?;
                let rows = stmt
                    .query_map([], |row| Self::row_to_expense(row))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                rows
            }
        };

        Ok(expenses)
    }

    /// Owners with at least one expense in the given month
    pub fn owners_with_expenses(&self, month: YearMonth) -> Result<Vec<UserIdentity>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT owner FROM expenses WHERE month_year = ? ORDER BY owner",
        )?;

        let owners = stmt
            .query_map(params![month.to_string()], |row| {
                row.get::<_, String>(0).map(UserIdentity::new)
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(owners)
    }

    /// Count expenses (all owners)
    pub fn count_expenses(&self) -> Result<i64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM expenses", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Helper to convert a row to ExpenseRecord
    fn row_to_expense(row: &rusqlite::Row) -> rusqlite::Result<ExpenseRecord> {
        let owner: String = row.get(1)?;
        let currency_str: String = row.get(3)?;
        let rate_class_str: String = row.get(4)?;
        let source_str: String = row.get(8)?;
        let expense_date_str: String = row.get(10)?;
        let confidence_str: Option<String> = row.get(11)?;
        let committed_at_str: String = row.get(12)?;

        // A rate class outside POS/ATM is blocked by a CHECK constraint; treat one
        // here as corruption rather than guessing
        let rate_class: RateClass = rate_class_str
            .parse()
            .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, e.into()))?;
        let expense_date = NaiveDate::parse_from_str(&expense_date_str, DATE_FORMAT)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(10, Type::Text, Box::new(e)))?;

        Ok(ExpenseRecord {
            id: row.get(0)?,
            owner: UserIdentity::new(owner),
            amount_original: row.get(2)?,
            currency: currency_str.parse().unwrap_or_default(),
            rate_class,
            rate_used: row.get(5)?,
            converted_amount: row.get(6)?,
            merchant: row.get(7)?,
            source: source_str.parse().unwrap_or_default(),
            receipt_hash: row.get(9)?,
            expense_date,
            confidence: confidence_str.and_then(|c| c.parse().ok()),
            committed_at: parse_datetime(&committed_at_str),
        })
    }
}
