//! CSV export of the ledger

use std::io::Write;

use serde::Serialize;

use super::expenses::format_timestamp;
use super::Database;
use crate::error::Result;
use crate::models::{ExpenseRecord, UserIdentity, YearMonth};

/// Which rows to export
#[derive(Debug, Clone, Default)]
pub struct ExportFilter {
    pub owner: Option<UserIdentity>,
    pub month: Option<YearMonth>,
}

/// One CSV row
#[derive(Debug, Serialize)]
struct ExpenseRow<'a> {
    id: i64,
    committed_at: String,
    owner: &'a str,
    merchant: &'a str,
    amount_original: String,
    currency: &'static str,
    rate_class: &'static str,
    rate_used: String,
    converted_amount: String,
    source: &'static str,
    receipt_hash: &'a str,
    expense_date: String,
    confidence: &'static str,
}

impl<'a> From<&'a ExpenseRecord> for ExpenseRow<'a> {
    fn from(e: &'a ExpenseRecord) -> Self {
        Self {
            id: e.id,
            committed_at: format_timestamp(&e.committed_at),
            owner: e.owner.as_str(),
            merchant: &e.merchant,
            amount_original: format!("{:.2}", e.amount_original),
            currency: e.currency.as_str(),
            rate_class: e.rate_class.as_str(),
            rate_used: format!("{:.2}", e.rate_used),
            converted_amount: format!("{:.2}", e.converted_amount),
            source: e.source.as_str(),
            receipt_hash: e.receipt_hash.as_deref().unwrap_or(""),
            expense_date: e.expense_date.to_string(),
            confidence: e.confidence.map(|c| c.as_str()).unwrap_or(""),
        }
    }
}

impl Database {
    /// Expenses matching an export filter, oldest first
    pub fn export_expenses(&self, filter: &ExportFilter) -> Result<Vec<ExpenseRecord>> {
        match (&filter.owner, filter.month) {
            (Some(owner), Some(month)) => self.list_expenses_for_month(owner, month),
            (Some(owner), None) => self.list_expenses_for_owner(owner),
            (None, month) => self.list_all_expenses(month),
        }
    }

    /// Write matching expenses as CSV (with header) and return the row count
    pub fn export_expenses_csv<W: Write>(&self, filter: &ExportFilter, writer: W) -> Result<usize> {
        let expenses = self.export_expenses(filter)?;

        let mut csv = csv::Writer::from_writer(writer);
        if expenses.is_empty() {
            // serde only emits headers alongside the first record
            csv.write_record([
                "id",
                "committed_at",
                "owner",
                "merchant",
                "amount_original",
                "currency",
                "rate_class",
                "rate_used",
                "converted_amount",
                "source",
                "receipt_hash",
                "expense_date",
                "confidence",
            ])?;
        }
        for expense in &expenses {
            csv.serialize(ExpenseRow::from(expense))?;
        }
        csv.flush()?;

        Ok(expenses.len())
    }
}
