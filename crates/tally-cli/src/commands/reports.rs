//! Report command implementations

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Datelike, Utc};
use tally_core::db::{Database, ExportFilter};
use tally_core::models::{UserIdentity, YearMonth};
use tally_core::reporting::{
    format_converted, format_original, monthly_summary, render_monthly_report,
    render_yearly_report, send_monthly_summaries, yearly_summary,
};
use tally_core::{LogNotifier, Notifier};
use tally_server::WhatsAppClient;

use super::{parse_month, truncate};

pub fn cmd_summary(db: &Database, user: &str, month: Option<&str>) -> Result<()> {
    let month = parse_month(month)?.unwrap_or_else(YearMonth::current);
    let owner = UserIdentity::new(user);

    let records = db.list_expenses_for_month(&owner, month)?;
    let summary = monthly_summary(&owner, month, &records);

    println!("{}", render_monthly_report(&summary));
    Ok(())
}

pub fn cmd_yearly_summary(db: &Database, user: &str, year: i32) -> Result<()> {
    anyhow::ensure!(
        (2000..=Utc::now().year() + 1).contains(&year),
        "Year out of range: {}",
        year
    );
    let owner = UserIdentity::new(user);

    let records = db.list_expenses_for_owner(&owner)?;
    println!("{}", render_yearly_report(&yearly_summary(&owner, year, &records)));
    Ok(())
}

pub fn cmd_expenses(db: &Database, user: &str, month: Option<&str>, json: bool) -> Result<()> {
    let owner = UserIdentity::new(user);
    let records = match parse_month(month)? {
        Some(month) => db.list_expenses_for_month(&owner, month)?,
        None => db.list_expenses_for_owner(&owner)?,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No expenses recorded for {}.", owner);
        return Ok(());
    }

    println!("🧾 Expenses for {} ({} total)", owner, records.len());
    println!();
    println!(
        "{:<6} {:<10} {:<25} {:>14} {:<4} {:>16}",
        "ID", "Date", "Merchant", "Amount", "Rate", "Converted"
    );
    println!("{}", "-".repeat(81));

    for r in &records {
        println!(
            "{:<6} {:<10} {:<25} {:>14} {:<4} {:>16}",
            r.id,
            r.expense_date.to_string(),
            truncate(&r.merchant, 25),
            format_original(r.amount_original, r.currency),
            r.rate_class.as_str(),
            format_converted(r.converted_amount)
        );
    }

    Ok(())
}

/// Export expenses to a CSV file, returning the row count
pub fn cmd_export(
    db: &Database,
    output: &Path,
    user: Option<&str>,
    month: Option<&str>,
) -> Result<usize> {
    let filter = ExportFilter {
        owner: user.map(UserIdentity::new),
        month: parse_month(month)?,
    };

    let file = File::create(output)
        .with_context(|| format!("Failed to create output file: {}", output.display()))?;
    let rows = db.export_expenses_csv(&filter, file)?;

    println!("✅ Exported {} expenses to {}", rows, output.display());
    Ok(rows)
}

/// Delivery channel for the report command: WhatsApp when configured, log otherwise
pub fn report_notifier() -> Arc<dyn Notifier> {
    match WhatsAppClient::from_env() {
        Some(client) => Arc::new(client),
        None => {
            println!("   💡 WhatsApp not configured; reports will only be logged");
            Arc::new(LogNotifier)
        }
    }
}

pub async fn cmd_report(db: &Database, notifier: &dyn Notifier, month: Option<&str>) -> Result<()> {
    let month = parse_month(month)?.unwrap_or_else(|| YearMonth::current().previous());

    println!("📨 Sending {} {} reports...", month.month_name(), month.year());
    let stats = send_monthly_summaries(db, notifier, month).await?;

    println!("   Sent: {}", stats.sent);
    if stats.errors > 0 {
        println!("   ⚠️  Failed: {}", stats.errors);
    }
    Ok(())
}
