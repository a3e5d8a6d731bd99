//! Reporting read-path
//!
//! Summaries are derived from ledger records on demand and never stored.
//! The monthly report run reads the ledger only; it never touches sessions.

use std::collections::HashMap;

use chrono::{DateTime, Datelike, Duration, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::delivery::Notifier;
use crate::error::Result;
use crate::ledger::Ledger;
use crate::models::*;
use crate::rates::TARGET_CURRENCY;

/// Merchants listed in a monthly report
const MONTHLY_TOP_MERCHANTS: usize = 3;

/// Merchants listed in a yearly summary
const YEARLY_TOP_MERCHANTS: usize = 5;

/// Format a converted amount, e.g. `12750.00 MWK`
pub fn format_converted(amount: f64) -> String {
    format!("{:.2} {}", amount, TARGET_CURRENCY)
}

/// Format an original amount with its currency symbol, e.g. `₺250.00`
pub fn format_original(amount: f64, currency: Currency) -> String {
    match currency {
        Currency::Mwk => format_converted(amount),
        other => format!("{}{:.2}", other.symbol(), amount),
    }
}

fn merchant_totals(records: &[&ExpenseRecord]) -> Vec<MerchantTotal> {
    let mut totals: HashMap<&str, (f64, i64)> = HashMap::new();
    for r in records {
        let merchant = if r.merchant.trim().is_empty() {
            UNKNOWN_MERCHANT
        } else {
            r.merchant.as_str()
        };
        let entry = totals.entry(merchant).or_default();
        entry.0 += r.converted_amount;
        entry.1 += 1;
    }

    let mut merchants: Vec<MerchantTotal> = totals
        .into_iter()
        .map(|(merchant, (total, count))| MerchantTotal {
            merchant: merchant.to_string(),
            total_converted: round_currency(total),
            count,
        })
        .collect();
    // Ties broken by name so output is stable
    merchants.sort_by(|a, b| {
        b.total_converted
            .total_cmp(&a.total_converted)
            .then_with(|| a.merchant.cmp(&b.merchant))
    });
    merchants
}

fn rate_class_totals(records: &[&ExpenseRecord]) -> Vec<RateClassTotal> {
    RateClass::ALL
        .iter()
        .map(|class| {
            let matching = records.iter().filter(|r| r.rate_class == *class);
            let (total, count) =
                matching.fold((0.0, 0), |(t, c), r| (t + r.converted_amount, c + 1));
            RateClassTotal {
                rate_class: *class,
                total_converted: round_currency(total),
                count,
            }
        })
        .collect()
}

fn uniform_currency(records: &[&ExpenseRecord]) -> Option<Currency> {
    let first = records.first()?.currency;
    records
        .iter()
        .all(|r| r.currency == first)
        .then_some(first)
}

/// Summarize one owner's records for one month.
///
/// Records belonging to other owners or months are ignored.
pub fn monthly_summary(
    owner: &UserIdentity,
    month: YearMonth,
    records: &[ExpenseRecord],
) -> MonthlySummary {
    let records: Vec<&ExpenseRecord> = records
        .iter()
        .filter(|r| &r.owner == owner && r.month() == month)
        .collect();

    let count = records.len() as i64;
    let total_converted = round_currency(records.iter().map(|r| r.converted_amount).sum());
    let total_original = round_currency(records.iter().map(|r| r.amount_original).sum());
    let average_converted = if count > 0 {
        round_currency(total_converted / count as f64)
    } else {
        0.0
    };

    let mut by_day: HashMap<u32, f64> = HashMap::new();
    for r in &records {
        *by_day.entry(r.expense_date.day()).or_default() += r.converted_amount;
    }
    let highest_day = by_day
        .into_iter()
        .max_by(|a, b| a.1.total_cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
        .map(|(day, total)| DaySpend {
            day,
            total_converted: round_currency(total),
        });

    MonthlySummary {
        owner: owner.clone(),
        month,
        total_converted,
        total_original,
        original_currency: uniform_currency(&records),
        count,
        average_converted,
        by_merchant: merchant_totals(&records),
        by_rate_class: rate_class_totals(&records),
        highest_day,
    }
}

/// Summarize one owner's records for a calendar year
pub fn yearly_summary(owner: &UserIdentity, year: i32, records: &[ExpenseRecord]) -> YearlySummary {
    let records: Vec<&ExpenseRecord> = records
        .iter()
        .filter(|r| &r.owner == owner && r.expense_date.year() == year)
        .collect();

    let months = (1..=12)
        .filter_map(|m| YearMonth::new(year, m).ok())
        .map(|month| {
            let in_month = records.iter().filter(|r| r.month() == month);
            let (total, count) =
                in_month.fold((0.0, 0), |(t, c), r| (t + r.converted_amount, c + 1));
            MonthTotal {
                month,
                total_converted: round_currency(total),
                count,
            }
        })
        .collect();

    let mut top_merchants = merchant_totals(&records);
    top_merchants.truncate(YEARLY_TOP_MERCHANTS);

    YearlySummary {
        owner: owner.clone(),
        year,
        total_converted: round_currency(records.iter().map(|r| r.converted_amount).sum()),
        total_original: round_currency(records.iter().map(|r| r.amount_original).sum()),
        count: records.len() as i64,
        months,
        top_merchants,
        by_rate_class: rate_class_totals(&records),
    }
}

/// Full monthly report text, as delivered on the 1st of the month
pub fn render_monthly_report(summary: &MonthlySummary) -> String {
    let title = format!(
        "📊 {} {} Monthly Report",
        summary.month.month_name(),
        summary.month.year()
    );
    if summary.is_empty() {
        return format!("{}\n\nNo expenses recorded this month.", title);
    }

    let mut report = format!("{}\n\n💰 TOTALS\n", title);
    if let Some(currency) = summary.original_currency {
        report.push_str(&format!(
            "- Spent: {}\n",
            format_original(summary.total_original, currency)
        ));
    }
    report.push_str(&format!(
        "- Converted: {}\n- Transactions: {}\n- Average per transaction: {}\n",
        format_converted(summary.total_converted),
        summary.count,
        format_converted(summary.average_converted)
    ));

    report.push_str("\n🏪 TOP MERCHANTS\n");
    for (i, m) in summary
        .by_merchant
        .iter()
        .take(MONTHLY_TOP_MERCHANTS)
        .enumerate()
    {
        report.push_str(&format!(
            "{}. {}: {}\n",
            i + 1,
            m.merchant,
            format_converted(m.total_converted)
        ));
    }

    report.push_str("\n💳 PAYMENT METHODS\n");
    for r in &summary.by_rate_class {
        report.push_str(&format!(
            "- {}: {} ({} transactions)\n",
            r.rate_class,
            format_converted(r.total_converted),
            r.count
        ));
    }

    if let Some(day) = &summary.highest_day {
        report.push_str(&format!(
            "\n📈 Highest spending day: {} {} ({})",
            day.day,
            summary.month.month_name(),
            format_converted(day.total_converted)
        ));
    }

    report.trim_end().to_string()
}

/// Yearly summary text
pub fn render_yearly_report(summary: &YearlySummary) -> String {
    let mut report = format!("📅 {} Yearly Summary\n\n", summary.year);
    report.push_str(&format!(
        "Total: {} over {} transactions\n",
        format_converted(summary.total_converted),
        summary.count
    ));

    let active: Vec<&MonthTotal> = summary.months.iter().filter(|m| m.count > 0).collect();
    if !active.is_empty() {
        report.push_str("\nBy month:\n");
        for m in active {
            report.push_str(&format!(
                "- {}: {} ({})\n",
                m.month.month_name(),
                format_converted(m.total_converted),
                m.count
            ));
        }
    }

    if !summary.top_merchants.is_empty() {
        report.push_str("\nTop merchants:\n");
        for (i, m) in summary.top_merchants.iter().enumerate() {
            report.push_str(&format!(
                "{}. {}: {}\n",
                i + 1,
                m.merchant,
                format_converted(m.total_converted)
            ));
        }
    }

    report.trim_end().to_string()
}

/// Outcome of one monthly report run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRunStats {
    pub month: YearMonth,
    pub sent: usize,
    pub errors: usize,
}

/// Send the monthly report for `month` to every owner with expenses in it.
///
/// A failure for one owner (query or delivery) is counted and logged; it
/// does not stop the run.
pub async fn send_monthly_summaries(
    ledger: &dyn Ledger,
    notifier: &dyn Notifier,
    month: YearMonth,
) -> Result<ReportRunStats> {
    let owners = ledger.owners_with_expenses(month).await?;
    info!(month = %month, owners = owners.len(), "Sending monthly summaries");

    let mut stats = ReportRunStats {
        month,
        sent: 0,
        errors: 0,
    };

    for owner in owners {
        let records = match ledger.query_by_owner_and_month(&owner, month).await {
            Ok(records) => records,
            Err(e) => {
                warn!(owner = %owner, error = %e, "Failed to load expenses for monthly report");
                stats.errors += 1;
                continue;
            }
        };

        let summary = monthly_summary(&owner, month, &records);
        match notifier.send(&owner, &render_monthly_report(&summary)).await {
            Ok(()) => stats.sent += 1,
            Err(e) => {
                warn!(owner = %owner, error = %e, "Failed to deliver monthly report");
                stats.errors += 1;
            }
        }
    }

    info!(
        month = %month,
        sent = stats.sent,
        errors = stats.errors,
        "Monthly summaries complete"
    );
    Ok(stats)
}

fn run_time(month: YearMonth, hour: u32) -> Option<DateTime<Utc>> {
    month
        .first_day()?
        .and_hms_opt(hour.min(23), 0, 0)
        .map(|dt| dt.and_utc())
}

/// Next time the monthly run is due: the 1st of a month at `hour`:00 UTC,
/// strictly after `now`
pub fn next_monthly_run(now: DateTime<Utc>, hour: u32) -> DateTime<Utc> {
    let month = YearMonth::from_date(now.date_naive());
    match run_time(month, hour) {
        Some(t) if t > now => t,
        _ => run_time(month.next(), hour).unwrap_or(now + Duration::days(1)),
    }
}
