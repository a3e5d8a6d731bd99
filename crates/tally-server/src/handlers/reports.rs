//! Read-only report handlers, plus a manual trigger for the monthly run

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use tracing::info;

use crate::{AppError, AppState};
use tally_core::models::{ExpenseRecord, MonthlySummary, UserIdentity, YearMonth, YearlySummary};
use tally_core::reporting::{monthly_summary, send_monthly_summaries, yearly_summary};
use tally_core::ReportRunStats;

/// Query parameters selecting a calendar month
#[derive(Debug, Deserialize)]
pub struct MonthQuery {
    /// Month as YYYY-MM
    pub month: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct YearQuery {
    pub year: Option<i32>,
}

fn parse_month(raw: Option<&str>) -> Result<Option<YearMonth>, AppError> {
    raw.map(|s| s.parse::<YearMonth>())
        .transpose()
        .map_err(|_| AppError::bad_request("Invalid month format (use YYYY-MM)"))
}

/// GET /api/users/:owner/summary - Monthly summary (default: current month)
pub async fn get_user_summary(
    State(state): State<Arc<AppState>>,
    Path(owner): Path<String>,
    Query(params): Query<MonthQuery>,
) -> Result<Json<MonthlySummary>, AppError> {
    let month = parse_month(params.month.as_deref())?.unwrap_or_else(YearMonth::current);
    let owner = UserIdentity::new(owner);

    let records = state.db.list_expenses_for_month(&owner, month)?;
    Ok(Json(monthly_summary(&owner, month, &records)))
}

/// GET /api/users/:owner/yearly - Yearly summary (default: current year)
pub async fn get_user_yearly(
    State(state): State<Arc<AppState>>,
    Path(owner): Path<String>,
    Query(params): Query<YearQuery>,
) -> Result<Json<YearlySummary>, AppError> {
    let year = params.year.unwrap_or_else(|| YearMonth::current().year());
    let owner = UserIdentity::new(owner);

    let records = state.db.list_expenses_for_owner(&owner)?;
    Ok(Json(yearly_summary(&owner, year, &records)))
}

/// GET /api/users/:owner/expenses - Committed expenses, optionally for one month
pub async fn list_user_expenses(
    State(state): State<Arc<AppState>>,
    Path(owner): Path<String>,
    Query(params): Query<MonthQuery>,
) -> Result<Json<Vec<ExpenseRecord>>, AppError> {
    let owner = UserIdentity::new(owner);

    let records = match parse_month(params.month.as_deref())? {
        Some(month) => state.db.list_expenses_for_month(&owner, month)?,
        None => state.db.list_expenses_for_owner(&owner)?,
    };
    Ok(Json(records))
}

/// POST /api/reports/monthly - Send monthly reports now (default: previous month)
pub async fn run_monthly_report(
    State(state): State<Arc<AppState>>,
    Query(params): Query<MonthQuery>,
) -> Result<Json<ReportRunStats>, AppError> {
    let month =
        parse_month(params.month.as_deref())?.unwrap_or_else(|| YearMonth::current().previous());

    info!(month = %month, "Manual monthly report run requested");
    let stats = send_monthly_summaries(&state.db, state.notifier.as_ref(), month).await?;
    Ok(Json(stats))
}
