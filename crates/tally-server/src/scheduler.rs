//! Background tasks
//!
//! Two independent loops, each holding its own references:
//!
//! - the staleness sweep, every `TALLY_SWEEP_INTERVAL_SECS`, discarding
//!   drafts nobody has touched for `TALLY_STALE_AFTER_MINS`
//! - the monthly report run, on the 1st of each month at `TALLY_REPORT_HOUR`
//!   (UTC, default 9), covering the month that just ended

use std::sync::Arc;

use chrono::Utc;
use tokio::time::interval;
use tracing::{error, info, warn};

use tally_core::models::YearMonth;
use tally_core::reporting::{next_monthly_run, send_monthly_summaries};
use tally_core::{ConversationEngine, Ledger, Notifier};

/// Default hour (UTC) for the monthly report run
pub const DEFAULT_REPORT_HOUR: u32 = 9;

/// Configuration for the monthly report run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportScheduleConfig {
    /// Hour of the 1st of the month (UTC) at which reports go out
    pub hour: u32,
}

impl Default for ReportScheduleConfig {
    fn default() -> Self {
        Self {
            hour: DEFAULT_REPORT_HOUR,
        }
    }
}

impl ReportScheduleConfig {
    /// Parse configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_value(std::env::var("TALLY_REPORT_HOUR").ok().as_deref())
    }

    fn from_value(raw: Option<&str>) -> Self {
        let Some(raw) = raw else {
            return Self::default();
        };
        match raw.trim().parse::<u32>() {
            Ok(hour) if hour < 24 => Self { hour },
            _ => {
                warn!(
                    value = %raw,
                    default = DEFAULT_REPORT_HOUR,
                    "Invalid TALLY_REPORT_HOUR, using default"
                );
                Self::default()
            }
        }
    }
}

/// Start the staleness sweep as a background task
pub fn start_sweep_scheduler(engine: Arc<ConversationEngine>) {
    let every = engine.config().sweep_interval;
    info!(
        interval_secs = every.as_secs(),
        stale_after_mins = engine.config().stale_after.as_secs() / 60,
        "Starting staleness sweep"
    );

    tokio::spawn(async move {
        let mut ticker = interval(every);

        // Skip the first immediate tick
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let swept = engine.sweep_stale().await;
            if swept > 0 {
                info!(swept, "Staleness sweep removed drafts");
            }
        }
    });
}

/// Start the monthly report run as a background task
pub fn start_report_scheduler(
    ledger: Arc<dyn Ledger>,
    notifier: Arc<dyn Notifier>,
    config: ReportScheduleConfig,
) {
    tokio::spawn(async move {
        loop {
            let now = Utc::now();
            let next = next_monthly_run(now, config.hour);
            info!(next_run = %next, "Monthly report run scheduled");

            let wait = (next - now).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;

            let month = YearMonth::from_date(Utc::now().date_naive()).previous();
            match send_monthly_summaries(ledger.as_ref(), notifier.as_ref(), month).await {
                Ok(stats) => info!(
                    month = %stats.month,
                    sent = stats.sent,
                    errors = stats.errors,
                    "Scheduled monthly report run finished"
                ),
                Err(e) => error!(month = %month, error = %e, "Scheduled monthly report run failed"),
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_hour_default() {
        assert_eq!(ReportScheduleConfig::from_value(None).hour, 9);
    }

    #[test]
    fn test_report_hour_parsed() {
        assert_eq!(ReportScheduleConfig::from_value(Some("6")).hour, 6);
        assert_eq!(ReportScheduleConfig::from_value(Some(" 23 ")).hour, 23);
    }

    #[test]
    fn test_report_hour_invalid_falls_back() {
        assert_eq!(ReportScheduleConfig::from_value(Some("24")).hour, 9);
        assert_eq!(ReportScheduleConfig::from_value(Some("nine")).hour, 9);
    }
}
