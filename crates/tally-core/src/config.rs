//! Runtime configuration
//!
//! Everything is read from environment variables with conservative defaults:
//!
//! - `TALLY_POS_RATE` / `TALLY_ATM_RATE`: conversion factors (default 51.00 / 54.00)
//! - `TALLY_DEFAULT_CURRENCY`: assumed source currency (default TRY)
//! - `TALLY_EXTRACTION_TIMEOUT_SECS`: OCR + field extraction budget (default 60)
//! - `TALLY_LEDGER_TIMEOUT_SECS`: ledger append budget (default 5)
//! - `TALLY_STALE_AFTER_MINS`: inactivity before a draft is discarded (default 30)
//! - `TALLY_SWEEP_INTERVAL_SECS`: how often the staleness sweep runs (default 60)
//! - `TALLY_NOTIFY_ON_EXPIRY`: tell the user when a draft expires (default true)

use std::time::Duration;

use tracing::warn;

use crate::error::{Error, Result};
use crate::models::Currency;
use crate::rates::{RateResolver, DEFAULT_ATM_RATE, DEFAULT_POS_RATE};

/// Conversation engine settings
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub rates: RateResolver,
    pub default_currency: Currency,
    pub extraction_timeout: Duration,
    pub ledger_timeout: Duration,
    /// Drafts with no activity for this long are swept
    pub stale_after: Duration,
    pub sweep_interval: Duration,
    pub notify_on_expiry: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rates: RateResolver::default(),
            default_currency: Currency::Try,
            extraction_timeout: Duration::from_secs(60),
            ledger_timeout: Duration::from_secs(5),
            stale_after: Duration::from_secs(30 * 60),
            sweep_interval: Duration::from_secs(60),
            notify_on_expiry: true,
        }
    }
}

impl EngineConfig {
    /// Build from environment variables, falling back to defaults
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let pos_rate = env_parse("TALLY_POS_RATE", DEFAULT_POS_RATE);
        let atm_rate = env_parse("TALLY_ATM_RATE", DEFAULT_ATM_RATE);
        let rates = RateResolver::new(pos_rate, atm_rate)?;

        let default_currency = match std::env::var("TALLY_DEFAULT_CURRENCY") {
            Ok(raw) => raw
                .parse::<Currency>()
                .map_err(|e| Error::Config(format!("TALLY_DEFAULT_CURRENCY: {}", e)))?,
            Err(_) => defaults.default_currency,
        };

        Ok(Self {
            rates,
            default_currency,
            extraction_timeout: Duration::from_secs(env_parse(
                "TALLY_EXTRACTION_TIMEOUT_SECS",
                defaults.extraction_timeout.as_secs(),
            )),
            ledger_timeout: Duration::from_secs(env_parse(
                "TALLY_LEDGER_TIMEOUT_SECS",
                defaults.ledger_timeout.as_secs(),
            )),
            stale_after: Duration::from_secs(
                env_parse("TALLY_STALE_AFTER_MINS", defaults.stale_after.as_secs() / 60) * 60,
            ),
            sweep_interval: Duration::from_secs(env_parse(
                "TALLY_SWEEP_INTERVAL_SECS",
                defaults.sweep_interval.as_secs(),
            )),
            notify_on_expiry: env_parse("TALLY_NOTIFY_ON_EXPIRY", defaults.notify_on_expiry),
        })
    }

    /// Staleness window as a chrono duration (for timestamp arithmetic)
    pub fn stale_after_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.stale_after).unwrap_or_else(|_| chrono::Duration::minutes(30))
    }
}

/// Parse an environment variable, warning and using `default` when it is
/// missing or malformed
pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!(key, value = %raw, default = %default, "Invalid value, using default");
                default
            }
        },
        Err(_) => default,
    }
}
