//! Rate resolution
//!
//! Maps a rate class to its hardcoded conversion factor (source currency to
//! MWK). Rates are configured once at startup and never change at runtime.

use serde::Serialize;

use crate::error::{Error, Result};
use crate::models::{round_currency, RateClass};

/// Default POS rate (MWK per 1 TRY)
pub const DEFAULT_POS_RATE: f64 = 51.00;

/// Default ATM rate (MWK per 1 TRY)
pub const DEFAULT_ATM_RATE: f64 = 54.00;

/// Currency the converted amounts are expressed in
pub const TARGET_CURRENCY: &str = "MWK";

/// Pure mapping from rate class to conversion factor
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RateResolver {
    pos_rate: f64,
    atm_rate: f64,
}

/// One line of a rate comparison
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Conversion {
    pub rate_class: RateClass,
    pub rate: f64,
    pub converted_amount: f64,
}

impl RateResolver {
    /// Create a resolver, rejecting non-positive or non-finite rates
    pub fn new(pos_rate: f64, atm_rate: f64) -> Result<Self> {
        for (name, rate) in [("POS", pos_rate), ("ATM", atm_rate)] {
            if !rate.is_finite() || rate <= 0.0 {
                return Err(Error::Config(format!(
                    "{} rate must be a positive number, got {}",
                    name, rate
                )));
            }
        }
        Ok(Self { pos_rate, atm_rate })
    }

    pub fn resolve(&self, rate_class: RateClass) -> f64 {
        match rate_class {
            RateClass::Pos => self.pos_rate,
            RateClass::Atm => self.atm_rate,
        }
    }

    /// Resolve by canonical name ("POS" or "ATM").
    ///
    /// Anything else is a contract violation: user input must be parsed into a
    /// [`RateClass`] before it gets here.
    pub fn resolve_named(&self, name: &str) -> Result<f64> {
        match name {
            "POS" => Ok(self.pos_rate),
            "ATM" => Ok(self.atm_rate),
            other => Err(Error::InvalidRateClass(other.to_string())),
        }
    }

    /// Convert an amount with the given class, rounded to 2 decimals
    pub fn convert(&self, amount: f64, rate_class: RateClass) -> Conversion {
        let rate = self.resolve(rate_class);
        Conversion {
            rate_class,
            rate,
            converted_amount: round_currency(amount * rate),
        }
    }

    /// Both conversions, for showing the user before they choose
    pub fn compare(&self, amount: f64) -> [Conversion; 2] {
        RateClass::ALL.map(|class| self.convert(amount, class))
    }
}

impl Default for RateResolver {
    fn default() -> Self {
        Self {
            pos_rate: DEFAULT_POS_RATE,
            atm_rate: DEFAULT_ATM_RATE,
        }
    }
}
