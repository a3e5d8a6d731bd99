//! Domain models for Tally

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Round a monetary amount to 2 decimal places (half away from zero)
pub fn round_currency(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

/// Stable key identifying a conversation participant (e.g. a phone number)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserIdentity(String);

impl UserIdentity {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserIdentity {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Which conversion factor applies to a purchase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RateClass {
    /// Card payment at a point of sale
    Pos,
    /// Cash withdrawn at an ATM
    Atm,
}

impl RateClass {
    pub const ALL: [RateClass; 2] = [RateClass::Pos, RateClass::Atm];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pos => "POS",
            Self::Atm => "ATM",
        }
    }
}

impl std::str::FromStr for RateClass {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pos" | "1" | "pos_rate" | "card" => Ok(Self::Pos),
            "atm" | "2" | "atm_rate" | "cash" => Ok(Self::Atm),
            _ => Err(format!("Unknown rate class: {}", s)),
        }
    }
}

impl std::fmt::Display for RateClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Source currencies the bot accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    /// Turkish Lira
    #[default]
    Try,
    Usd,
    Eur,
    Gbp,
    /// Malawi Kwacha
    Mwk,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Try => "TRY",
            Self::Usd => "USD",
            Self::Eur => "EUR",
            Self::Gbp => "GBP",
            Self::Mwk => "MWK",
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Try => "₺",
            Self::Usd => "$",
            Self::Eur => "€",
            Self::Gbp => "£",
            Self::Mwk => "MK",
        }
    }

    /// Resolve a free-form currency hint against the accepted set.
    ///
    /// Missing hints resolve silently to `default`. Unrecognized hints also
    /// resolve to `default`, but the returned resolution records what was
    /// replaced so the caller can surface it.
    pub fn resolve(hint: Option<&str>, default: Currency) -> CurrencyResolution {
        match hint.map(str::trim).filter(|h| !h.is_empty()) {
            None => CurrencyResolution {
                currency: default,
                unrecognized: None,
            },
            Some(h) => match h.parse::<Currency>() {
                Ok(currency) => CurrencyResolution {
                    currency,
                    unrecognized: None,
                },
                Err(_) => {
                    tracing::warn!(hint = %h, fallback = %default, "Unrecognized currency, using default");
                    CurrencyResolution {
                        currency: default,
                        unrecognized: Some(h.to_string()),
                    }
                }
            },
        }
    }
}

impl std::str::FromStr for Currency {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "try" | "tl" | "₺" | "lira" | "ytl" => Ok(Self::Try),
            "usd" | "$" | "us$" | "dollar" => Ok(Self::Usd),
            "eur" | "€" | "euro" => Ok(Self::Eur),
            "gbp" | "£" | "pound" => Ok(Self::Gbp),
            "mwk" | "mk" | "kwacha" => Ok(Self::Mwk),
            _ => Err(format!("Unknown currency: {}", s)),
        }
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of [`Currency::resolve`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrencyResolution {
    pub currency: Currency,
    /// The raw hint that was replaced by the default, if any
    pub unrecognized: Option<String>,
}

/// How an expense entered the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExpenseSource {
    /// Extracted from a receipt photo
    #[default]
    Receipt,
    /// Typed in through the manual-entry flow
    Manual,
}

impl ExpenseSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Receipt => "receipt",
            Self::Manual => "manual",
        }
    }
}

impl std::str::FromStr for ExpenseSource {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "receipt" => Ok(Self::Receipt),
            "manual" => Ok(Self::Manual),
            _ => Err(format!("Unknown expense source: {}", s)),
        }
    }
}

impl std::fmt::Display for ExpenseSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Conversation stage of a pending transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    AwaitingImageOrCommand,
    AwaitingConfirmation,
    AwaitingRateChoice,
    AwaitingManualAmount,
    AwaitingManualMerchant,
    AwaitingManualRateChoice,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AwaitingImageOrCommand => "awaiting_image_or_command",
            Self::AwaitingConfirmation => "awaiting_confirmation",
            Self::AwaitingRateChoice => "awaiting_rate_choice",
            Self::AwaitingManualAmount => "awaiting_manual_amount",
            Self::AwaitingManualMerchant => "awaiting_manual_merchant",
            Self::AwaitingManualRateChoice => "awaiting_manual_rate_choice",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How sure the extraction model was about its reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }

    /// Bucket a 0..=1 score
    pub fn from_score(score: f64) -> Option<Self> {
        if !(0.0..=1.0).contains(&score) {
            return None;
        }
        Some(if score >= 0.8 {
            Self::High
        } else if score >= 0.5 {
            Self::Medium
        } else {
            Self::Low
        })
    }
}

impl std::str::FromStr for Confidence {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            other => other
                .parse::<f64>()
                .ok()
                .and_then(Self::from_score)
                .ok_or_else(|| format!("Unknown confidence: {}", s)),
        }
    }
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Oldest receipt date accepted, relative to the day it is photographed
const MAX_RECEIPT_AGE_DAYS: i64 = 365;

/// Whether a printed receipt date can be the purchase date. Dates after
/// `today` (allowing one day of timezone skew) or more than a year old are
/// misreads.
pub fn plausible_receipt_date(date: NaiveDate, today: NaiveDate) -> bool {
    date <= today + Duration::days(1) && today - date <= Duration::days(MAX_RECEIPT_AGE_DAYS)
}

/// Best-effort structured guess produced by the extraction pipeline
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedFields {
    pub amount: Option<f64>,
    pub merchant: Option<String>,
    pub currency_hint: Option<String>,
    /// Purchase date printed on the receipt
    #[serde(default)]
    pub receipt_date: Option<NaiveDate>,
    #[serde(default)]
    pub confidence: Option<Confidence>,
}

impl ExtractedFields {
    /// Drop values that cannot be used (non-positive amounts, blank strings)
    /// and round the amount to cents, so the user confirms what gets recorded
    pub fn sanitized(self) -> Self {
        Self {
            amount: self
                .amount
                .filter(|a| a.is_finite() && *a > 0.0)
                .map(round_currency)
                .filter(|a| *a > 0.0),
            merchant: self
                .merchant
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty()),
            currency_hint: self
                .currency_hint
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty()),
            receipt_date: self.receipt_date,
            confidence: self.confidence,
        }
    }

    /// True when the model could read neither amount, merchant nor currency
    pub fn is_empty(&self) -> bool {
        self.amount.is_none() && self.merchant.is_none() && self.currency_hint.is_none()
    }
}

/// The in-progress draft for one user
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingTransaction {
    /// Idempotency key carried into the ledger append
    pub draft_id: String,
    pub owner: UserIdentity,
    pub stage: Stage,
    pub extracted_amount: Option<f64>,
    pub extracted_merchant: Option<String>,
    pub extracted_currency_hint: Option<String>,
    /// Purchase date read from the receipt, if plausible
    pub receipt_date: Option<NaiveDate>,
    pub confidence: Option<Confidence>,
    pub source: ExpenseSource,
    /// SHA-256 of the receipt image, for receipt drafts
    pub receipt_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Time of the last event that touched this draft
    pub updated_at: DateTime<Utc>,
    /// Consecutive failed ledger appends for this draft
    pub commit_failures: u32,
}

impl PendingTransaction {
    /// Draft created from a receipt photo, awaiting confirmation
    pub fn from_receipt(
        owner: UserIdentity,
        fields: ExtractedFields,
        receipt_hash: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let fields = fields.sanitized();
        let today = now.date_naive();
        let receipt_date = fields.receipt_date.filter(|date| {
            let plausible = plausible_receipt_date(*date, today);
            if !plausible {
                tracing::warn!(owner = %owner, date = %date, "Ignoring implausible receipt date");
            }
            plausible
        });
        Self {
            draft_id: new_draft_id(),
            owner,
            stage: Stage::AwaitingConfirmation,
            extracted_amount: fields.amount,
            extracted_merchant: fields.merchant,
            extracted_currency_hint: fields.currency_hint,
            receipt_date,
            confidence: fields.confidence,
            source: ExpenseSource::Receipt,
            receipt_hash,
            created_at: now,
            updated_at: now,
            commit_failures: 0,
        }
    }

    /// Empty draft for the manual-entry flow
    pub fn manual(owner: UserIdentity, now: DateTime<Utc>) -> Self {
        Self {
            draft_id: new_draft_id(),
            owner,
            stage: Stage::AwaitingManualAmount,
            extracted_amount: None,
            extracted_merchant: None,
            extracted_currency_hint: None,
            receipt_date: None,
            confidence: None,
            source: ExpenseSource::Manual,
            receipt_hash: None,
            created_at: now,
            updated_at: now,
            commit_failures: 0,
        }
    }

    /// Move to a new stage and record activity
    pub fn advance(&mut self, stage: Stage, now: DateTime<Utc>) {
        self.stage = stage;
        self.updated_at = now;
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }

    /// True once no event has touched the draft for longer than `max_age`
    pub fn is_stale(&self, max_age: Duration, now: DateTime<Utc>) -> bool {
        now - self.updated_at > max_age
    }

    /// Names of the fields the user still has to supply
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.extracted_amount.is_none() {
            missing.push("amount");
        }
        if self.extracted_merchant.is_none() {
            missing.push("merchant");
        }
        missing
    }

    pub fn merchant_or_unknown(&self) -> &str {
        self.extracted_merchant.as_deref().unwrap_or(UNKNOWN_MERCHANT)
    }
}

fn new_draft_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Merchant name used when none was extracted or typed
pub const UNKNOWN_MERCHANT: &str = "unknown";

/// An expense ready to be appended to the ledger
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewExpense {
    pub owner: UserIdentity,
    pub amount_original: f64,
    pub currency: Currency,
    pub rate_class: RateClass,
    pub rate_used: f64,
    pub merchant: String,
    pub source: ExpenseSource,
    pub receipt_hash: Option<String>,
    /// Purchase date; the commit date when `None`
    pub expense_date: Option<NaiveDate>,
    pub confidence: Option<Confidence>,
    /// Appends sharing a key record one expense
    pub idempotency_key: Option<String>,
    pub committed_at: DateTime<Utc>,
}

impl NewExpense {
    /// Build a ledger entry from a draft that has passed amount validation
    pub fn from_pending(
        pending: &PendingTransaction,
        currency: Currency,
        rate_class: RateClass,
        rate_used: f64,
        committed_at: DateTime<Utc>,
    ) -> Result<Self> {
        let amount = pending
            .extracted_amount
            .filter(|a| a.is_finite() && *a > 0.0)
            .ok_or_else(|| {
                Error::InvalidData(format!(
                    "Pending transaction for {} has no positive amount",
                    pending.owner
                ))
            })?;

        Ok(Self {
            owner: pending.owner.clone(),
            amount_original: round_currency(amount),
            currency,
            rate_class,
            rate_used,
            merchant: pending.merchant_or_unknown().to_string(),
            source: pending.source,
            receipt_hash: pending.receipt_hash.clone(),
            expense_date: pending.receipt_date,
            confidence: pending.confidence,
            idempotency_key: Some(pending.draft_id.clone()),
            committed_at,
        })
    }

    /// Converted amount, always derived from the original amount and rate
    pub fn converted_amount(&self) -> f64 {
        round_currency(self.amount_original * self.rate_used)
    }

    /// Date the expense is filed under
    pub fn effective_date(&self) -> NaiveDate {
        self.expense_date
            .unwrap_or_else(|| self.committed_at.date_naive())
    }
}

/// A committed, immutable expense
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpenseRecord {
    pub id: i64,
    pub owner: UserIdentity,
    pub amount_original: f64,
    pub currency: Currency,
    pub rate_class: RateClass,
    pub rate_used: f64,
    pub converted_amount: f64,
    pub merchant: String,
    pub source: ExpenseSource,
    pub receipt_hash: Option<String>,
    /// Purchase date; determines the month the expense counts toward
    pub expense_date: NaiveDate,
    pub confidence: Option<Confidence>,
    pub committed_at: DateTime<Utc>,
}

impl ExpenseRecord {
    pub fn month(&self) -> YearMonth {
        YearMonth::from_date(self.expense_date)
    }
}

/// A calendar month, formatted as `YYYY-MM`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct YearMonth {
    year: i32,
    month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Result<Self> {
        if !(1..=12).contains(&month) {
            return Err(Error::InvalidData(format!("Invalid month: {}", month)));
        }
        Ok(Self { year, month })
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn current() -> Self {
        Self::from_date(Utc::now().date_naive())
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn previous(&self) -> Self {
        if self.month == 1 {
            Self {
                year: self.year - 1,
                month: 12,
            }
        } else {
            Self {
                year: self.year,
                month: self.month - 1,
            }
        }
    }

    pub fn next(&self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    /// First day of the month
    pub fn first_day(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
    }

    /// English month name, e.g. "June"
    pub fn month_name(&self) -> String {
        self.first_day()
            .map(|d| d.format("%B").to_string())
            .unwrap_or_else(|| self.to_string())
    }
}

impl std::str::FromStr for YearMonth {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (year, month) = s
            .trim()
            .split_once('-')
            .ok_or_else(|| Error::InvalidData(format!("Expected YYYY-MM, got {}", s)))?;
        let year: i32 = year
            .parse()
            .map_err(|_| Error::InvalidData(format!("Invalid year in {}", s)))?;
        let month: u32 = month
            .parse()
            .map_err(|_| Error::InvalidData(format!("Invalid month in {}", s)))?;
        Self::new(year, month)
    }
}

impl std::fmt::Display for YearMonth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl Serialize for YearMonth {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for YearMonth {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Converted total for one merchant
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MerchantTotal {
    pub merchant: String,
    pub total_converted: f64,
    pub count: i64,
}

/// Converted total for one rate class
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateClassTotal {
    pub rate_class: RateClass,
    pub total_converted: f64,
    pub count: i64,
}

/// Day of the month with the highest converted spend
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DaySpend {
    pub day: u32,
    pub total_converted: f64,
}

/// Derived per-owner monthly aggregate (never stored)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlySummary {
    pub owner: UserIdentity,
    pub month: YearMonth,
    pub total_converted: f64,
    /// Sum of original amounts; only meaningful when `original_currency` is set
    pub total_original: f64,
    /// The single source currency of every record, `None` when mixed or empty
    pub original_currency: Option<Currency>,
    pub count: i64,
    pub average_converted: f64,
    /// Sorted by converted total, descending
    pub by_merchant: Vec<MerchantTotal>,
    /// Always contains both rate classes
    pub by_rate_class: Vec<RateClassTotal>,
    pub highest_day: Option<DaySpend>,
}

impl MonthlySummary {
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn top_merchant(&self) -> Option<&str> {
        self.by_merchant.first().map(|m| m.merchant.as_str())
    }

    pub fn rate_class_total(&self, rate_class: RateClass) -> f64 {
        self.by_rate_class
            .iter()
            .find(|r| r.rate_class == rate_class)
            .map(|r| r.total_converted)
            .unwrap_or(0.0)
    }
}

/// One month's line in a yearly summary
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthTotal {
    pub month: YearMonth,
    pub total_converted: f64,
    pub count: i64,
}

/// Derived per-owner yearly aggregate
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct YearlySummary {
    pub owner: UserIdentity,
    pub year: i32,
    pub total_converted: f64,
    pub total_original: f64,
    pub count: i64,
    /// Twelve entries, January first
    pub months: Vec<MonthTotal>,
    /// Top five merchants by converted total
    pub top_merchants: Vec<MerchantTotal>,
    pub by_rate_class: Vec<RateClassTotal>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_currency() {
        assert_eq!(round_currency(12750.0), 12750.0);
        assert_eq!(round_currency(9205.5), 9205.5);
        assert_eq!(round_currency(3.14159), 3.14);
    }

    #[test]
    fn test_rate_class_parse() {
        assert_eq!("POS".parse::<RateClass>().unwrap(), RateClass::Pos);
        assert_eq!(" atm ".parse::<RateClass>().unwrap(), RateClass::Atm);
        assert_eq!("pos_rate".parse::<RateClass>().unwrap(), RateClass::Pos);
        assert_eq!("2".parse::<RateClass>().unwrap(), RateClass::Atm);
        assert!("visa".parse::<RateClass>().is_err());
    }

    #[test]
    fn test_currency_resolution() {
        let r = Currency::resolve(Some("tl"), Currency::Try);
        assert_eq!(r.currency, Currency::Try);
        assert!(r.unrecognized.is_none());

        let r = Currency::resolve(Some("EUR"), Currency::Try);
        assert_eq!(r.currency, Currency::Eur);

        let r = Currency::resolve(None, Currency::Try);
        assert_eq!(r.currency, Currency::Try);
        assert!(r.unrecognized.is_none());

        let r = Currency::resolve(Some("XYZ"), Currency::Try);
        assert_eq!(r.currency, Currency::Try);
        assert_eq!(r.unrecognized.as_deref(), Some("XYZ"));
    }

    #[test]
    fn test_year_month_parse_and_navigation() {
        let ym: YearMonth = "2025-01".parse().unwrap();
        assert_eq!(ym.to_string(), "2025-01");
        assert_eq!(ym.previous().to_string(), "2024-12");
        assert_eq!(ym.next().to_string(), "2025-02");
        assert_eq!(ym.month_name(), "January");
        assert!("2025-13".parse::<YearMonth>().is_err());
        assert!("202501".parse::<YearMonth>().is_err());
    }

    #[test]
    fn test_extracted_fields_sanitized() {
        let fields = ExtractedFields {
            amount: Some(-5.0),
            merchant: Some("   ".into()),
            currency_hint: Some("TRY".into()),
            ..ExtractedFields::default()
        }
        .sanitized();
        assert!(fields.amount.is_none());
        assert!(fields.merchant.is_none());
        assert_eq!(fields.currency_hint.as_deref(), Some("TRY"));
    }

    #[test]
    fn test_new_expense_requires_amount() {
        let now = Utc::now();
        let pending = PendingTransaction::manual(UserIdentity::new("905551112233"), now);
        let result = NewExpense::from_pending(&pending, Currency::Try, RateClass::Pos, 51.0, now);
        assert!(result.is_err());
    }

    #[test]
    fn test_new_expense_converted_amount() {
        let now = Utc::now();
        let mut pending = PendingTransaction::manual(UserIdentity::new("905551112233"), now);
        pending.extracted_amount = Some(250.0);
        let expense =
            NewExpense::from_pending(&pending, Currency::Try, RateClass::Pos, 51.0, now).unwrap();
        assert_eq!(expense.converted_amount(), 12750.0);
        assert_eq!(expense.merchant, UNKNOWN_MERCHANT);
        assert_eq!(expense.source, ExpenseSource::Manual);
    }

    #[test]
    fn test_pending_staleness() {
        let now = Utc::now();
        let pending = PendingTransaction::manual(UserIdentity::new("a"), now - Duration::minutes(31));
        assert!(pending.is_stale(Duration::minutes(30), now));
        assert!(!pending.is_stale(Duration::minutes(45), now));
    }
}
