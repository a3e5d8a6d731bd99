//! Parsing of free-form user input
//!
//! Amounts arrive in whatever format the user types: `250`, `180.50`,
//! Turkish-style `25,40` or `1.234,56`, optionally with a currency symbol or
//! code (`₺25,40`, `25 TL`, `$12`). Confirmation words are accepted in
//! English and Turkish.

use std::sync::OnceLock;

use regex::Regex;

use crate::models::Currency;

/// A positive amount typed by the user
#[derive(Debug, Clone, PartialEq)]
pub struct AmountInput {
    pub value: f64,
    /// Currency symbol or code written next to the number, if any
    pub currency_hint: Option<String>,
}

fn number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d[\d.,' ]*\d|\d").expect("valid regex"))
}

fn iso_code_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z]{3}$").expect("valid regex"))
}

/// Parse an amount, accepting an optional currency token before or after it.
///
/// Returns `None` for anything that is not a single strictly positive number.
pub fn parse_amount(text: &str) -> Option<AmountInput> {
    let text = text.trim();
    let m = number_re().find(text)?;

    let value = parse_decimal(m.as_str())?;
    if !value.is_finite() || value <= 0.0 {
        return None;
    }

    let rest = format!("{} {}", &text[..m.start()], &text[m.end()..]);
    let rest = rest.trim();
    let currency_hint = if rest.is_empty() {
        None
    } else if rest.parse::<Currency>().is_ok() || iso_code_re().is_match(rest) {
        Some(rest.to_string())
    } else {
        return None;
    };

    Some(AmountInput {
        value,
        currency_hint,
    })
}

/// Parse a bare number written with `.` or `,` as decimal or thousands separator.
///
/// When both separators appear, the last one is the decimal point. A single
/// separator followed by exactly three digits is a thousands separator
/// (`1.234` is 1234), otherwise it is the decimal point (`25,40` is 25.4).
pub fn parse_decimal(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\'')
        .collect();
    if cleaned.is_empty() {
        return None;
    }

    let last_dot = cleaned.rfind('.');
    let last_comma = cleaned.rfind(',');

    let normalized = match (last_dot, last_comma) {
        (None, None) => cleaned,
        (Some(d), Some(c)) => {
            let decimal_at = d.max(c);
            without_separators(&cleaned, Some(decimal_at))
        }
        (Some(pos), None) | (None, Some(pos)) => {
            let sep = cleaned[pos..].chars().next()?;
            let occurrences = cleaned.matches(sep).count();
            let integer_part = &cleaned[..pos];
            let fraction = &cleaned[pos + 1..];
            let is_thousands = occurrences > 1
                || (fraction.len() == 3 && !integer_part.is_empty() && !integer_part.starts_with('0'));
            if is_thousands {
                without_separators(&cleaned, None)
            } else {
                without_separators(&cleaned, Some(pos))
            }
        }
    };

    normalized.parse::<f64>().ok()
}

/// Drop every separator, keeping the one at `decimal_at` as a `.`
fn without_separators(s: &str, decimal_at: Option<usize>) -> String {
    s.char_indices()
        .filter_map(|(i, c)| match c {
            '.' | ',' if Some(i) == decimal_at => Some('.'),
            '.' | ',' => None,
            other => Some(other),
        })
        .collect()
}

/// Answer to "is this right?"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Yes,
    No,
}

impl Confirmation {
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_lowercase().as_str() {
            "yes" | "y" | "ok" | "okay" | "evet" | "e" | "tamam" | "confirm" | "confirm_yes"
            | "correct" | "👍" => Some(Self::Yes),
            "no" | "n" | "edit" | "hayır" | "hayir" | "h" | "wrong" | "confirm_no" | "👎" => {
                Some(Self::No)
            }
            _ => None,
        }
    }
}
