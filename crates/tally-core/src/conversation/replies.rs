//! User-visible replies
//!
//! The engine produces typed [`Reply`] values; transports render them to
//! text at the edge.

use chrono::NaiveDate;

use crate::delivery::Button;
use crate::models::{Confidence, Currency, ExpenseRecord, MonthlySummary, Stage};
use crate::rates::Conversion;
use crate::reporting::{format_converted, format_original};

const CONFIRM_BUTTONS: [Button; 2] = [
    Button::new("confirm_yes", "✅ Yes"),
    Button::new("confirm_no", "❌ No"),
];

const RATE_BUTTONS: [Button; 2] = [
    Button::new("pos_rate", "💳 POS (card)"),
    Button::new("atm_rate", "💵 ATM (cash)"),
];

#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Greeting,
    Help,
    /// Text outside an active stage that is not a command
    Unrecognized,
    MonthlyTotal(MonthlySummary),
    TotalUnavailable,
    /// A new receipt or manual entry replaced an unfinished draft
    DraftReplaced { previous_stage: Stage },
    /// Extraction result, asking the user to confirm
    ConfirmReceipt {
        amount: Option<f64>,
        merchant: Option<String>,
        currency: Currency,
        /// Purchase date printed on the receipt
        date: Option<NaiveDate>,
        confidence: Option<Confidence>,
        missing: Vec<&'static str>,
    },
    /// A currency the bot does not know was replaced by the default
    CurrencyDefaulted { hint: String, currency: Currency },
    RatePrompt {
        amount: f64,
        currency: Currency,
        conversions: [Conversion; 2],
    },
    InvalidRateChoice { input: String },
    /// Ask for the amount; `receipt` is set when the receipt had none
    AskAmount { receipt: bool },
    InvalidAmount { input: String },
    /// The typed amount had more than two decimals
    AmountRounded { input: f64, rounded: f64 },
    AskMerchant { amount: f64, currency: Currency },
    Committed {
        record: ExpenseRecord,
        /// Month-to-date totals, when the ledger could be read back
        month: Option<MonthlySummary>,
    },
    /// Ledger append failed; the draft is kept for a retry
    CommitFailed { attempt: u32 },
    Cancelled,
    NothingToCancel,
    /// The user rejected the extracted receipt
    Discarded,
    Expired { stage: Stage },
    StillProcessing,
    InternalError,
}

impl Reply {
    /// Quick-reply buttons that answer this reply, if any
    pub fn buttons(&self) -> &'static [Button] {
        match self {
            Reply::ConfirmReceipt { .. } => &CONFIRM_BUTTONS,
            Reply::RatePrompt { .. } => &RATE_BUTTONS,
            _ => &[],
        }
    }

    pub fn render(&self) -> String {
        match self {
            Reply::Greeting => "👋 Welcome to Tally!\n\n\
                 📸 Send a photo of a receipt to record an expense\n\
                 ✍️ Type *manual* to enter one by hand\n\
                 📊 Type *total* to see this month's spending\n\
                 ❓ Type *help* for all commands"
                .to_string(),
            Reply::Help => "🤖 Commands\n\n\
                 📸 Send a receipt photo: record an expense\n\
                 *manual*: enter an expense by hand\n\
                 *total*: this month's spending\n\
                 *cancel*: discard the expense in progress\n\
                 *help*: this message\n\n\
                 Each expense is converted to MWK at the POS (card) or ATM (cash) rate."
                .to_string(),
            Reply::Unrecognized => {
                "🤔 I didn't understand that. Send a receipt photo, or type *manual*, *total* or *help*."
                    .to_string()
            }
            Reply::MonthlyTotal(summary) => render_total(summary),
            Reply::TotalUnavailable => {
                "⚠️ I couldn't load your totals right now. Please try again shortly.".to_string()
            }
            Reply::DraftReplaced { previous_stage } => format!(
                "🗑️ Your previous unfinished expense ({}) was discarded.",
                stage_label(*previous_stage)
            ),
            Reply::ConfirmReceipt {
                amount,
                merchant,
                currency,
                date,
                confidence,
                missing,
            } => {
                let mut text = String::from("🧾 Receipt details\n\n");
                text.push_str(&format!(
                    "🏪 Merchant: {}\n",
                    merchant.as_deref().unwrap_or("not found")
                ));
                match amount {
                    Some(a) => text.push_str(&format!("💰 Total: {}\n", format_original(*a, *currency))),
                    None => text.push_str("💰 Total: not found\n"),
                }
                if let Some(date) = date {
                    text.push_str(&format!("📅 Date: {}\n", date.format("%d.%m.%Y")));
                }
                if *confidence == Some(Confidence::Low) {
                    text.push_str("\n🔍 The photo was hard to read, please check these details.\n");
                }
                if !missing.is_empty() {
                    text.push_str(&format!("\n⚠️ I couldn't read: {}\n", missing.join(", ")));
                }
                if amount.is_some() {
                    text.push_str("\nIs this correct? Reply *yes* to continue or *no* to discard.");
                } else {
                    text.push_str("\nReply with the total amount (e.g. 250,00), *yes* to type it, or *no* to discard.");
                }
                text
            }
            Reply::CurrencyDefaulted { hint, currency } => format!(
                "ℹ️ I don't know the currency \"{}\", so I'm using {}.",
                hint, currency
            ),
            Reply::RatePrompt {
                amount,
                currency,
                conversions,
            } => {
                let mut text = format!(
                    "💱 Choose exchange rate for {}\n\n",
                    format_original(*amount, *currency)
                );
                for (i, c) in conversions.iter().enumerate() {
                    text.push_str(&format!(
                        "{}. {} ({:.2}): {}\n",
                        i + 1,
                        c.rate_class,
                        c.rate,
                        format_converted(c.converted_amount)
                    ));
                }
                text.push_str("\nReply *POS* (card) or *ATM* (cash).");
                text
            }
            Reply::InvalidRateChoice { input } => format!(
                "❌ \"{}\" is not a rate option. Please reply POS or ATM.",
                input
            ),
            Reply::AskAmount { receipt } => {
                if *receipt {
                    "✍️ I couldn't find the total on your receipt. How much was it? (e.g. 180,50)"
                        .to_string()
                } else {
                    "✍️ Manual entry: how much did you spend? (e.g. 180,50 or 180.50 TL)"
                        .to_string()
                }
            }
            Reply::InvalidAmount { input } => format!(
                "❌ \"{}\" is not a valid amount. Please send a number greater than zero, e.g. 180,50.",
                input
            ),
            Reply::AmountRounded { input, rounded } => format!(
                "ℹ️ Amounts are kept to 2 decimals: {} was recorded as {:.2}.",
                input, rounded
            ),
            Reply::AskMerchant { amount, currency } => format!(
                "🏪 {} noted. Where did you spend it? (send a dash - if you'd rather not say)",
                format_original(*amount, *currency)
            ),
            Reply::Committed { record, month } => {
                let mut text = format!(
                    "✅ Expense saved!\n\n🏪 {}\n📅 {}\n💰 {} → {}\n📊 Rate: {} ({:.2})",
                    record.merchant,
                    record.expense_date.format("%d.%m.%Y"),
                    format_original(record.amount_original, record.currency),
                    format_converted(record.converted_amount),
                    record.rate_class,
                    record.rate_used
                );
                if let Some(summary) = month {
                    text.push_str(&format!(
                        "\n\n📅 {} so far: {} across {} expenses",
                        summary.month.month_name(),
                        format_converted(summary.total_converted),
                        summary.count
                    ));
                }
                text
            }
            Reply::CommitFailed { attempt } => {
                if *attempt <= 1 {
                    "⚠️ I couldn't save your expense. Nothing was lost: reply POS or ATM again to retry."
                        .to_string()
                } else {
                    format!(
                        "⚠️ Saving failed again ({} attempts). Your expense is still here; retry with POS or ATM later, or type *cancel*.",
                        attempt
                    )
                }
            }
            Reply::Cancelled => "🚫 Cancelled. Nothing was saved.".to_string(),
            Reply::NothingToCancel => "Nothing to cancel.".to_string(),
            Reply::Discarded => {
                "🗑️ Discarded. Send another photo, or type *manual* to enter it by hand.".to_string()
            }
            Reply::Expired { stage } => format!(
                "⌛ Your unfinished expense ({}) expired after a period of inactivity and was discarded.",
                stage_label(*stage)
            ),
            Reply::StillProcessing => {
                "⏳ Still processing your previous message, please wait a moment.".to_string()
            }
            Reply::InternalError => {
                "⚠️ Something went wrong on my side. Please try again.".to_string()
            }
        }
    }
}

/// Render several replies as one message
pub fn render_all(replies: &[Reply]) -> String {
    replies
        .iter()
        .map(Reply::render)
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn stage_label(stage: Stage) -> &'static str {
    match stage {
        Stage::AwaitingImageOrCommand => "idle",
        Stage::AwaitingConfirmation => "waiting for confirmation",
        Stage::AwaitingRateChoice | Stage::AwaitingManualRateChoice => "waiting for a rate choice",
        Stage::AwaitingManualAmount => "waiting for an amount",
        Stage::AwaitingManualMerchant => "waiting for a merchant",
    }
}

fn render_total(summary: &MonthlySummary) -> String {
    let title = format!(
        "📊 {} {}",
        summary.month.month_name(),
        summary.month.year()
    );
    if summary.is_empty() {
        return format!("{}\n\nNo expenses yet this month.", title);
    }

    let mut text = format!(
        "{}\n\n💰 Total: {}\n🧾 Expenses: {}",
        title,
        format_converted(summary.total_converted),
        summary.count
    );
    if let Some(currency) = summary.original_currency {
        text.push_str(&format!(
            "\n💵 Spent: {}",
            format_original(summary.total_original, currency)
        ));
    }
    for r in &summary.by_rate_class {
        if r.count > 0 {
            text.push_str(&format!(
                "\n💳 {}: {}",
                r.rate_class,
                format_converted(r.total_converted)
            ));
        }
    }
    if let Some(top) = summary.by_merchant.first() {
        text.push_str(&format!("\n🏪 Top merchant: {}", top.merchant));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rates::RateResolver;

    #[test]
    fn test_rate_prompt_shows_both_conversions() {
        let rates = RateResolver::new(51.0, 54.0).unwrap();
        let text = Reply::RatePrompt {
            amount: 250.0,
            currency: Currency::Try,
            conversions: rates.compare(250.0),
        }
        .render();
        assert!(text.contains("₺250.00"));
        assert!(text.contains("1. POS (51.00): 12750.00 MWK"));
        assert!(text.contains("2. ATM (54.00): 13500.00 MWK"));
    }

    #[test]
    fn test_confirm_receipt_lists_missing_fields() {
        let text = Reply::ConfirmReceipt {
            amount: None,
            merchant: None,
            currency: Currency::Try,
            date: None,
            confidence: Some(Confidence::Low),
            missing: vec!["amount", "merchant"],
        }
        .render();
        assert!(text.contains("I couldn't read: amount, merchant"));
        assert!(text.contains("Reply with the total amount"));
        assert!(text.contains("hard to read"));
        assert!(!text.contains("📅"));
    }

    #[test]
    fn test_confirm_receipt_shows_date() {
        let reply = Reply::ConfirmReceipt {
            amount: Some(42.5),
            merchant: Some("BIM".into()),
            currency: Currency::Try,
            date: NaiveDate::from_ymd_opt(2025, 6, 28),
            confidence: Some(Confidence::High),
            missing: vec![],
        };
        let text = reply.render();
        assert!(text.contains("📅 Date: 28.06.2025"));
        assert!(!text.contains("hard to read"));

        let ids: Vec<_> = reply.buttons().iter().map(|b| b.id).collect();
        assert_eq!(ids, vec!["confirm_yes", "confirm_no"]);
    }

    #[test]
    fn test_buttons_fit_quick_reply_limits() {
        let rates = RateResolver::new(51.0, 54.0).unwrap();
        let prompt = Reply::RatePrompt {
            amount: 250.0,
            currency: Currency::Try,
            conversions: rates.compare(250.0),
        };
        let ids: Vec<_> = prompt.buttons().iter().map(|b| b.id).collect();
        assert_eq!(ids, vec!["pos_rate", "atm_rate"]);
        for button in CONFIRM_BUTTONS.iter().chain(RATE_BUTTONS.iter()) {
            assert!(button.title.chars().count() <= 20);
        }
        assert!(Reply::Help.buttons().is_empty());
    }

    #[test]
    fn test_amount_rounded_notice() {
        let text = Reply::AmountRounded {
            input: 12.345,
            rounded: 12.35,
        }
        .render();
        assert!(text.contains("12.345 was recorded as 12.35"));
    }

    #[test]
    fn test_commit_failure_is_distinct_on_repeat() {
        let first = Reply::CommitFailed { attempt: 1 }.render();
        let second = Reply::CommitFailed { attempt: 2 }.render();
        assert_ne!(first, second);
        assert!(second.contains("2 attempts"));
    }

    #[test]
    fn test_render_all_joins_messages() {
        let text = render_all(&[
            Reply::DraftReplaced {
                previous_stage: Stage::AwaitingRateChoice,
            },
            Reply::AskAmount { receipt: false },
        ]);
        assert!(text.contains("discarded"));
        assert!(text.contains("Manual entry"));
        assert_eq!(text.matches("\n\n").count(), 1);
    }
}
