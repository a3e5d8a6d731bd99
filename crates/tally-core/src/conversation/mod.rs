//! Conversation engine
//!
//! Turns a stream of inbound chat events into committed expenses. Each user
//! has at most one pending transaction, held in the [`SessionStore`]; every
//! event for a user runs with that user's session locked, so two events for
//! the same user never mutate the same draft concurrently. A second event
//! arriving while one is in flight is answered with [`Reply::StillProcessing`].
//!
//! Stage flow:
//!
//! ```text
//! image ──► AwaitingConfirmation ──yes──► AwaitingRateChoice ──POS/ATM──► commit
//!                 │ (no amount)
//!                 ▼
//! manual ──► AwaitingManualAmount ──► AwaitingManualMerchant ──► AwaitingManualRateChoice ──► commit
//! ```
//!
//! `cancel` discards the draft from any stage; a new image or `manual`
//! replaces it with a notice.

pub mod command;
pub mod replies;


pub use command::Command;
pub use replies::{render_all, Reply};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn};

use crate::ai::ExtractionBackend;
use crate::config::EngineConfig;
use crate::delivery::Notifier;
use crate::error::{Error, Result};
use crate::input::{parse_amount, AmountInput, Confirmation};
use crate::ledger::Ledger;
use crate::models::*;
use crate::reporting::monthly_summary;
use crate::session::{SessionGuard, SessionStore};

/// Longest merchant name kept from manual entry
const MAX_MERCHANT_CHARS: usize = 100;

/// Content of an inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Text(String),
    /// Raw receipt image bytes
    Image(Vec<u8>),
    /// Button or list reply id (e.g. `pos_rate`, `confirm_yes`)
    Selection(String),
    /// A message kind the bot cannot handle (audio, sticker, ...)
    Unsupported(String),
}

/// One message from a user, as delivered by a transport
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub sender: UserIdentity,
    pub payload: Payload,
    pub received_at: DateTime<Utc>,
}

impl InboundEvent {
    pub fn new(sender: UserIdentity, payload: Payload) -> Self {
        Self {
            sender,
            payload,
            received_at: Utc::now(),
        }
    }

    pub fn text(sender: impl Into<UserIdentity>, text: impl Into<String>) -> Self {
        Self::new(sender.into(), Payload::Text(text.into()))
    }

    pub fn image(sender: impl Into<UserIdentity>, bytes: Vec<u8>) -> Self {
        Self::new(sender.into(), Payload::Image(bytes))
    }

    pub fn selection(sender: impl Into<UserIdentity>, id: impl Into<String>) -> Self {
        Self::new(sender.into(), Payload::Selection(id.into()))
    }

    pub fn at(mut self, received_at: DateTime<Utc>) -> Self {
        self.received_at = received_at;
        self
    }
}

/// Per-user conversation state machine
pub struct ConversationEngine {
    sessions: Arc<SessionStore>,
    extractor: Arc<dyn ExtractionBackend>,
    ledger: Arc<dyn Ledger>,
    notifier: Arc<dyn Notifier>,
    config: EngineConfig,
}

impl ConversationEngine {
    pub fn new(
        extractor: Arc<dyn ExtractionBackend>,
        ledger: Arc<dyn Ledger>,
        notifier: Arc<dyn Notifier>,
        config: EngineConfig,
    ) -> Self {
        Self {
            sessions: Arc::new(SessionStore::new()),
            extractor,
            ledger,
            notifier,
            config,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn extractor(&self) -> &Arc<dyn ExtractionBackend> {
        &self.extractor
    }

    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    /// Handle an event and deliver the replies to the sender.
    ///
    /// Delivery failures are logged; state changes made while handling the
    /// event stand regardless.
    pub async fn process(&self, event: InboundEvent) -> Vec<Reply> {
        let owner = event.sender.clone();
        let replies = self.handle(event).await;
        self.deliver(&owner, &replies).await;
        replies
    }

    /// Handle an event and return the replies without delivering them
    pub async fn handle(&self, event: InboundEvent) -> Vec<Reply> {
        let owner = event.sender.clone();
        let Ok(mut guard) = self.sessions.try_lock(&owner) else {
            info!(owner = %owner, "Previous message still processing, rejecting event");
            return vec![Reply::StillProcessing];
        };

        let now = event.received_at;
        match event.payload {
            Payload::Image(bytes) => self.on_image(&mut guard, &bytes, now).await,
            Payload::Text(text) | Payload::Selection(text) => {
                self.on_text(&mut guard, &text, now).await
            }
            Payload::Unsupported(kind) => {
                debug!(owner = %owner, kind = %kind, "Unsupported message kind");
                match guard.get_mut() {
                    Some(pending) => {
                        pending.touch(now);
                        let mut replies = vec![Reply::Unrecognized];
                        replies.extend(self.prompt_for(pending));
                        replies
                    }
                    None => vec![Reply::Unrecognized],
                }
            }
        }
    }

    /// Discard drafts idle for longer than the configured window
    pub async fn sweep_stale(&self) -> usize {
        self.sweep_stale_at(Utc::now()).await
    }

    /// [`sweep_stale`](Self::sweep_stale) against an explicit clock
    pub async fn sweep_stale_at(&self, now: DateTime<Utc>) -> usize {
        let expired = self
            .sessions
            .sweep_expired_at(self.config.stale_after_chrono(), now);
        if expired.is_empty() {
            return 0;
        }

        info!(count = expired.len(), "Swept stale pending transactions");
        if self.config.notify_on_expiry {
            for tx in &expired {
                let reply = Reply::Expired { stage: tx.stage };
                self.deliver(&tx.owner, std::slice::from_ref(&reply)).await;
            }
        }
        expired.len()
    }

    async fn deliver(&self, owner: &UserIdentity, replies: &[Reply]) {
        if replies.is_empty() {
            return;
        }
        let message = render_all(replies);
        // Only the last reply can be waiting for an answer
        let buttons = replies.last().map(Reply::buttons).unwrap_or_default();
        let result = if buttons.is_empty() {
            self.notifier.send(owner, &message).await
        } else {
            self.notifier.send_with_buttons(owner, &message, buttons).await
        };
        if let Err(e) = result {
            warn!(owner = %owner, error = %e, "Failed to deliver reply");
        }
    }

    async fn on_image(
        &self,
        guard: &mut SessionGuard,
        image: &[u8],
        now: DateTime<Utc>,
    ) -> Vec<Reply> {
        let owner = guard.owner().clone();
        let mut replies = Vec::new();

        if let Some(previous) = guard.remove() {
            info!(owner = %owner, stage = %previous.stage, "New receipt replaced unfinished draft");
            replies.push(Reply::DraftReplaced {
                previous_stage: previous.stage,
            });
        }

        let fields = match tokio::time::timeout(
            self.config.extraction_timeout,
            self.extract(image),
        )
        .await
        {
            Ok(Ok(fields)) => fields,
            Ok(Err(e)) => {
                warn!(owner = %owner, error = %e, "Extraction failed, asking user for missing fields");
                ExtractedFields::default()
            }
            Err(_) => {
                warn!(
                    owner = %owner,
                    seconds = self.config.extraction_timeout.as_secs(),
                    "Extraction timed out, asking user for missing fields"
                );
                ExtractedFields::default()
            }
        };

        if fields.is_empty() {
            info!(owner = %owner, "Nothing readable on receipt, asking for the details");
        }

        let receipt_hash = hex::encode(Sha256::digest(image));
        let pending = PendingTransaction::from_receipt(owner.clone(), fields, Some(receipt_hash), now);

        let resolution = Currency::resolve(
            pending.extracted_currency_hint.as_deref(),
            self.config.default_currency,
        );
        if let Some(hint) = resolution.unrecognized {
            replies.push(Reply::CurrencyDefaulted {
                hint,
                currency: resolution.currency,
            });
        }

        info!(
            owner = %owner,
            to = %pending.stage,
            missing = ?pending.missing_fields(),
            confidence = ?pending.confidence,
            "Receipt draft created"
        );
        replies.extend(self.prompt_for(&pending));
        guard.put(pending);
        replies
    }

    async fn extract(&self, image: &[u8]) -> Result<ExtractedFields> {
        let text = self.extractor.extract_text(image).await?;
        debug!(backend = self.extractor.name(), chars = text.len(), "Receipt transcribed");
        let fields = self.extractor.extract_fields(&text).await?;
        Ok(fields.sanitized())
    }

    async fn on_text(&self, guard: &mut SessionGuard, text: &str, now: DateTime<Utc>) -> Vec<Reply> {
        let command = Command::parse(text);
        match command {
            Some(Command::Cancel) => return self.cancel(guard),
            Some(Command::Manual) => return self.start_manual(guard, now),
            _ => {}
        }

        let Some(stage) = guard.get().map(|p| p.stage) else {
            return self.idle(guard.owner(), command, now).await;
        };

        // Any text typed at the merchant prompt is the merchant name
        if let Some(command) = command.filter(|_| stage != Stage::AwaitingManualMerchant) {
            let owner = guard.owner().clone();
            let mut replies = self.idle(&owner, Some(command), now).await;
            if let Some(pending) = guard.get_mut() {
                pending.touch(now);
                replies.extend(self.prompt_for(pending));
            }
            return replies;
        }

        match stage {
            Stage::AwaitingImageOrCommand => {
                guard.remove();
                self.idle(guard.owner(), command, now).await
            }
            Stage::AwaitingConfirmation => self.on_confirmation(guard, text, now),
            Stage::AwaitingRateChoice | Stage::AwaitingManualRateChoice => {
                self.on_rate_choice(guard, text, now).await
            }
            Stage::AwaitingManualAmount => self.on_amount(guard, text, now),
            Stage::AwaitingManualMerchant => self.on_merchant(guard, text, now),
        }
    }

    /// Handling when no draft exists
    async fn idle(
        &self,
        owner: &UserIdentity,
        command: Option<Command>,
        now: DateTime<Utc>,
    ) -> Vec<Reply> {
        match command {
            Some(Command::Greeting) => vec![Reply::Greeting],
            Some(Command::Help) => vec![Reply::Help],
            Some(Command::Total) => {
                let month = YearMonth::from_date(now.date_naive());
                match self.month_summary(owner, month).await {
                    Ok(summary) => vec![Reply::MonthlyTotal(summary)],
                    Err(e) => {
                        warn!(owner = %owner, error = %e, "Failed to load monthly total");
                        vec![Reply::TotalUnavailable]
                    }
                }
            }
            _ => vec![Reply::Unrecognized],
        }
    }

    fn cancel(&self, guard: &mut SessionGuard) -> Vec<Reply> {
        match guard.remove() {
            Some(previous) => {
                info!(owner = %guard.owner(), from = %previous.stage, "Pending transaction cancelled");
                vec![Reply::Cancelled]
            }
            None => vec![Reply::NothingToCancel],
        }
    }

    fn start_manual(&self, guard: &mut SessionGuard, now: DateTime<Utc>) -> Vec<Reply> {
        let mut replies = Vec::new();
        if let Some(previous) = guard.remove() {
            info!(owner = %guard.owner(), stage = %previous.stage, "Manual entry replaced unfinished draft");
            replies.push(Reply::DraftReplaced {
                previous_stage: previous.stage,
            });
        }

        let pending = PendingTransaction::manual(guard.owner().clone(), now);
        info!(owner = %guard.owner(), to = %pending.stage, "Manual entry started");
        replies.push(Reply::AskAmount { receipt: false });
        guard.put(pending);
        replies
    }

    fn on_confirmation(&self, guard: &mut SessionGuard, text: &str, now: DateTime<Utc>) -> Vec<Reply> {
        if Confirmation::parse(text) == Some(Confirmation::No) {
            if let Some(previous) = guard.remove() {
                info!(owner = %previous.owner, from = %previous.stage, "Receipt rejected, draft discarded");
            }
            return vec![Reply::Discarded];
        }

        let Some(pending) = guard.get_mut() else {
            return vec![Reply::Unrecognized];
        };

        if Confirmation::parse(text) == Some(Confirmation::Yes) {
            return match pending.extracted_amount {
                Some(amount) => {
                    self.transition(pending, Stage::AwaitingRateChoice, now);
                    vec![self.rate_prompt(amount, self.currency_of(pending))]
                }
                None => {
                    self.transition(pending, Stage::AwaitingManualAmount, now);
                    vec![Reply::AskAmount { receipt: true }]
                }
            };
        }

        // A receipt without a total accepts the amount right here
        if pending.extracted_amount.is_none() {
            if let Some(input) = parse_amount(text) {
                return self.accept_amount(pending, input, now);
            }
        }

        pending.touch(now);
        self.prompt_for(pending)
    }

    fn on_amount(&self, guard: &mut SessionGuard, text: &str, now: DateTime<Utc>) -> Vec<Reply> {
        let Some(pending) = guard.get_mut() else {
            return vec![Reply::Unrecognized];
        };

        match parse_amount(text) {
            Some(input) => self.accept_amount(pending, input, now),
            None => {
                debug!(owner = %pending.owner, input = %text, "Invalid amount");
                pending.touch(now);
                vec![Reply::InvalidAmount {
                    input: text.trim().to_string(),
                }]
            }
        }
    }

    /// Store a validated amount and move on to the merchant or the rate choice
    fn accept_amount(
        &self,
        pending: &mut PendingTransaction,
        input: AmountInput,
        now: DateTime<Utc>,
    ) -> Vec<Reply> {
        let amount = round_currency(input.value);
        pending.extracted_amount = Some(amount);

        let mut replies = Vec::new();
        if amount != input.value {
            debug!(owner = %pending.owner, input = input.value, amount, "Amount rounded to cents");
            replies.push(Reply::AmountRounded {
                input: input.value,
                rounded: amount,
            });
        }
        let currency = match input.currency_hint {
            Some(hint) => {
                let resolution = Currency::resolve(Some(&hint), self.config.default_currency);
                if let Some(unrecognized) = resolution.unrecognized {
                    replies.push(Reply::CurrencyDefaulted {
                        hint: unrecognized,
                        currency: resolution.currency,
                    });
                }
                pending.extracted_currency_hint = Some(hint);
                resolution.currency
            }
            None => self.currency_of(pending),
        };

        if pending.extracted_merchant.is_none() {
            self.transition(pending, Stage::AwaitingManualMerchant, now);
            replies.push(Reply::AskMerchant { amount, currency });
        } else {
            self.transition(pending, Stage::AwaitingManualRateChoice, now);
            replies.push(self.rate_prompt(amount, currency));
        }
        replies
    }

    fn on_merchant(&self, guard: &mut SessionGuard, text: &str, now: DateTime<Utc>) -> Vec<Reply> {
        let Some(pending) = guard.get_mut() else {
            return vec![Reply::Unrecognized];
        };

        let merchant = text.trim();
        let merchant = if merchant.is_empty() || merchant == "-" {
            UNKNOWN_MERCHANT.to_string()
        } else {
            merchant.chars().take(MAX_MERCHANT_CHARS).collect()
        };
        pending.extracted_merchant = Some(merchant);

        match pending.extracted_amount {
            Some(amount) => {
                self.transition(pending, Stage::AwaitingManualRateChoice, now);
                vec![self.rate_prompt(amount, self.currency_of(pending))]
            }
            None => {
                self.transition(pending, Stage::AwaitingManualAmount, now);
                vec![Reply::AskAmount {
                    receipt: pending.source == ExpenseSource::Receipt,
                }]
            }
        }
    }

    async fn on_rate_choice(
        &self,
        guard: &mut SessionGuard,
        text: &str,
        now: DateTime<Utc>,
    ) -> Vec<Reply> {
        match text.parse::<RateClass>() {
            Ok(rate_class) => self.commit(guard, rate_class, now).await,
            Err(_) => {
                let Some(pending) = guard.get_mut() else {
                    return vec![Reply::Unrecognized];
                };
                debug!(owner = %pending.owner, input = %text, "Invalid rate choice");
                pending.touch(now);
                let mut replies = vec![Reply::InvalidRateChoice {
                    input: text.trim().to_string(),
                }];
                replies.extend(self.prompt_for(pending));
                replies
            }
        }
    }

    /// Append the draft to the ledger. The draft is removed only once the
    /// append has succeeded; on failure it stays for a retry.
    async fn commit(
        &self,
        guard: &mut SessionGuard,
        rate_class: RateClass,
        now: DateTime<Utc>,
    ) -> Vec<Reply> {
        let Some(pending) = guard.get_mut() else {
            return vec![Reply::Unrecognized];
        };

        let currency = Currency::resolve(
            pending.extracted_currency_hint.as_deref(),
            self.config.default_currency,
        )
        .currency;

        let rate = match self.config.rates.resolve_named(rate_class.as_str()) {
            Ok(rate) => rate,
            Err(e) => {
                error!(owner = %pending.owner, error = %e, "Rate resolution failed");
                return vec![Reply::InternalError];
            }
        };

        let expense = match NewExpense::from_pending(pending, currency, rate_class, rate, Utc::now())
        {
            Ok(expense) => expense,
            Err(e) => {
                error!(owner = %pending.owner, error = %e, "Draft reached commit without an amount");
                self.transition(pending, Stage::AwaitingManualAmount, now);
                return vec![Reply::AskAmount {
                    receipt: pending.source == ExpenseSource::Receipt,
                }];
            }
        };

        let timeout = self.config.ledger_timeout;
        let result = match tokio::time::timeout(timeout, self.ledger.append(expense)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                operation: "ledger append",
                seconds: timeout.as_secs(),
            }),
        };

        match result {
            Ok(record) => {
                let from = pending.stage;
                let draft_id = pending.draft_id.clone();
                guard.remove();
                info!(
                    owner = %record.owner,
                    id = record.id,
                    draft = %draft_id,
                    from = %from,
                    rate_class = %record.rate_class,
                    converted = record.converted_amount,
                    "Expense committed"
                );

                let month = match self.month_summary(&record.owner, record.month()).await {
                    Ok(summary) => Some(summary),
                    Err(e) => {
                        warn!(owner = %record.owner, error = %e, "Could not load month totals after commit");
                        None
                    }
                };
                vec![Reply::Committed { record, month }]
            }
            Err(e) => {
                pending.commit_failures += 1;
                pending.touch(now);
                error!(
                    owner = %pending.owner,
                    attempt = pending.commit_failures,
                    retryable = e.is_retryable(),
                    error = %e,
                    "Ledger append failed, draft kept for retry"
                );
                vec![Reply::CommitFailed {
                    attempt: pending.commit_failures,
                }]
            }
        }
    }

    async fn month_summary(&self, owner: &UserIdentity, month: YearMonth) -> Result<MonthlySummary> {
        let timeout = self.config.ledger_timeout;
        let records = tokio::time::timeout(timeout, self.ledger.query_by_owner_and_month(owner, month))
            .await
            .map_err(|_| Error::Timeout {
                operation: "ledger query",
                seconds: timeout.as_secs(),
            })??;
        Ok(monthly_summary(owner, month, &records))
    }

    /// Prompt for whatever the draft's current stage is waiting on
    fn prompt_for(&self, pending: &PendingTransaction) -> Vec<Reply> {
        let currency = self.currency_of(pending);
        match (pending.stage, pending.extracted_amount) {
            (Stage::AwaitingConfirmation, amount) => vec![Reply::ConfirmReceipt {
                amount,
                merchant: pending.extracted_merchant.clone(),
                currency,
                date: pending.receipt_date,
                confidence: pending.confidence,
                missing: pending.missing_fields(),
            }],
            (Stage::AwaitingRateChoice | Stage::AwaitingManualRateChoice, Some(amount)) => {
                vec![self.rate_prompt(amount, currency)]
            }
            (Stage::AwaitingManualMerchant, Some(amount)) => {
                vec![Reply::AskMerchant { amount, currency }]
            }
            (Stage::AwaitingImageOrCommand, _) => vec![Reply::Help],
            _ => vec![Reply::AskAmount {
                receipt: pending.source == ExpenseSource::Receipt,
            }],
        }
    }

    fn rate_prompt(&self, amount: f64, currency: Currency) -> Reply {
        Reply::RatePrompt {
            amount,
            currency,
            conversions: self.config.rates.compare(amount),
        }
    }

    /// Currency for display; fallbacks were already surfaced when the hint arrived
    fn currency_of(&self, pending: &PendingTransaction) -> Currency {
        pending
            .extracted_currency_hint
            .as_deref()
            .and_then(|h| h.parse().ok())
            .unwrap_or(self.config.default_currency)
    }

    fn transition(&self, pending: &mut PendingTransaction, to: Stage, now: DateTime<Utc>) {
        let from = pending.stage;
        pending.advance(to, now);
        info!(owner = %pending.owner, from = %from, to = %to, "Transition");
    }
}
