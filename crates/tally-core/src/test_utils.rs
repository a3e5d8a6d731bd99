//! Test utilities for tally-core
//!
//! - `MockOllamaServer`: a local HTTP server speaking the subset of the Ollama
//!   API the extraction backend uses
//! - `RecordingNotifier`: captures outbound messages, optionally failing
//! - `FlakyLedger`: wraps a ledger and injects append failures or latency

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    extract::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::delivery::{Button, Notifier};
use crate::error::{Error, Result};
use crate::ledger::Ledger;
use crate::models::{ExpenseRecord, NewExpense, UserIdentity, YearMonth};

/// Receipt text the mock vision model "sees" on every image
pub const MOCK_RECEIPT_TEXT: &str = "MIGROS TICARET A.S.\nTARIH: 12.06.2025\nTOPLAM *250,00\nKDV *22,73";

/// Mock Ollama server for testing and development
pub struct MockOllamaServer {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl MockOllamaServer {
    /// Start the mock server on an available port
    pub async fn start() -> Self {
        let app = Router::new()
            .route("/api/tags", get(handle_tags))
            .route("/api/generate", post(handle_generate));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .unwrap();
        });

        Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Get the base URL for this mock server
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Stop the mock server
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for MockOllamaServer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[derive(Serialize)]
struct TagsResponse {
    models: Vec<ModelInfo>,
}

#[derive(Serialize)]
struct ModelInfo {
    name: String,
}

#[derive(Deserialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
    #[serde(default)]
    images: Vec<String>,
}

#[derive(Serialize)]
struct GenerateResponse {
    model: String,
    response: String,
    done: bool,
}

async fn handle_tags() -> Json<TagsResponse> {
    Json(TagsResponse {
        models: vec![
            ModelInfo {
                name: "llama3.2:latest".to_string(),
            },
            ModelInfo {
                name: "llava:latest".to_string(),
            },
        ],
    })
}

/// Vision requests (with images) get the receipt text back; text requests get
/// a chatty JSON answer built from the TOPLAM and TARIH lines of the prompt
async fn handle_generate(Json(request): Json<GenerateRequest>) -> Json<GenerateResponse> {
    let response = if !request.images.is_empty() {
        MOCK_RECEIPT_TEXT.to_string()
    } else {
        let total = request
            .prompt
            .lines()
            .find_map(|line| line.trim().strip_prefix("TOPLAM"))
            .map(|rest| format!("\"{}\"", rest.trim().trim_start_matches('*')))
            .unwrap_or_else(|| "null".to_string());
        let date = request
            .prompt
            .lines()
            .find_map(|line| line.trim().strip_prefix("TARIH:"))
            .map(|rest| format!("\"{}\"", rest.trim()))
            .unwrap_or_else(|| "null".to_string());
        let merchant = if request.prompt.contains("MIGROS") {
            "\"Migros\""
        } else {
            "null"
        };
        format!(
            "Sure! Here is the extracted data:\n```json\n{{\"merchant_name\": {}, \"total_amount\": {}, \"currency\": \"TRY\", \"date\": {}, \"confidence\": \"high\"}}\n```",
            merchant, total, date
        )
    };

    Json(GenerateResponse {
        model: request.model,
        response,
        done: true,
    })
}

/// Notifier that records every message it is asked to send
#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<(UserIdentity, String)>>,
    /// Button ids offered with each message that carried buttons
    buttons: Mutex<Vec<(UserIdentity, Vec<&'static str>)>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// A notifier whose every send fails (messages are still recorded)
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn messages(&self) -> Vec<(UserIdentity, String)> {
        self.messages.lock().unwrap().clone()
    }

    pub fn messages_for(&self, owner: &UserIdentity) -> Vec<String> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|(to, _)| to == owner)
            .map(|(_, m)| m.clone())
            .collect()
    }

    pub fn buttons_for(&self, owner: &UserIdentity) -> Vec<Vec<&'static str>> {
        self.buttons
            .lock()
            .unwrap()
            .iter()
            .filter(|(to, _)| to == owner)
            .map(|(_, ids)| ids.clone())
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, recipient: &UserIdentity, message: &str) -> Result<()> {
        self.messages
            .lock()
            .unwrap()
            .push((recipient.clone(), message.to_string()));
        if self.fail {
            return Err(Error::Delivery("injected delivery failure".into()));
        }
        Ok(())
    }

    async fn send_with_buttons(
        &self,
        recipient: &UserIdentity,
        message: &str,
        buttons: &[Button],
    ) -> Result<()> {
        self.buttons
            .lock()
            .unwrap()
            .push((recipient.clone(), buttons.iter().map(|b| b.id).collect()));
        self.send(recipient, message).await
    }
}

/// Ledger wrapper that fails the next N appends and/or delays each append
pub struct FlakyLedger<L> {
    inner: L,
    failures_remaining: AtomicU32,
    delay: Option<Duration>,
    attempts: AtomicU32,
}

impl<L: Ledger> FlakyLedger<L> {
    pub fn new(inner: L) -> Self {
        Self {
            inner,
            failures_remaining: AtomicU32::new(0),
            delay: None,
            attempts: AtomicU32::new(0),
        }
    }

    /// Fail the next `n` appends with a persistence error
    pub fn failing_next(inner: L, n: u32) -> Self {
        let ledger = Self::new(inner);
        ledger.failures_remaining.store(n, Ordering::SeqCst);
        ledger
    }

    /// Sleep this long before every append (to trigger timeouts)
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_failures(&self, n: u32) {
        self.failures_remaining.store(n, Ordering::SeqCst);
    }

    /// Number of append calls seen, successful or not
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &L {
        &self.inner
    }
}

#[async_trait]
impl<L: Ledger> Ledger for FlakyLedger<L> {
    async fn append(&self, expense: NewExpense) -> Result<ExpenseRecord> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let should_fail = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(Error::Persistence("injected append failure".into()));
        }
        self.inner.append(expense).await
    }

    async fn query_by_owner_and_month(
        &self,
        owner: &UserIdentity,
        month: YearMonth,
    ) -> Result<Vec<ExpenseRecord>> {
        self.inner.query_by_owner_and_month(owner, month).await
    }

    async fn query_all_by_owner(&self, owner: &UserIdentity) -> Result<Vec<ExpenseRecord>> {
        self.inner.query_all_by_owner(owner).await
    }

    async fn owners_with_expenses(&self, month: YearMonth) -> Result<Vec<UserIdentity>> {
        self.inner.owners_with_expenses(month).await
    }
}
