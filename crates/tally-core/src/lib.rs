//! Tally Core Library
//!
//! Shared functionality for the Tally receipt expense bot:
//! - Conversation engine driving each user's pending transaction
//! - Per-user session store with staleness sweeping
//! - Pluggable receipt extraction backends (Ollama, mock)
//! - Amount and confirmation parsing for typed replies
//! - POS/ATM rate resolution into MWK
//! - Append-only expense ledger on SQLite, with CSV export
//! - Monthly and yearly spending summaries

pub mod ai;
pub mod config;
pub mod conversation;
pub mod db;
pub mod delivery;
pub mod error;
pub mod input;
pub mod ledger;
pub mod models;
pub mod rates;
pub mod reporting;
pub mod session;

/// Test utilities including mock Ollama server
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use ai::{ExtractionBackend, ExtractionClient, MockBackend, OllamaBackend};
pub use config::EngineConfig;
pub use conversation::{ConversationEngine, InboundEvent, Payload, Reply};
pub use db::{Database, ExportFilter, UserContact};
pub use delivery::{Button, LogNotifier, Notifier};
pub use error::{Error, Result};
pub use ledger::Ledger;
pub use rates::{Conversion, RateResolver};
pub use reporting::ReportRunStats;
pub use session::SessionStore;
