//! Error types for Tally

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Database pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// The OCR or field-extraction step failed
    #[error("Extraction failed: {0}")]
    Extraction(String),

    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: &'static str, seconds: u64 },

    /// Ledger append could not be made durable
    #[error("Persistence failure: {0}")]
    Persistence(String),

    /// Rate resolution was asked for a class it does not know. Callers must
    /// only pass validated rate classes, so this indicates a bug.
    #[error("Invalid rate class: {0}")]
    InvalidRateClass(String),

    #[error("Delivery failed: {0}")]
    Delivery(String),

    /// Another event for the same user is still being processed
    #[error("Still processing a previous message for {0}")]
    Busy(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl Error {
    /// Whether the failure is transient and the same request may be retried
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::Persistence(_)
                | Self::Pool(_)
                | Self::Http(_)
                | Self::Busy(_)
                | Self::Join(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
