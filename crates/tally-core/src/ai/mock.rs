//! Mock backend for testing
//!
//! Returns canned extraction results. Useful for unit tests and for running
//! the bot without a model server (`AI_BACKEND=mock`).

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::models::{Confidence, ExtractedFields};

use super::ExtractionBackend;

const SAMPLE_RECEIPT: &str = "MIGROS TICARET A.S.\nEKMEK 1 x 15,00\nSUT 1 x 35,00\nTOPLAM *250,00\nKDV *22,73";

/// Mock extraction backend
///
/// By default every image reads as a 250.00 TRY Migros receipt.
#[derive(Clone)]
pub struct MockBackend {
    /// Whether health_check should return true
    pub healthy: bool,
    pub text: String,
    pub fields: ExtractedFields,
    /// Fail the transcription step
    pub fail_text: bool,
    /// Fail the field extraction step
    pub fail_fields: bool,
    /// Artificial latency added to each call
    pub delay: Option<Duration>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            healthy: true,
            text: SAMPLE_RECEIPT.to_string(),
            fields: ExtractedFields {
                amount: Some(250.0),
                merchant: Some("Migros".to_string()),
                currency_hint: Some("TRY".to_string()),
                receipt_date: None,
                confidence: Some(Confidence::High),
            },
            fail_text: false,
            fail_fields: false,
            delay: None,
        }
    }

    /// Return these fields for every receipt
    pub fn with_fields(fields: ExtractedFields) -> Self {
        Self {
            fields,
            ..Self::new()
        }
    }

    /// Every receipt is unreadable (no fields, no error)
    pub fn empty() -> Self {
        Self::with_fields(ExtractedFields::default())
    }

    /// Every call fails
    pub fn failing() -> Self {
        Self {
            healthy: false,
            fail_text: true,
            fail_fields: true,
            ..Self::new()
        }
    }

    pub fn unhealthy() -> Self {
        Self {
            healthy: false,
            ..Self::new()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl ExtractionBackend for MockBackend {
    async fn extract_text(&self, image: &[u8]) -> Result<String> {
        self.pause().await;
        if self.fail_text {
            return Err(Error::Extraction("mock transcription failure".into()));
        }
        if image.is_empty() {
            return Err(Error::Extraction("empty image".into()));
        }
        Ok(self.text.clone())
    }

    async fn extract_fields(&self, _text: &str) -> Result<ExtractedFields> {
        self.pause().await;
        if self.fail_fields {
            return Err(Error::Extraction("mock field extraction failure".into()));
        }
        Ok(self.fields.clone())
    }

    async fn health_check(&self) -> bool {
        self.healthy
    }

    fn name(&self) -> &str {
        "mock"
    }
}
