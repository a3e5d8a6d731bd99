//! Receipt extraction backends
//!
//! Extraction is a two-step pipeline: a vision model transcribes the receipt
//! photo to text, then a text model pulls the amount, merchant and currency
//! out of that text. Both steps are best effort; a missing field is a normal
//! result, not an error.
//!
//! # Configuration
//!
//! Environment variables:
//! - `AI_BACKEND`: Backend to use (ollama, mock). Default: ollama
//! - `OLLAMA_HOST`: Ollama server URL (required for ollama backend)
//! - `OLLAMA_MODEL`: Text model for field extraction (default: llama3.2)
//! - `OLLAMA_VISION_MODEL`: Vision model for transcription (default: llava)

mod mock;
mod ollama;
pub mod parsing;

pub use mock::MockBackend;
pub use ollama::OllamaBackend;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::ExtractedFields;

/// Interface to an extraction pipeline
#[async_trait]
pub trait ExtractionBackend: Send + Sync {
    /// Transcribe a receipt image to raw text
    async fn extract_text(&self, image: &[u8]) -> Result<String>;

    /// Extract structured fields from transcribed receipt text
    async fn extract_fields(&self, text: &str) -> Result<ExtractedFields>;

    /// Check if the backend is reachable
    async fn health_check(&self) -> bool;

    /// Backend name (for logging)
    fn name(&self) -> &str;
}

/// Concrete extraction client
#[derive(Clone)]
pub enum ExtractionClient {
    Ollama(OllamaBackend),
    Mock(MockBackend),
}

impl ExtractionClient {
    /// Create a client from environment variables
    ///
    /// Returns None if the selected backend is not configured.
    pub fn from_env() -> Option<Self> {
        let backend = std::env::var("AI_BACKEND").unwrap_or_else(|_| "ollama".to_string());

        match backend.to_lowercase().as_str() {
            "ollama" => OllamaBackend::from_env().map(ExtractionClient::Ollama),
            "mock" => Some(ExtractionClient::Mock(MockBackend::new())),
            _ => {
                tracing::warn!(backend = %backend, "Unknown AI_BACKEND, falling back to ollama");
                OllamaBackend::from_env().map(ExtractionClient::Ollama)
            }
        }
    }

    pub fn mock() -> Self {
        ExtractionClient::Mock(MockBackend::new())
    }
}

#[async_trait]
impl ExtractionBackend for ExtractionClient {
    async fn extract_text(&self, image: &[u8]) -> Result<String> {
        match self {
            ExtractionClient::Ollama(b) => b.extract_text(image).await,
            ExtractionClient::Mock(b) => b.extract_text(image).await,
        }
    }

    async fn extract_fields(&self, text: &str) -> Result<ExtractedFields> {
        match self {
            ExtractionClient::Ollama(b) => b.extract_fields(text).await,
            ExtractionClient::Mock(b) => b.extract_fields(text).await,
        }
    }

    async fn health_check(&self) -> bool {
        match self {
            ExtractionClient::Ollama(b) => b.health_check().await,
            ExtractionClient::Mock(b) => b.health_check().await,
        }
    }

    fn name(&self) -> &str {
        match self {
            ExtractionClient::Ollama(b) => b.name(),
            ExtractionClient::Mock(b) => b.name(),
        }
    }
}
