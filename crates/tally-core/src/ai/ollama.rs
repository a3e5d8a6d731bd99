//! Ollama backend implementation
//!
//! Uses a vision model (`/api/generate` with base64 images) to transcribe the
//! receipt and a text model to turn the transcription into JSON fields.

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::ExtractedFields;

use super::parsing::parse_extracted_fields;
use super::ExtractionBackend;

const TRANSCRIBE_PROMPT: &str = "Transcribe all text on this receipt exactly as printed, \
line by line. Keep numbers, currency symbols and Turkish characters (ç, ğ, ı, ö, ş, ü) as \
they appear. Output only the transcription.";

const EXTRACT_PROMPT: &str = r#"You read OCR text from shop receipts, mostly Turkish.
Extract the merchant, the grand total and the purchase date and return ONLY a JSON object:

{"merchant_name": "store name or null", "total_amount": 0.0, "currency": "TRY", "date": "YYYY-MM-DD or null", "confidence": "high|medium|low"}

Rules:
- The grand total is usually labelled TOPLAM, GENEL TOPLAM or TUTAR; ignore KDV (tax) lines
- Convert Turkish number format (25,40 or 1.234,56) to a decimal number (25.40, 1234.56)
- Use null for anything you cannot find; never guess an amount
- currency is an ISO code; use TRY when the receipt shows TL or ₺
- date is the purchase date (TARİH); Turkish receipts print it as DD.MM.YYYY
- confidence is how clearly the total could be read

OCR text:
"#;

/// Ollama extraction backend
#[derive(Clone)]
pub struct OllamaBackend {
    http_client: Client,
    base_url: String,
    model: String,
    vision_model: String,
}

impl OllamaBackend {
    pub fn new(base_url: &str, model: &str, vision_model: &str) -> Self {
        Self {
            http_client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            vision_model: vision_model.to_string(),
        }
    }

    /// Create from environment variables
    pub fn from_env() -> Option<Self> {
        let host = std::env::var("OLLAMA_HOST").ok()?;
        let model = std::env::var("OLLAMA_MODEL").unwrap_or_else(|_| "llama3.2".to_string());
        let vision_model =
            std::env::var("OLLAMA_VISION_MODEL").unwrap_or_else(|_| "llava".to_string());
        Some(Self::new(&host, &model, &vision_model))
    }

    pub fn host(&self) -> &str {
        &self.base_url
    }

    async fn generate(&self, request: &GenerateRequest<'_>) -> Result<String> {
        let response = self
            .http_client
            .post(format!("{}/api/generate", self.base_url))
            .json(request)
            .send()
            .await?
            .error_for_status()?;

        let body: GenerateResponse = response.json().await?;
        Ok(body.response)
    }
}

/// Request to Ollama API (`images` only for vision models)
#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    images: Vec<String>,
    stream: bool,
}

/// Response from Ollama API
#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[async_trait]
impl ExtractionBackend for OllamaBackend {
    async fn extract_text(&self, image: &[u8]) -> Result<String> {
        let request = GenerateRequest {
            model: &self.vision_model,
            prompt: TRANSCRIBE_PROMPT.to_string(),
            images: vec![base64::engine::general_purpose::STANDARD.encode(image)],
            stream: false,
        };

        let text = self.generate(&request).await?;
        debug!(chars = text.len(), "Ollama transcription received");

        if text.trim().is_empty() {
            return Err(Error::Extraction("Vision model returned no text".into()));
        }
        Ok(text)
    }

    async fn extract_fields(&self, text: &str) -> Result<ExtractedFields> {
        let request = GenerateRequest {
            model: &self.model,
            prompt: format!("{}{}", EXTRACT_PROMPT, text),
            images: Vec::new(),
            stream: false,
        };

        let response = self.generate(&request).await?;
        debug!("Ollama extraction response: {}", response);

        parse_extracted_fields(&response)
    }

    async fn health_check(&self) -> bool {
        match self
            .http_client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_trims_trailing_slash() {
        let backend = OllamaBackend::new("http://localhost:11434/", "llama3.2", "llava");
        assert_eq!(backend.host(), "http://localhost:11434");
    }

    #[test]
    fn test_text_request_omits_images() {
        let request = GenerateRequest {
            model: "llama3.2",
            prompt: "hi".into(),
            images: Vec::new(),
            stream: false,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("images").is_none());
        assert_eq!(json["stream"], false);
    }

    #[tokio::test]
    async fn test_two_step_extraction_against_mock_server() {
        use crate::test_utils::{MockOllamaServer, MOCK_RECEIPT_TEXT};

        let server = MockOllamaServer::start().await;
        let backend = OllamaBackend::new(&server.url(), "llama3.2", "llava");

        assert!(backend.health_check().await);

        let text = backend.extract_text(b"fake image bytes").await.unwrap();
        assert_eq!(text, MOCK_RECEIPT_TEXT);

        let fields = backend.extract_fields(&text).await.unwrap();
        assert_eq!(fields.amount, Some(250.0));
        assert_eq!(fields.merchant.as_deref(), Some("Migros"));
        assert_eq!(fields.currency_hint.as_deref(), Some("TRY"));
        assert_eq!(fields.receipt_date, chrono::NaiveDate::from_ymd_opt(2025, 6, 12));
        assert_eq!(fields.confidence, Some(crate::models::Confidence::High));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_unhealthy() {
        let backend = OllamaBackend::new("http://127.0.0.1:9", "llama3.2", "llava");
        assert!(!backend.health_check().await);
        assert!(backend.extract_text(b"img").await.is_err());
    }
}
