//! WhatsApp Cloud API integration
//!
//! Inbound: webhook payload types and their conversion into [`InboundMessage`]s.
//! Outbound: a small Graph API client for text and reply-button messages,
//! media downloads and read receipts. The client is also the engine's [`Notifier`].
//!
//! Environment variables:
//! - `WHATSAPP_ACCESS_TOKEN`: Graph API bearer token (required)
//! - `WHATSAPP_PHONE_NUMBER_ID`: sending phone number id (required)
//! - `WHATSAPP_API_BASE`: API root (default: https://graph.facebook.com/v22.0)

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use tally_core::models::UserIdentity;
use tally_core::{Button, Error, Notifier, Result};

/// Default Graph API root
pub const DEFAULT_API_BASE: &str = "https://graph.facebook.com/v22.0";

/// WhatsApp rejects text bodies longer than this
const MAX_TEXT_CHARS: usize = 4096;

/// Reply-button message limits
const MAX_BUTTON_BODY_CHARS: usize = 1024;
const MAX_BUTTONS: usize = 3;
const MAX_BUTTON_TITLE_CHARS: usize = 20;

// ============================================================================
// Inbound payloads
// ============================================================================

/// Top-level webhook notification
#[derive(Debug, Default, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub object: Option<String>,
    #[serde(default)]
    pub entry: Vec<Entry>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Entry {
    #[serde(default)]
    pub changes: Vec<Change>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Change {
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub value: ChangeValue,
}

/// Messages and delivery statuses; status updates are ignored
#[derive(Debug, Default, Deserialize)]
pub struct ChangeValue {
    #[serde(default)]
    pub messages: Vec<Message>,
}

#[derive(Debug, Deserialize)]
pub struct Message {
    pub from: String,
    pub id: String,
    /// Unix seconds, as a string
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub text: Option<TextBody>,
    #[serde(default)]
    pub image: Option<MediaRef>,
    #[serde(default)]
    pub interactive: Option<Interactive>,
    #[serde(default)]
    pub button: Option<ButtonBody>,
}

#[derive(Debug, Deserialize)]
pub struct TextBody {
    pub body: String,
}

#[derive(Debug, Deserialize)]
pub struct MediaRef {
    pub id: String,
    #[serde(default)]
    pub mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Interactive {
    #[serde(default)]
    pub button_reply: Option<ReplyRef>,
    #[serde(default)]
    pub list_reply: Option<ReplyRef>,
}

#[derive(Debug, Deserialize)]
pub struct ReplyRef {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
}

/// Quick-reply template button
#[derive(Debug, Deserialize)]
pub struct ButtonBody {
    #[serde(default)]
    pub payload: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

/// What a user sent, before any media is fetched
#[derive(Debug, Clone, PartialEq)]
pub enum InboundContent {
    Text(String),
    Image { media_id: String },
    /// Button or list reply id
    Selection(String),
    Unsupported(String),
}

impl InboundContent {
    pub fn kind(&self) -> &str {
        match self {
            Self::Text(_) => "text",
            Self::Image { .. } => "image",
            Self::Selection(_) => "selection",
            Self::Unsupported(kind) => kind,
        }
    }
}

/// One user message lifted out of a webhook notification
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub id: String,
    pub from: UserIdentity,
    /// When WhatsApp says the user sent it
    pub sent_at: Option<DateTime<Utc>>,
    pub content: InboundContent,
}

impl Message {
    fn content(&self) -> InboundContent {
        match self.kind.as_str() {
            "text" => match &self.text {
                Some(text) => InboundContent::Text(text.body.clone()),
                None => InboundContent::Unsupported("text".to_string()),
            },
            "image" => match &self.image {
                Some(image) => InboundContent::Image {
                    media_id: image.id.clone(),
                },
                None => InboundContent::Unsupported("image".to_string()),
            },
            "interactive" => self
                .interactive
                .as_ref()
                .and_then(|i| i.button_reply.as_ref().or(i.list_reply.as_ref()))
                .map(|reply| InboundContent::Selection(reply.id.clone()))
                .unwrap_or_else(|| InboundContent::Unsupported("interactive".to_string())),
            "button" => self
                .button
                .as_ref()
                .and_then(|b| b.payload.clone().or_else(|| b.text.clone()))
                .map(InboundContent::Selection)
                .unwrap_or_else(|| InboundContent::Unsupported("button".to_string())),
            "" => InboundContent::Unsupported("unknown".to_string()),
            other => InboundContent::Unsupported(other.to_string()),
        }
    }

    fn sent_at(&self) -> Option<DateTime<Utc>> {
        let secs = self.timestamp.as_deref()?.parse::<i64>().ok()?;
        Utc.timestamp_opt(secs, 0).single()
    }
}

/// Flatten every user message in a notification, in delivery order
pub fn extract_messages(payload: &WebhookPayload) -> Vec<InboundMessage> {
    payload
        .entry
        .iter()
        .flat_map(|entry| &entry.changes)
        .flat_map(|change| &change.value.messages)
        .map(|message| InboundMessage {
            id: message.id.clone(),
            from: UserIdentity::new(message.from.clone()),
            sent_at: message.sent_at(),
            content: message.content(),
        })
        .collect()
}

// ============================================================================
// Outbound client
// ============================================================================

#[derive(Serialize)]
struct SendTextRequest<'a> {
    messaging_product: &'static str,
    recipient_type: &'static str,
    to: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    text: TextContent,
}

#[derive(Serialize)]
struct TextContent {
    preview_url: bool,
    body: String,
}

#[derive(Serialize)]
struct SendInteractiveRequest<'a> {
    messaging_product: &'static str,
    recipient_type: &'static str,
    to: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    interactive: InteractiveContent,
}

#[derive(Serialize)]
struct InteractiveContent {
    #[serde(rename = "type")]
    kind: &'static str,
    body: InteractiveBody,
    action: ButtonAction,
}

#[derive(Serialize)]
struct InteractiveBody {
    text: String,
}

#[derive(Serialize)]
struct ButtonAction {
    buttons: Vec<ReplyButton>,
}

#[derive(Serialize)]
struct ReplyButton {
    #[serde(rename = "type")]
    kind: &'static str,
    reply: ReplyButtonContent,
}

#[derive(Serialize)]
struct ReplyButtonContent {
    id: &'static str,
    title: String,
}

impl<'a> SendInteractiveRequest<'a> {
    fn buttons(to: &'a str, body: &str, buttons: &[Button]) -> Self {
        Self {
            messaging_product: "whatsapp",
            recipient_type: "individual",
            to,
            kind: "interactive",
            interactive: InteractiveContent {
                kind: "button",
                body: InteractiveBody {
                    text: body.to_string(),
                },
                action: ButtonAction {
                    buttons: buttons
                        .iter()
                        .take(MAX_BUTTONS)
                        .map(|b| ReplyButton {
                            kind: "reply",
                            reply: ReplyButtonContent {
                                id: b.id,
                                title: b.title.chars().take(MAX_BUTTON_TITLE_CHARS).collect(),
                            },
                        })
                        .collect(),
                },
            },
        }
    }
}

#[derive(Serialize)]
struct MarkReadRequest<'a> {
    messaging_product: &'static str,
    status: &'static str,
    message_id: &'a str,
}

#[derive(Deserialize)]
struct MediaInfo {
    url: String,
}

/// WhatsApp Cloud API client
#[derive(Clone)]
pub struct WhatsAppClient {
    http: Client,
    api_base: String,
    access_token: String,
    phone_number_id: String,
}

impl WhatsAppClient {
    pub fn new(api_base: &str, access_token: &str, phone_number_id: &str) -> Self {
        Self {
            http: Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            access_token: access_token.to_string(),
            phone_number_id: phone_number_id.to_string(),
        }
    }

    /// Create from environment variables
    ///
    /// Returns None unless both the access token and phone number id are set.
    pub fn from_env() -> Option<Self> {
        let token = std::env::var("WHATSAPP_ACCESS_TOKEN").ok()?;
        let phone_number_id = std::env::var("WHATSAPP_PHONE_NUMBER_ID").ok()?;
        let api_base =
            std::env::var("WHATSAPP_API_BASE").unwrap_or_else(|_| DEFAULT_API_BASE.to_string());
        Some(Self::new(&api_base, &token, &phone_number_id))
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    fn messages_url(&self) -> String {
        format!("{}/{}/messages", self.api_base, self.phone_number_id)
    }

    async fn post_messages<T: Serialize>(&self, body: &T) -> Result<()> {
        let response = self
            .http
            .post(self.messages_url())
            .bearer_auth(&self.access_token)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::Delivery(format!(
                "WhatsApp API returned {}: {}",
                status, detail
            )));
        }
        Ok(())
    }

    /// Send a plain text message
    pub async fn send_text(&self, to: &str, body: &str) -> Result<()> {
        let body: String = body.chars().take(MAX_TEXT_CHARS).collect();
        let request = SendTextRequest {
            messaging_product: "whatsapp",
            recipient_type: "individual",
            to,
            kind: "text",
            text: TextContent {
                preview_url: false,
                body,
            },
        };
        self.post_messages(&request).await?;
        debug!(to = %to, "WhatsApp message sent");
        Ok(())
    }

    /// Send a message with reply buttons
    ///
    /// Bodies too long for an interactive message go out as plain text; the
    /// user can still type the answer.
    pub async fn send_buttons(&self, to: &str, body: &str, buttons: &[Button]) -> Result<()> {
        if buttons.is_empty() || body.chars().count() > MAX_BUTTON_BODY_CHARS {
            return self.send_text(to, body).await;
        }
        let request = SendInteractiveRequest::buttons(to, body, buttons);
        self.post_messages(&request).await?;
        debug!(to = %to, buttons = buttons.len(), "WhatsApp button message sent");
        Ok(())
    }

    /// Show the blue ticks for a received message
    pub async fn mark_as_read(&self, message_id: &str) -> Result<()> {
        let request = MarkReadRequest {
            messaging_product: "whatsapp",
            status: "read",
            message_id,
        };
        self.post_messages(&request).await
    }

    /// Download a media object: resolve its URL, then fetch the bytes
    pub async fn download_media(&self, media_id: &str) -> Result<Vec<u8>> {
        let info: MediaInfo = self
            .http
            .get(format!("{}/{}", self.api_base, media_id))
            .bearer_auth(&self.access_token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let bytes = self
            .http
            .get(&info.url)
            .bearer_auth(&self.access_token)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        debug!(media_id = %media_id, bytes = bytes.len(), "Media downloaded");
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl Notifier for WhatsAppClient {
    async fn send(&self, recipient: &UserIdentity, message: &str) -> Result<()> {
        self.send_text(recipient.as_str(), message).await
    }

    async fn send_with_buttons(
        &self,
        recipient: &UserIdentity,
        message: &str,
        buttons: &[Button],
    ) -> Result<()> {
        self.send_buttons(recipient.as_str(), message, buttons).await
    }
}
