//! WhatsApp webhook handlers
//!
//! `GET /webhook` answers Meta's subscription handshake. `POST /webhook`
//! acknowledges every notification with 200 straight away and processes each
//! message on its own task; the conversation engine serializes events per user.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::whatsapp::{extract_messages, InboundContent, InboundMessage, WebhookPayload};
use crate::{constant_time_eq, AppState};
use tally_core::{InboundEvent, Payload};

/// Subscription handshake parameters
#[derive(Debug, Deserialize)]
pub struct VerifyQuery {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

/// GET /webhook - Echo the challenge when the verify token matches
pub async fn verify_webhook(
    State(state): State<Arc<AppState>>,
    Query(params): Query<VerifyQuery>,
) -> Response {
    let token_ok = match (
        state.config.verify_token.as_deref(),
        params.verify_token.as_deref(),
    ) {
        (Some(expected), Some(provided)) => constant_time_eq(expected, provided),
        _ => false,
    };

    if params.mode.as_deref() == Some("subscribe") && token_ok {
        info!("Webhook verification successful");
        (StatusCode::OK, params.challenge.unwrap_or_default()).into_response()
    } else {
        warn!(mode = ?params.mode, "Webhook verification failed");
        (StatusCode::FORBIDDEN, "Verification failed").into_response()
    }
}

/// POST /webhook - Accept a notification and process its messages in the background
pub async fn receive_webhook(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Json<serde_json::Value> {
    let payload: WebhookPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(error = %e, bytes = body.len(), "Ignoring malformed webhook body");
            return Json(serde_json::json!({ "status": "ok", "messages": 0 }));
        }
    };

    let handles = dispatch(&state, &payload);
    debug!(messages = handles.len(), "Webhook accepted");
    Json(serde_json::json!({ "status": "ok", "messages": handles.len() }))
}

/// Spawn one task per message in the notification
pub fn dispatch(state: &Arc<AppState>, payload: &WebhookPayload) -> Vec<JoinHandle<()>> {
    extract_messages(payload)
        .into_iter()
        .map(|message| {
            let state = state.clone();
            tokio::spawn(async move { handle_message(&state, message).await })
        })
        .collect()
}

async fn handle_message(state: &AppState, message: InboundMessage) {
    let received_at = Utc::now();
    let sent_at = message.sent_at.unwrap_or(received_at);
    info!(
        owner = %message.from,
        message_id = %message.id,
        kind = message.content.kind(),
        lag_secs = (received_at - sent_at).num_seconds(),
        "Inbound message"
    );

    match state.db.record_contact(&message.from, sent_at) {
        Ok(true) => info!(owner = %message.from, "First contact from new user"),
        Ok(false) => {}
        Err(e) => warn!(owner = %message.from, error = %e, "Failed to record contact"),
    }

    if let Some(client) = &state.whatsapp {
        if let Err(e) = client.mark_as_read(&message.id).await {
            debug!(message_id = %message.id, error = %e, "Failed to mark message as read");
        }
    }

    let payload = match message.content {
        InboundContent::Text(text) => Payload::Text(text),
        InboundContent::Selection(id) => Payload::Selection(id),
        InboundContent::Unsupported(kind) => Payload::Unsupported(kind),
        InboundContent::Image { media_id } => Payload::Image(fetch_image(state, &media_id).await),
    };

    state
        .engine
        .process(InboundEvent::new(message.from, payload))
        .await;
}

/// Download a receipt image. An unreadable image becomes empty bytes, which
/// the engine treats as a failed extraction and asks for the fields by hand.
async fn fetch_image(state: &AppState, media_id: &str) -> Vec<u8> {
    let Some(client) = &state.whatsapp else {
        warn!(media_id = %media_id, "Image received but WhatsApp client is not configured");
        return Vec::new();
    };
    match client.download_media(media_id).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(media_id = %media_id, error = %e, "Media download failed");
            Vec::new()
        }
    }
}
