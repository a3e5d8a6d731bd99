//! Health check handler

use std::sync::Arc;

use axum::{extract::State, Json};
use serde::Serialize;

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// Users with an unfinished expense draft
    pub pending_drafts: usize,
    pub extraction_backend: String,
    pub whatsapp_configured: bool,
}

/// GET /health - Liveness and a few counters
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        pending_drafts: state.engine.sessions().pending_count(),
        extraction_backend: state.engine.extractor().name().to_string(),
        whatsapp_configured: state.whatsapp.is_some(),
    })
}
