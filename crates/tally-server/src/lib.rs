//! Tally Web Server
//!
//! Axum-based HTTP surface for the Tally receipt expense bot:
//! - WhatsApp webhook (`/webhook`): subscription handshake and inbound messages
//! - Read-only report API (`/api`), guarded by bearer API keys
//! - Background staleness sweep and monthly report run
//!
//! Environment variables:
//! - `TALLY_API_KEYS`: comma-separated keys accepted as `Authorization: Bearer <key>`
//! - `WHATSAPP_VERIFY_TOKEN`: token expected in the webhook handshake

use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use tally_core::db::Database;
use tally_core::{
    ConversationEngine, EngineConfig, ExtractionBackend, ExtractionClient, LogNotifier, Notifier,
};

mod handlers;
mod scheduler;
pub mod whatsapp;

pub use handlers::dispatch;
pub use scheduler::{
    start_report_scheduler, start_sweep_scheduler, ReportScheduleConfig, DEFAULT_REPORT_HOUR,
};
pub use whatsapp::WhatsAppClient;

/// Authorization header for API key auth
const AUTHORIZATION_HEADER: &str = "authorization";

/// Server configuration
#[derive(Clone)]
pub struct ServerConfig {
    /// Whether `/api` routes require an API key (secure by default)
    pub require_auth: bool,
    /// API keys for the report API
    /// Format: "Bearer <key>" in Authorization header
    pub api_keys: Vec<String>,
    /// Token Meta must echo back during webhook verification
    pub verify_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            require_auth: true,
            api_keys: vec![],
            verify_token: None,
        }
    }
}

impl ServerConfig {
    /// Read API keys and the webhook verify token from the environment
    pub fn from_env() -> Self {
        let api_keys = std::env::var("TALLY_API_KEYS")
            .map(|raw| parse_api_keys(&raw))
            .unwrap_or_default();
        let verify_token = std::env::var("WHATSAPP_VERIFY_TOKEN")
            .ok()
            .filter(|t| !t.is_empty());

        Self {
            require_auth: true,
            api_keys,
            verify_token,
        }
    }
}

/// Split a comma-separated key list, dropping blanks
pub fn parse_api_keys(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(String::from)
        .collect()
}

/// Shared application state
pub struct AppState {
    pub db: Database,
    pub engine: Arc<ConversationEngine>,
    /// Outbound channel used by the engine and the report run
    pub notifier: Arc<dyn Notifier>,
    /// Present when WhatsApp credentials are configured
    pub whatsapp: Option<WhatsAppClient>,
    pub config: ServerConfig,
}

impl AppState {
    /// Wire the engine, extraction backend and WhatsApp client from the environment
    pub fn from_env(db: Database, config: ServerConfig) -> anyhow::Result<Self> {
        let engine_config = EngineConfig::from_env().context("Invalid engine configuration")?;

        let extractor = ExtractionClient::from_env().context(
            "No extraction backend configured (set OLLAMA_HOST, or AI_BACKEND=mock for development)",
        )?;
        info!(backend = extractor.name(), "Extraction backend configured");

        let whatsapp = WhatsAppClient::from_env();
        let notifier: Arc<dyn Notifier> = match &whatsapp {
            Some(client) => {
                info!(api_base = %client.api_base(), "WhatsApp delivery configured");
                Arc::new(client.clone())
            }
            None => {
                warn!("WhatsApp not configured (set WHATSAPP_ACCESS_TOKEN and WHATSAPP_PHONE_NUMBER_ID); replies will only be logged");
                Arc::new(LogNotifier)
            }
        };

        let engine = ConversationEngine::new(
            Arc::new(extractor),
            Arc::new(db.clone()),
            notifier.clone(),
            engine_config,
        );

        Ok(Self {
            db,
            engine: Arc::new(engine),
            notifier,
            whatsapp,
            config,
        })
    }
}

/// Authentication middleware for `/api` routes
///
/// API keys are compared in constant time.
async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    if !state.config.require_auth {
        return next.run(request).await;
    }

    let api_key_valid = request
        .headers()
        .get(AUTHORIZATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|auth| auth.strip_prefix("Bearer "))
        .map(|key| validate_api_key(key, &state.config.api_keys))
        .unwrap_or(false);

    if api_key_valid {
        debug!(path = %request.uri().path(), "Authenticated via API key");
        return next.run(request).await;
    }

    warn!(path = %request.uri().path(), "Unauthorized request - no valid API key");
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({
            "error": "Authentication required"
        })),
    )
        .into_response()
}

/// Compare two secrets in constant time (for equal lengths)
pub(crate) fn constant_time_eq(expected: &str, provided: &str) -> bool {
    use subtle::ConstantTimeEq;

    let expected = expected.as_bytes();
    let provided = provided.as_bytes();
    expected.len() == provided.len() && expected.ct_eq(provided).into()
}

fn validate_api_key(provided: &str, valid_keys: &[String]) -> bool {
    valid_keys.iter().any(|key| constant_time_eq(key, provided))
}

/// Create the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        .route("/users/:owner/summary", get(handlers::get_user_summary))
        .route("/users/:owner/yearly", get(handlers::get_user_yearly))
        .route("/users/:owner/expenses", get(handlers::list_user_expenses))
        .route("/reports/monthly", post(handlers::run_monthly_report))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .route(
            "/webhook",
            get(handlers::verify_webhook).post(handlers::receive_webhook),
        )
        .route("/health", get(handlers::health))
        .nest("/api", api_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Start the server and its background tasks
pub async fn serve(state: Arc<AppState>, host: &str, port: u16) -> anyhow::Result<()> {
    if !state.config.require_auth {
        warn!("⚠️  API authentication disabled - do not expose to network!");
    } else if state.config.api_keys.is_empty() {
        warn!("No TALLY_API_KEYS configured; every /api request will be rejected");
    }
    if state.config.verify_token.is_none() {
        warn!("WHATSAPP_VERIFY_TOKEN not set; webhook verification will always fail");
    }

    check_extraction_connection(state.engine.extractor().as_ref()).await;

    start_sweep_scheduler(state.engine.clone());
    start_report_scheduler(
        Arc::new(state.db.clone()),
        state.notifier.clone(),
        ReportScheduleConfig::from_env(),
    );

    let app = create_router(state);
    let addr = format!("{}:{}", host, port);

    info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Check and log extraction backend status
async fn check_extraction_connection(backend: &dyn ExtractionBackend) {
    if backend.health_check().await {
        info!("✅ Extraction backend connected: {}", backend.name());
    } else {
        warn!(
            "⚠️  Extraction backend configured but not responding: {} (receipts will fall back to manual entry)",
            backend.name()
        );
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Application error type with proper HTTP status codes
pub struct AppError {
    status: StatusCode,
    message: String,
    internal: Option<anyhow::Error>,
}

impl AppError {
    pub fn bad_request(msg: &str) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: msg.to_string(),
            internal: None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Log the full internal error if present
        if let Some(err) = &self.internal {
            error!(error = %err, "Internal error");
        }

        let body = Json(serde_json::json!({
            "error": self.message
        }));

        (self.status, body).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        let err = err.into();
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            // Return generic message to client
            message: "An internal error occurred".to_string(),
            // Keep full error for logging
            internal: Some(err),
        }
    }
}

#[cfg(test)]
mod tests;
