//! Server API tests

use super::*;
use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use chrono::{TimeZone, Utc};
use http_body_util::BodyExt;
use std::sync::Mutex;
use tally_core::db::Database;
use tally_core::models::{Currency, ExpenseSource, NewExpense, RateClass, UserIdentity};
use tally_core::test_utils::RecordingNotifier;
use tally_core::MockBackend;
use tower::ServiceExt;

use crate::whatsapp::WebhookPayload;

const TEST_KEY: &str = "test-key";
const VERIFY_TOKEN: &str = "verify-me";
const USER: &str = "905551112233";

fn build_state(
    extractor: MockBackend,
    notifier: Arc<dyn Notifier>,
    whatsapp: Option<WhatsAppClient>,
) -> Arc<AppState> {
    let db = Database::in_memory().unwrap();
    let engine = ConversationEngine::new(
        Arc::new(extractor),
        Arc::new(db.clone()),
        notifier.clone(),
        EngineConfig::default(),
    );
    Arc::new(AppState {
        db,
        engine: Arc::new(engine),
        notifier,
        whatsapp,
        config: ServerConfig {
            require_auth: true,
            api_keys: vec![TEST_KEY.to_string()],
            verify_token: Some(VERIFY_TOKEN.to_string()),
        },
    })
}

fn setup_test_state() -> (Arc<AppState>, Arc<RecordingNotifier>) {
    let notifier = Arc::new(RecordingNotifier::new());
    let state = build_state(MockBackend::new(), notifier.clone(), None);
    (state, notifier)
}

async fn get_body_json(response: axum::response::Response) -> serde_json::Value {
    let body = response.into_body();
    let bytes = body.collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn get_body_text(response: axum::response::Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn authed_get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("authorization", format!("Bearer {}", TEST_KEY))
        .body(Body::empty())
        .unwrap()
}

fn seed_expense(db: &Database, owner: &str, day: u32, merchant: &str, amount: f64) {
    db.append_expense(&NewExpense {
        owner: UserIdentity::new(owner),
        amount_original: amount,
        currency: Currency::Try,
        rate_class: RateClass::Pos,
        rate_used: 51.0,
        merchant: merchant.to_string(),
        source: ExpenseSource::Receipt,
        receipt_hash: None,
        expense_date: None,
        confidence: None,
        idempotency_key: None,
        committed_at: Utc.with_ymd_and_hms(2025, 6, day, 12, 0, 0).unwrap(),
    })
    .unwrap();
}

fn text_payload(from: &str, id: &str, body: &str) -> WebhookPayload {
    serde_json::from_value(serde_json::json!({
        "object": "whatsapp_business_account",
        "entry": [{"changes": [{"field": "messages", "value": {
            "messages": [{"from": from, "id": id, "timestamp": "1718000000",
                          "type": "text", "text": {"body": body}}]
        }}]}]
    }))
    .unwrap()
}

fn image_payload(from: &str, id: &str, media_id: &str) -> WebhookPayload {
    serde_json::from_value(serde_json::json!({
        "entry": [{"changes": [{"value": {
            "messages": [{"from": from, "id": id, "type": "image",
                          "image": {"id": media_id, "mime_type": "image/jpeg"}}]
        }}]}]
    }))
    .unwrap()
}

async fn dispatch_and_wait(state: &Arc<AppState>, payload: &WebhookPayload) {
    for handle in dispatch(state, payload) {
        handle.await.unwrap();
    }
}

// ========== Health ==========

#[tokio::test]
async fn test_health() {
    let (state, _) = setup_test_state();
    let app = create_router(state);

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["pending_drafts"], 0);
    assert_eq!(json["extraction_backend"], "mock");
    assert_eq!(json["whatsapp_configured"], false);
}

// ========== Webhook verification ==========

#[tokio::test]
async fn test_webhook_verification_echoes_challenge() {
    let (state, _) = setup_test_state();
    let app = create_router(state);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/webhook?hub.mode=subscribe&hub.verify_token=verify-me&hub.challenge=1158201444")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(get_body_text(response).await, "1158201444");
}

#[tokio::test]
async fn test_webhook_verification_rejects_bad_token() {
    let (state, _) = setup_test_state();

    for uri in [
        "/webhook?hub.mode=subscribe&hub.verify_token=wrong&hub.challenge=1",
        "/webhook?hub.mode=unsubscribe&hub.verify_token=verify-me&hub.challenge=1",
        "/webhook?hub.challenge=1",
    ] {
        let response = create_router(state.clone())
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN, "uri {}", uri);
    }
}

// ========== Webhook messages ==========

#[tokio::test]
async fn test_webhook_post_always_acknowledges() {
    let (state, _) = setup_test_state();

    let response = create_router(state.clone())
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhook")
                .header("content-type", "application/json")
                .body(Body::from("not json"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(get_body_json(response).await["messages"], 0);

    let body = serde_json::json!({
        "entry": [{"changes": [{"value": {"statuses": [{"id": "wamid.1", "status": "delivered"}]}}]}]
    });
    let response = create_router(state)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhook")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(get_body_json(response).await["messages"], 0);
}

#[tokio::test]
async fn test_webhook_post_counts_messages() {
    let (state, _) = setup_test_state();
    let body = serde_json::json!({
        "entry": [{"changes": [{"value": {"messages": [
            {"from": USER, "id": "wamid.1", "type": "text", "text": {"body": "hi"}}
        ]}}]}]
    });

    let response = create_router(state)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhook")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(get_body_json(response).await["messages"], 1);
}

#[tokio::test]
async fn test_text_message_reaches_engine_and_records_contact() {
    let (state, notifier) = setup_test_state();

    dispatch_and_wait(&state, &text_payload(USER, "wamid.1", "hello")).await;

    let messages = notifier.messages_for(&UserIdentity::new(USER));
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("Welcome to Tally"));

    let contact = state
        .db
        .get_user_contact(&UserIdentity::new(USER))
        .unwrap()
        .unwrap();
    assert_eq!(contact.message_count, 1);
    assert_eq!(contact.first_seen_at.timestamp(), 1718000000);
}

#[tokio::test]
async fn test_receipt_flow_over_webhook() {
    let (state, notifier) = setup_test_state();
    let owner = UserIdentity::new(USER);

    // No WhatsApp client: the image cannot be fetched, so the draft asks for
    // the fields by hand
    dispatch_and_wait(&state, &image_payload(USER, "wamid.1", "MEDIA1")).await;
    dispatch_and_wait(&state, &text_payload(USER, "wamid.2", "250")).await;
    dispatch_and_wait(&state, &text_payload(USER, "wamid.3", "Migros")).await;
    dispatch_and_wait(&state, &text_payload(USER, "wamid.4", "POS")).await;

    let records = state.db.list_expenses_for_owner(&owner).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].converted_amount, 12750.0);
    assert_eq!(records[0].merchant, "Migros");

    let messages = notifier.messages_for(&owner);
    assert_eq!(messages.len(), 4);
    assert!(messages[3].contains("Expense saved"));
}

// ========== Report API ==========

#[tokio::test]
async fn test_api_requires_key() {
    let (state, _) = setup_test_state();

    let response = create_router(state.clone())
        .oneshot(
            Request::builder()
                .uri("/api/users/alice/summary")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = create_router(state)
        .oneshot(
            Request::builder()
                .uri("/api/users/alice/summary")
                .header("authorization", "Bearer nope")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_monthly_summary_endpoint() {
    let (state, _) = setup_test_state();
    seed_expense(&state.db, "alice", 3, "Migros", 100.0);
    seed_expense(&state.db, "alice", 5, "BIM", 50.0);
    seed_expense(&state.db, "bob", 5, "A101", 10.0);

    let response = create_router(state)
        .oneshot(authed_get("/api/users/alice/summary?month=2025-06"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["month"], "2025-06");
    assert_eq!(json["count"], 2);
    assert_eq!(json["total_converted"], 7650.0);
    assert_eq!(json["by_merchant"][0]["merchant"], "Migros");
}

#[tokio::test]
async fn test_summary_rejects_bad_month() {
    let (state, _) = setup_test_state();

    let response = create_router(state)
        .oneshot(authed_get("/api/users/alice/summary?month=June"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = get_body_json(response).await;
    assert!(json["error"].as_str().unwrap().contains("YYYY-MM"));
}

#[tokio::test]
async fn test_expenses_endpoint() {
    let (state, _) = setup_test_state();
    seed_expense(&state.db, "alice", 3, "Migros", 100.0);
    seed_expense(&state.db, "alice", 4, "BIM", 20.0);

    let response = create_router(state.clone())
        .oneshot(authed_get("/api/users/alice/expenses"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json.as_array().unwrap().len(), 2);
    assert_eq!(json[0]["rate_class"], "POS");

    let response = create_router(state)
        .oneshot(authed_get("/api/users/alice/expenses?month=2025-07"))
        .await
        .unwrap();
    let json = get_body_json(response).await;
    assert!(json.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_yearly_endpoint() {
    let (state, _) = setup_test_state();
    seed_expense(&state.db, "alice", 3, "Migros", 100.0);

    let response = create_router(state)
        .oneshot(authed_get("/api/users/alice/yearly?year=2025"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["year"], 2025);
    assert_eq!(json["count"], 1);
}

#[tokio::test]
async fn test_manual_monthly_report_run() {
    let (state, notifier) = setup_test_state();
    seed_expense(&state.db, "alice", 3, "Migros", 100.0);
    seed_expense(&state.db, "bob", 4, "BIM", 20.0);

    let response = create_router(state)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/reports/monthly?month=2025-06")
                .header("authorization", format!("Bearer {}", TEST_KEY))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["sent"], 2);
    assert_eq!(json["errors"], 0);

    let alice = notifier.messages_for(&UserIdentity::new("alice"));
    assert_eq!(alice.len(), 1);
    assert!(alice[0].contains("June 2025 Monthly Report"));
}

#[tokio::test]
async fn test_report_run_counts_delivery_failures() {
    let notifier = Arc::new(RecordingNotifier::failing());
    let state = build_state(MockBackend::new(), notifier, None);
    seed_expense(&state.db, "alice", 3, "Migros", 100.0);

    let response = create_router(state)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/reports/monthly?month=2025-06")
                .header("authorization", format!("Bearer {}", TEST_KEY))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["sent"], 0);
    assert_eq!(json["errors"], 1);
}

// ========== WhatsApp client against a mock Graph API ==========

#[derive(Clone, Default)]
struct GraphRecorder {
    posts: Arc<Mutex<Vec<serde_json::Value>>>,
}

async fn start_mock_graph() -> (String, GraphRecorder) {
    let recorder = GraphRecorder::default();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let media_url = format!("{}/download/MEDIA1", base);

    let posts = recorder.posts.clone();
    let app = Router::new()
        .route(
            "/PHONE123/messages",
            post(move |Json(body): Json<serde_json::Value>| {
                let posts = posts.clone();
                async move {
                    posts.lock().unwrap().push(body);
                    Json(serde_json::json!({"messages": [{"id": "wamid.out"}]}))
                }
            }),
        )
        .route(
            "/MEDIA1",
            get(move || {
                let url = media_url.clone();
                async move { Json(serde_json::json!({ "url": url })) }
            }),
        )
        .route("/download/MEDIA1", get(|| async { b"jpeg-bytes".to_vec() }));

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (base, recorder)
}

#[tokio::test]
async fn test_whatsapp_client_send_and_download() {
    let (base, recorder) = start_mock_graph().await;
    let client = WhatsAppClient::new(&base, "token", "PHONE123");

    client.send_text(USER, "hello").await.unwrap();
    let bytes = client.download_media("MEDIA1").await.unwrap();
    assert_eq!(bytes, b"jpeg-bytes".to_vec());

    let posts = recorder.posts.lock().unwrap().clone();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0]["to"], USER);
    assert_eq!(posts[0]["text"]["body"], "hello");
}

#[tokio::test]
async fn test_whatsapp_client_long_button_body_falls_back_to_text() {
    let (base, recorder) = start_mock_graph().await;
    let client = WhatsAppClient::new(&base, "token", "PHONE123");
    let buttons = [tally_core::Button::new("confirm_yes", "Yes")];

    client.send_buttons(USER, &"x".repeat(1100), &buttons).await.unwrap();
    client.send_buttons(USER, "short", &[]).await.unwrap();

    let posts = recorder.posts.lock().unwrap().clone();
    assert_eq!(posts.len(), 2);
    assert!(posts.iter().all(|p| p["type"] == "text"));
}

#[tokio::test]
async fn test_whatsapp_client_reports_api_errors() {
    let (base, _) = start_mock_graph().await;
    let client = WhatsAppClient::new(&base, "token", "OTHER_PHONE");

    let err = client.send_text(USER, "hello").await.unwrap_err();
    assert!(matches!(err, tally_core::Error::Delivery(_)));
    assert!(client.download_media("MISSING").await.is_err());
}

#[tokio::test]
async fn test_image_message_end_to_end_with_whatsapp() {
    let (base, recorder) = start_mock_graph().await;
    let client = WhatsAppClient::new(&base, "token", "PHONE123");
    let state = build_state(MockBackend::new(), Arc::new(client.clone()), Some(client));

    dispatch_and_wait(&state, &image_payload(USER, "wamid.9", "MEDIA1")).await;

    let posts = recorder.posts.lock().unwrap().clone();
    assert!(posts
        .iter()
        .any(|p| p["status"] == "read" && p["message_id"] == "wamid.9"));
    let reply = posts
        .iter()
        .find(|p| p["type"] == "interactive")
        .expect("reply sent");
    assert_eq!(reply["to"], USER);
    assert!(reply["interactive"]["body"]["text"]
        .as_str()
        .unwrap()
        .contains("Migros"));
    let ids: Vec<&str> = reply["interactive"]["action"]["buttons"]
        .as_array()
        .unwrap()
        .iter()
        .map(|b| b["reply"]["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["confirm_yes", "confirm_no"]);

    let pending = state.engine.sessions().get(&UserIdentity::new(USER)).await;
    assert!(pending.unwrap().receipt_hash.is_some());
}

// ========== Helpers ==========

#[test]
fn test_parse_api_keys() {
    assert_eq!(parse_api_keys("a, b,,c "), vec!["a", "b", "c"]);
    assert!(parse_api_keys("").is_empty());
}

#[test]
fn test_constant_time_eq() {
    assert!(constant_time_eq("secret", "secret"));
    assert!(!constant_time_eq("secret", "secreT"));
    assert!(!constant_time_eq("secret", "secret-longer"));
}
