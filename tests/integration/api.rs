use axum::body::Body;
use http::{Request, StatusCode};
use once_cell::sync::Lazy;
use sqlx::any::AnyPoolOptions;
use std::sync::Arc;
use tokio::sync::mpsc;
use tower::util::ServiceExt;

use wa_bridge::alerts::AlertReporter;
use wa_bridge::backend::BackendClient;
use wa_bridge::config::{AlertConfig, Config, RealtimeConfig};
use wa_bridge::db::{self, DbKind};
use wa_bridge::protocol::{ProtocolEvent, ProtocolSession, SidecarSession};
use wa_bridge::realtime::RealtimePublisher;
use wa_bridge::session::SessionManager;
use wa_bridge::{build_router, AppState, BridgeContext};

static DRIVERS: Lazy<()> = Lazy::new(sqlx::any::install_default_drivers);

async fn test_state() -> (AppState, mpsc::Receiver<ProtocolEvent>) {
    Lazy::force(&DRIVERS);

    let pool = AnyPoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    db::init_db(&pool, DbKind::Sqlite).await.unwrap();
    sqlx::query(
        "INSERT INTO accounts (id, phone_number, name, whatsapp_password) VALUES (1, '15551234567', 'Test Account', 'c2VjcmV0')",
    )
    .execute(&pool)
    .await
    .unwrap();

    let http = reqwest::Client::new();
    let account = db::get_account(&pool, DbKind::Sqlite, "15551234567")
        .await
        .unwrap()
        .unwrap();

    let session: Arc<dyn ProtocolSession> = Arc::new(SidecarSession::new(
        http.clone(),
        "http://127.0.0.1:1".to_string(),
    ));
    let realtime_cfg = RealtimeConfig {
        enabled: false,
        ..RealtimeConfig::default()
    };
    let ctx = Arc::new(BridgeContext {
        config: Config::default(),
        pool,
        db_kind: DbKind::Sqlite,
        account: account.clone(),
        session: SessionManager::new(session),
        backend: BackendClient::new(
            http.clone(),
            "http://127.0.0.1:1".to_string(),
            account.phone_number.clone(),
        ),
        realtime: RealtimePublisher::new(http.clone(), &realtime_cfg, account.phone_number),
        alerts: AlertReporter::new(
            http,
            &AlertConfig {
                crash_report_key: None,
                environment: "test".to_string(),
            },
        ),
    });

    let (events_tx, events_rx) = mpsc::channel(8);
    (AppState { ctx, events_tx }, events_rx)
}

#[tokio::test]
async fn health_returns_ok() {
    let (state, _rx) = test_state().await;
    let app = build_router(state);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/v1/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value["status"], "ok");
}

#[tokio::test]
async fn status_reports_queue_depth_and_connection() {
    let (state, _rx) = test_state().await;
    sqlx::query(
        r#"INSERT INTO jobs (id, method, targets, args, sent, pending, runs, received, account_id)
           VALUES (1, 'send_message', '15557654321', 'a', 0, 0, 0, 0, 1),
                  (2, 'send_message', '15557654321', 'b', 0, 0, 0, 0, 1),
                  (3, 'send_message', '15557654321', 'c', 1, 0, 1, 0, 1)"#,
    )
    .execute(&state.ctx.pool)
    .await
    .unwrap();
    let app = build_router(state);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/v1/status")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value["connected"], false);
    assert_eq!(value["queued_jobs"], 2);
}

#[tokio::test]
async fn event_callback_queues_typed_event() {
    let (state, mut rx) = test_state().await;
    let app = build_router(state);

    let payload = serde_json::json!({
        "event": "message_received",
        "message_id": "M1",
        "jid": "15557654321@s.whatsapp.net",
        "text": "hi",
        "timestamp": null,
        "wants_receipt": true,
        "display_name": "Ada"
    });
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/events")
                .header("content-type", "application/json")
                .body(Body::from(payload.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let event = rx.recv().await.unwrap();
    match event {
        ProtocolEvent::MessageReceived {
            message_id, text, ..
        } => {
            assert_eq!(message_id, "M1");
            assert_eq!(text, "hi");
        }
        _ => panic!("wrong variant"),
    }
}

#[tokio::test]
async fn event_callback_rejects_unknown_event() {
    let (state, _rx) = test_state().await;
    let app = build_router(state);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/events")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"event": "contact_sync"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert!(response.status().is_client_error());
}
