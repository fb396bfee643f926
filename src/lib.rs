pub mod alerts;
pub mod backend;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod protocol;
pub mod realtime;
pub mod session;

pub use config::Config;
pub use error::BridgeError;

use self::alerts::AlertReporter;
use self::backend::BackendClient;
use self::config::{load_config, resolve_database_url};
use self::db::{AccountRecord, DbKind};
use self::protocol::{ProtocolEvent, SidecarSession};
use self::realtime::RealtimePublisher;
use self::session::SessionManager;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use sqlx::AnyPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::error;

const EVENT_QUEUE_DEPTH: usize = 256;

/// Everything one bridge process shares between its workers: the loaded
/// account, the datastore pool, the single session handle and the sinks.
/// Built once at startup and passed around explicitly.
pub struct BridgeContext {
    pub config: Config,
    pub pool: AnyPool,
    pub db_kind: DbKind,
    pub account: AccountRecord,
    pub session: SessionManager,
    pub backend: BackendClient,
    pub realtime: RealtimePublisher,
    pub alerts: AlertReporter,
}

#[derive(Clone)]
pub struct AppState {
    pub ctx: Arc<BridgeContext>,
    pub events_tx: mpsc::Sender<ProtocolEvent>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub connected: bool,
    pub queued_jobs: i64,
}

pub async fn create_bridge() -> anyhow::Result<(AppState, Router)> {
    sqlx::any::install_default_drivers();

    let config = load_config();
    let db_url = resolve_database_url(&config);
    let db_kind = db::db_kind_from_url(&db_url);
    let pool = AnyPool::connect(&db_url).await?;
    db::init_db(&pool, db_kind).await?;

    let account = db::get_account(&pool, db_kind, &config.account.phone_number)
        .await?
        .ok_or_else(|| {
            anyhow::anyhow!("no account found for {}", config.account.phone_number)
        })?;

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.http.timeout_seconds))
        .build()?;

    let session = SessionManager::new(Arc::new(SidecarSession::new(
        http.clone(),
        config.sidecar.url.clone(),
    )));
    let backend = BackendClient::new(
        http.clone(),
        config.backend.base_url.clone(),
        account.phone_number.clone(),
    );
    let realtime = RealtimePublisher::new(http.clone(), &config.realtime, account.phone_number.clone());
    let alerts = AlertReporter::new(http, &config.alerts);

    let ctx = Arc::new(BridgeContext {
        config,
        pool,
        db_kind,
        account,
        session,
        backend,
        realtime,
        alerts,
    });

    let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
    tokio::spawn(events::run_event_router(ctx.clone(), events_rx));
    tokio::spawn(dispatch::start_dispatch_worker(ctx.clone()));

    let state = AppState {
        ctx,
        events_tx,
    };
    let app = build_router(state.clone());
    Ok((state, app))
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/status", get(status))
        .route("/v1/events", post(ingest_event))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let queued_jobs =
        db::count_unsent_jobs(&state.ctx.pool, state.ctx.db_kind, state.ctx.account.id)
            .await
            .unwrap_or(0);
    Json(StatusResponse {
        connected: state.ctx.session.is_connected().await,
        queued_jobs,
    })
}

/// Sidecar callback: one typed event per request, queued for the router
/// worker. Arrival order on this route is delivery order to the handlers.
async fn ingest_event(
    State(state): State<AppState>,
    Json(event): Json<ProtocolEvent>,
) -> impl IntoResponse {
    if let Err(err) = state.events_tx.send(event).await {
        error!("event queue closed: {err}");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"error": "event queue closed"})),
        )
            .into_response();
    }
    Json(json!({"status": "accepted"})).into_response()
}
