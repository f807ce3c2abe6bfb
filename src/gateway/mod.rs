//! Axum-based HTTP gateway serving the dashboard and control API.
//!
//! - Request body size limits (64KB max)
//! - Request timeouts (30s) to prevent slow-loris attacks
//! - Live dashboard feed over WebSocket (logs, QR codes, connection state)
//! - Stored images exposed read-only under /images

use crate::client::{purge_credentials, MessagingClient};
use crate::config::Config;
use crate::events::{DashboardBus, DashboardEvent};
use crate::filing::FilingEngine;
use crate::runtime::{BotRuntime, ReconnectPolicy};
use crate::store::ImageStore;
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{Html, IntoResponse, Json},
    routing::{get, post},
    Router,
};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::services::ServeDir;
use tower_http::timeout::TimeoutLayer;

/// Maximum request body size (64KB) — the control API takes no payloads.
pub const MAX_BODY_SIZE: usize = 65_536;
/// Request timeout (30s) — prevents slow-loris attacks
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

const DASHBOARD_HTML: &str = include_str!("dashboard.html");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LifecycleState {
    Stopped,
    Running,
}

/// Explicit bot lifecycle gate: at most one runtime at a time.
pub struct BotLifecycle {
    state: Mutex<LifecycleState>,
}

impl BotLifecycle {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LifecycleState::Stopped),
        }
    }

    /// Transition Stopped -> Running. False if already running.
    pub fn try_start(&self) -> bool {
        let mut state = self.state.lock();
        if *state == LifecycleState::Running {
            return false;
        }
        *state = LifecycleState::Running;
        true
    }

    pub fn mark_stopped(&self) {
        *self.state.lock() = LifecycleState::Stopped;
    }

    pub fn is_running(&self) -> bool {
        *self.state.lock() == LifecycleState::Running
    }
}

impl Default for BotLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ImageStore>,
    pub engine: Arc<FilingEngine>,
    pub client: Arc<dyn MessagingClient>,
    pub bus: DashboardBus,
    pub lifecycle: Arc<BotLifecycle>,
    pub auth_dir: PathBuf,
    pub reconnect: ReconnectPolicy,
}

pub fn build_router(state: AppState) -> Router {
    let images_root = state.store.root().to_path_buf();

    let api_router = Router::new()
        .route("/health", get(handle_health))
        .route("/api/images", get(handle_list_images))
        .route("/api/delete-auth", post(handle_delete_auth))
        .route("/api/start-bot", post(handle_start_bot))
        .with_state(state.clone())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(REQUEST_TIMEOUT_SECS),
        ));

    Router::new()
        .route("/", get(handle_index))
        .route("/ws", get(handle_ws_upgrade))
        .with_state(state)
        .merge(api_router)
        .nest_service("/images", ServeDir::new(images_root))
}

/// Bind and serve the gateway until the process is stopped.
pub async fn run_gateway(
    config: &Config,
    store: Arc<ImageStore>,
    engine: Arc<FilingEngine>,
    client: Arc<dyn MessagingClient>,
    bus: DashboardBus,
) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.gateway.host, config.gateway.port)
        .parse()
        .context("invalid gateway address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    let display_addr = listener.local_addr()?;

    let state = AppState {
        store,
        engine,
        client,
        bus,
        lifecycle: Arc::new(BotLifecycle::new()),
        auth_dir: config.storage.auth_dir.clone(),
        reconnect: ReconnectPolicy::from(&config.reconnect),
    };
    let app = build_router(state);

    println!("📸 Snapfile gateway listening on http://{display_addr}");
    println!("  🌐 Dashboard: http://{display_addr}/");
    println!("  ▶️  Start the bot from the dashboard or POST /api/start-bot");

    axum::serve(listener, app).await?;
    Ok(())
}

// ══════════════════════════════════════════════════════════════════════════════
// AXUM HANDLERS
// ══════════════════════════════════════════════════════════════════════════════

/// GET / — the single-page dashboard
async fn handle_index() -> Html<&'static str> {
    Html(DASHBOARD_HTML)
}

/// GET /health — always public (no secrets leaked)
async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "bot_running": state.lifecycle.is_running(),
    }))
}

/// GET /api/images — gallery listing, newest folder first
async fn handle_list_images(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.list_folders().await {
        Ok(folders) => (StatusCode::OK, Json(serde_json::json!(folders))),
        Err(e) => {
            tracing::error!("Failed to list image folders: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
        }
    }
}

/// POST /api/delete-auth — purge stored session credentials unconditionally;
/// the operator restarts the process afterwards to re-pair.
async fn handle_delete_auth(State(state): State<AppState>) -> impl IntoResponse {
    match purge_credentials(&state.auth_dir).await {
        Ok(()) => {
            tracing::info!("🗑️ Auth credentials deleted");
            (
                StatusCode::OK,
                Json(serde_json::json!({
                    "success": true,
                    "message": "Auth folder deleted. Start the bot to pair again.",
                })),
            )
        }
        Err(e) => {
            tracing::error!("Failed to delete auth folder: {e:#}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "success": false, "message": e.to_string() })),
            )
        }
    }
}

/// POST /api/start-bot — launch the messaging runtime once
async fn handle_start_bot(State(state): State<AppState>) -> impl IntoResponse {
    if !state.lifecycle.try_start() {
        return (
            StatusCode::OK,
            Json(serde_json::json!({
                "success": false,
                "message": "Bot is already running",
            })),
        );
    }

    let runtime = BotRuntime::new(
        Arc::clone(&state.client),
        Arc::clone(&state.engine),
        state.bus.clone(),
        state.reconnect,
    );
    let lifecycle = Arc::clone(&state.lifecycle);
    tokio::spawn(async move {
        runtime.run().await;
        lifecycle.mark_stopped();
        tracing::info!("Bot runtime stopped");
    });

    tracing::info!("🚀 Bot starting...");
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "success": true,
            "message": "Bot starting",
        })),
    )
}

/// GET /ws — dashboard event feed
async fn handle_ws_upgrade(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

async fn handle_ws(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = state.bus.subscribe();

    // Late subscribers still need the current pairing code.
    if let Some(url) = state.bus.latest_qr() {
        if send_event(&mut sender, &DashboardEvent::Qr(url)).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!("dashboard socket lagged, skipped {skipped} events");
                }
                Err(RecvError::Closed) => break,
            },
            frame = receiver.next() => match frame {
                Some(Ok(Message::Ping(payload))) => {
                    if sender.send(Message::Pong(payload)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}

async fn send_event<S>(sender: &mut S, event: &DashboardEvent) -> Result<(), axum::Error>
where
    S: futures_util::Sink<Message, Error = axum::Error> + Unpin,
{
    let text = serde_json::to_string(event).map_err(axum::Error::new)?;
    sender.send(Message::Text(text.into())).await
}
