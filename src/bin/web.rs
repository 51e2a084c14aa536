//! Duet Web API
//!
//! 启动: cargo run --bin duet-web --features web
//! 默认监听 0.0.0.0:3000（DUET_WEB_PORT 或 [web] port 可覆盖）

#![cfg(feature = "web")]

use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Json, Router,
};
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use duet::config::load_config;
use duet::core::{ShutdownCoordinator, ShutdownManager, StopConversation};
use duet::{Conductor, DuetError};

type ApiError = (StatusCode, Json<Value>);
type ApiResult<T> = Result<T, ApiError>;

struct AppState {
    conductor: Arc<Conductor>,
    /// 关闭时取消，结束所有 SSE 长连接
    shutdown: CancellationToken,
}

#[derive(Debug, Default, Deserialize)]
struct CreateSessionRequest {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ControlRequest {
    action: String,
    #[serde(default)]
    message: Option<String>,
}

/// DuetError → HTTP 状态码与错误信息；5xx 只返回通用信息，细节写日志
fn api_error(action: &str, e: DuetError) -> ApiError {
    if !e.is_user_correctable() {
        tracing::error!(error = %e, "failed to {}", action);
    }
    let (status, message) = match &e {
        DuetError::NotFound { .. } | DuetError::UnknownSession { .. } => {
            (StatusCode::NOT_FOUND, "Session not found".to_string())
        }
        DuetError::NoActiveSession => (
            StatusCode::BAD_REQUEST,
            "No active session. Create a session first.".to_string(),
        ),
        DuetError::EmptyMessage => (StatusCode::BAD_REQUEST, "Message required".to_string()),
        DuetError::Conflict { .. } => (StatusCode::CONFLICT, e.to_string()),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to {}", action)),
    };
    (status, Json(json!({ "error": message })))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    duet::observability::init();

    let cfg = load_config(None).context("Failed to load config")?;
    let conductor = Arc::new(Conductor::from_config(&cfg));
    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();
    let state = Arc::new(AppState {
        conductor: Arc::clone(&conductor),
        shutdown: shutdown.token(),
    });

    let app = Router::new()
        .route("/api/sessions", get(api_sessions_list).post(api_sessions_create))
        .route(
            "/api/sessions/:id",
            get(api_session_get)
                .put(api_session_activate)
                .delete(api_session_delete),
        )
        .route("/api/messages", get(api_messages))
        .route("/api/control", get(api_control_status).post(api_control))
        .route("/api/stats", get(api_stats))
        .route("/api/ideas", get(api_ideas))
        .route("/api/events", get(api_events_sse))
        .route("/api/health", get(|| async { "OK" }))
        .with_state(state);

    let port = std::env::var("DUET_WEB_PORT")
        .ok()
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(cfg.web.port);
    let listener = tokio::net::TcpListener::bind((cfg.web.host.as_str(), port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", cfg.web.host, port))?;
    tracing::info!("Duet Web API: http://{}", listener.local_addr()?);

    let token = shutdown.token();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await?;

    let mut cleanup = ShutdownCoordinator::new();
    if cfg.runtime.stop_on_shutdown {
        cleanup.register(StopConversation::new(conductor));
    }
    cleanup.run_cleanup().await;

    Ok(())
}

/// GET /api/sessions：会话列表 + 活动会话 id
async fn api_sessions_list(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let overview = state
        .conductor
        .list_sessions()
        .await
        .map_err(|e| api_error("get sessions", e))?;
    Ok(Json(json!(overview)))
}

/// POST /api/sessions：创建会话并设为活动会话，请求体 { "name": "..." }（可省略）
async fn api_sessions_create(
    State(state): State<Arc<AppState>>,
    body: Option<Json<CreateSessionRequest>>,
) -> ApiResult<Json<Value>> {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let session = state
        .conductor
        .create_session(req.name.as_deref())
        .await
        .map_err(|e| api_error("create session", e))?;
    Ok(Json(json!({ "success": true, "session": session })))
}

/// GET /api/sessions/:id：元数据 + 历史排序的消息 + 轮次状态
async fn api_session_get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let detail = state
        .conductor
        .get_session(&id)
        .await
        .map_err(|e| api_error("get session", e))?;
    Ok(Json(json!({ "session": detail })))
}

/// PUT /api/sessions/:id：设为活动会话
async fn api_session_activate(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    state
        .conductor
        .activate_session(&id)
        .await
        .map_err(|e| api_error("activate session", e))?;
    Ok(Json(json!({ "success": true })))
}

/// DELETE /api/sessions/:id
async fn api_session_delete(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    state
        .conductor
        .delete_session(&id)
        .await
        .map_err(|e| api_error("delete session", e))?;
    Ok(Json(json!({ "success": true })))
}

/// GET /api/messages：活动会话的实时消息流
async fn api_messages(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let feed = state
        .conductor
        .live_feed()
        .await
        .map_err(|e| api_error("read messages", e))?;
    Ok(Json(json!(feed)))
}

/// GET /api/control：运行状态（先与实际进程核对）
async fn api_control_status(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let status = state
        .conductor
        .live_status()
        .await
        .map_err(|e| api_error("get status", e))?;
    Ok(Json(json!(status)))
}

/// POST /api/control：{ "action": "start" | "send" | "stop", "message": "..." }
async fn api_control(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ControlRequest>,
) -> ApiResult<Json<Value>> {
    let conductor = &state.conductor;
    match req.action.as_str() {
        "stop" => {
            conductor.stop().await;
            Ok(Json(json!({ "success": true, "message": "Sessions stopped" })))
        }
        "start" => {
            conductor
                .start()
                .await
                .map_err(|e| api_error("execute action", e))?;
            Ok(Json(json!({ "success": true, "message": "Sessions started" })))
        }
        "send" => {
            let text = req.message.unwrap_or_default();
            conductor
                .send(&text)
                .await
                .map_err(|e| api_error("execute action", e))?;
            Ok(Json(json!({ "success": true, "message": "Message sent" })))
        }
        _ => Err((
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Invalid action" })),
        )),
    }
}

/// GET /api/stats
async fn api_stats(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let stats = state
        .conductor
        .conversation_stats()
        .await
        .map_err(|e| api_error("get stats", e))?;
    Ok(Json(json!(stats)))
}

/// GET /api/ideas：创意看板
async fn api_ideas(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let board = state
        .conductor
        .idea_board()
        .await
        .map_err(|e| api_error("fetch ideas", e))?;
    Ok(Json(json!(board)))
}

/// GET /api/events：SSE 流，推送会话与运行状态变更
async fn api_events_sse(
    State(state): State<Arc<AppState>>,
) -> Sse<impl futures_util::Stream<Item = Result<Event, std::convert::Infallible>>> {
    let event_stream = state
        .conductor
        .event_stream(state.shutdown.clone())
        .filter_map(|ev| async move {
            serde_json::to_string(&ev)
                .ok()
                .map(|data| Ok(Event::default().data(data)))
        });
    Sse::new(event_stream).keep_alive(
        KeepAlive::new()
            .interval(std::time::Duration::from_secs(15))
            .text("keepalive"),
    )
}
