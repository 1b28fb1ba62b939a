//! HTTP control surface.

use crate::core::error::AutomationError;
use crate::core::types::{ErrorEntry, HistoryEntry, PostRequest, ScheduleStatus};
use crate::core::AppState;
use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    pub text: String,
    #[serde(default)]
    pub media_paths: Vec<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EnqueueResponse {
    pub accepted: bool,
    pub request: Option<PostRequest>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: ScheduleStatus,
    pub queued: Vec<PostRequest>,
    pub recent: Vec<PostRequest>,
}

#[derive(Debug, Deserialize)]
pub struct IntervalRequest {
    pub minutes: u32,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, e: impl ToString) -> ApiError {
    let msg = e.to_string();
    error!("api: {}", msg);
    (status, Json(ErrorResponse { error: msg }))
}

fn automation_error(e: AutomationError) -> ApiError {
    let status = match &e {
        AutomationError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        AutomationError::BrowserLaunch(_) | AutomationError::SessionNotReady => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        AutomationError::Navigation { .. } => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    api_error(status, e)
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(health_check))
        .route("/health", get(health_check))
        .route("/status", get(status_handler))
        .route("/posts", post(enqueue_handler).delete(clear_queue_handler))
        .route("/scheduler/start", post(start_handler))
        .route("/scheduler/stop", post(stop_handler))
        .route("/auth", get(auth_handler))
        .route("/auth/login", post(login_handler))
        .route("/session/clear", post(clear_session_handler))
        .route("/session/close", post(close_session_handler))
        .route("/history", get(history_handler).delete(clear_history_handler))
        .route("/errors", get(errors_handler).delete(clear_errors_handler))
        .route("/settings/interval", put(interval_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "postpilot",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn status_handler(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: state.scheduler.status(),
        queued: state.scheduler.queued(),
        recent: state.scheduler.recent(),
    })
}

async fn enqueue_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<EnqueueRequest>,
) -> Result<Json<EnqueueResponse>, ApiError> {
    match state.scheduler.enqueue_request(&req.text, req.media_paths) {
        Some(request) => Ok(Json(EnqueueResponse {
            accepted: true,
            request: Some(request),
        })),
        None => Err(api_error(StatusCode::BAD_REQUEST, "post text must not be empty")),
    }
}

async fn clear_queue_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let cleared = state.scheduler.clear_queue();
    Json(serde_json::json!({ "cleared": cleared }))
}

async fn start_handler(State(state): State<Arc<AppState>>) -> Json<ScheduleStatus> {
    state.scheduler.start();
    Json(state.scheduler.status())
}

async fn stop_handler(State(state): State<Arc<AppState>>) -> Json<ScheduleStatus> {
    state.scheduler.stop().await;
    Json(state.scheduler.status())
}

async fn auth_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<crate::core::types::AuthVerdict>, ApiError> {
    state
        .check_authentication()
        .await
        .map(Json)
        .map_err(automation_error)
}

async fn login_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<crate::automation::login::LoginOutcome>, ApiError> {
    state.prompt_login().await.map(Json).map_err(automation_error)
}

async fn clear_session_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.clear_session_data().await.map_err(automation_error)?;
    Ok(Json(serde_json::json!({ "cleared": true })))
}

async fn close_session_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    state.close_session().await;
    Json(serde_json::json!({ "closed": true }))
}

async fn history_handler(State(state): State<Arc<AppState>>) -> Json<Vec<HistoryEntry>> {
    Json(state.store.history())
}

async fn clear_history_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.store.clear_history().map_err(automation_error)?;
    Ok(Json(serde_json::json!({ "cleared": true })))
}

async fn errors_handler(State(state): State<Arc<AppState>>) -> Json<Vec<ErrorEntry>> {
    Json(state.store.errors())
}

async fn clear_errors_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.store.clear_errors().map_err(automation_error)?;
    Ok(Json(serde_json::json!({ "cleared": true })))
}

async fn interval_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<IntervalRequest>,
) -> Result<Json<ScheduleStatus>, ApiError> {
    state
        .scheduler
        .set_interval_minutes(req.minutes)
        .map_err(automation_error)?;
    Ok(Json(state.scheduler.status()))
}
