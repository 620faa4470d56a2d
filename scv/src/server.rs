//! Thin HTTP surface exposing the manager's operations to compute cores.
//!
//! Request routing, authentication, and payload framing beyond plain JSON
//! are explicit non-goals of the core; this module exists only so the crate
//! is a runnable service rather than a library-only exercise.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use scv_core::{AuthToken, Error, Manager, Stream, StreamId, TargetId};

pub struct ScvServer {
    manager: Manager,
    bind_addr: String,
}

impl ScvServer {
    #[must_use]
    pub fn new(manager: Manager, bind_addr: String) -> Self {
        Self { manager, bind_addr }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let addr: SocketAddr = self.bind_addr.parse()?;
        let app = router(self.manager);
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!(%addr, "listening");
        axum::serve(listener, app).await?;
        Ok(())
    }
}

fn router(manager: Manager) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/targets/{target_id}/streams", post(add_stream))
        .route("/targets/{target_id}/stats", get(target_stats))
        .route("/targets/{target_id}/activate", post(activate_stream))
        .route("/streams/{stream_id}", get(read_stream).delete(remove_stream))
        .route("/streams/{stream_id}/frames", patch(advance_frames))
        .route("/deactivate", post(deactivate_stream))
        .route("/heartbeat", post(reset_active_stream))
        .with_state(manager)
}

/// Wraps [`scv_core::Error`] so it can be returned directly from a handler;
/// the HTTP status is chosen by error kind, the body echoes the taxonomy so
/// cores can branch on it without parsing prose.
struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::AlreadyExists(_) => StatusCode::CONFLICT,
            Error::NotFound(_) | Error::UnknownTarget(_) => StatusCode::NOT_FOUND,
            Error::TargetDrained(_) => StatusCode::CONFLICT,
            Error::InvalidToken { .. } => StatusCode::UNAUTHORIZED,
            Error::InjectorFailed(_) | Error::ClosureFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(serde_json::json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

async fn healthz(State(manager): State<Manager>) -> Json<serde_json::Value> {
    let (targets, streams) = manager.registry_size();
    Json(serde_json::json!({ "targets": targets, "streams": streams }))
}

#[derive(Deserialize)]
struct AddStreamRequest {
    stream_id: String,
    owner: String,
}

async fn add_stream(
    State(manager): State<Manager>,
    Path(target_id): Path<String>,
    Json(req): Json<AddStreamRequest>,
) -> Result<StatusCode, ApiError> {
    let stream = Stream::new(StreamId::new(req.stream_id), TargetId::new(target_id), req.owner);
    manager.add_stream(stream).await?;
    Ok(StatusCode::CREATED)
}

async fn remove_stream(
    State(manager): State<Manager>,
    Path(stream_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    manager.remove_stream(&StreamId::new(stream_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
struct StreamView {
    stream_id: String,
    target_id: String,
    owner: String,
    frames: u64,
    error_count: u64,
    active: bool,
}

async fn read_stream(
    State(manager): State<Manager>,
    Path(stream_id): Path<String>,
) -> Result<Json<StreamView>, ApiError> {
    let view = manager
        .read_stream(&StreamId::new(stream_id), |s| {
            Ok(StreamView {
                stream_id: s.stream_id.to_string(),
                target_id: s.target_id.to_string(),
                owner: s.owner.clone(),
                frames: s.frames,
                error_count: s.error_count,
                active: s.is_active(),
            })
        })
        .await?;
    Ok(Json(view))
}

#[derive(Deserialize)]
struct AdvanceFramesRequest {
    delta: u64,
}

async fn advance_frames(
    State(manager): State<Manager>,
    Path(stream_id): Path<String>,
    Json(req): Json<AdvanceFramesRequest>,
) -> Result<StatusCode, ApiError> {
    manager
        .modify_stream(&StreamId::new(stream_id), |s| {
            s.frames += req.delta;
            Ok(())
        })
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct ActivateRequest {
    user: String,
    engine: String,
}

#[derive(Serialize)]
struct ActivateResponse {
    token: String,
    stream_id: String,
}

async fn activate_stream(
    State(manager): State<Manager>,
    Path(target_id): Path<String>,
    Json(req): Json<ActivateRequest>,
) -> Result<Json<ActivateResponse>, ApiError> {
    let (token, stream_id) = manager
        .activate_stream(&TargetId::new(target_id), req.user, req.engine)
        .await?;
    Ok(Json(ActivateResponse {
        token: token.to_string(),
        stream_id: stream_id.to_string(),
    }))
}

#[derive(Deserialize)]
struct TokenRequest {
    token: String,
}

async fn deactivate_stream(
    State(manager): State<Manager>,
    Json(req): Json<TokenRequest>,
) -> Result<StatusCode, ApiError> {
    manager.deactivate_stream(&AuthToken::from(req.token)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn reset_active_stream(
    State(manager): State<Manager>,
    Json(req): Json<TokenRequest>,
) -> Result<StatusCode, ApiError> {
    manager.reset_active_stream(&AuthToken::from(req.token)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn target_stats(
    State(manager): State<Manager>,
    Path(target_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let stats = manager
        .target_stats(&TargetId::new(target_id.clone()))
        .ok_or_else(|| ApiError(Error::UnknownTarget(target_id)))?;
    Ok(Json(serde_json::json!({
        "inactive": stats.inactive_count,
        "active": stats.active_count,
        "tokens": stats.token_count,
        "timers": stats.timer_count,
    })))
}
