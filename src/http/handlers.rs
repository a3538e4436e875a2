use super::state::AppState;
use crate::controller::ControllerError;
use crate::session::{LifecycleEvent, SessionError, SessionStatus, StopReport};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use tracing::{error, info, warn};

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct StartRecordingResponse {
    pub status: String,
    pub message: String,
    pub session: SessionStatus,
}

#[derive(Debug, Serialize)]
pub struct StopRecordingResponse {
    pub status: String,
    pub message: String,
    pub report: Option<StopReport>,
}

#[derive(Debug, Serialize)]
pub struct EventLine {
    #[serde(flatten)]
    pub event: LifecycleEvent,
    /// Rendered, greppable form of the event
    pub line: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: String,
}

fn error_response(status: StatusCode, kind: &str, error: impl ToString) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            kind: kind.to_string(),
        }),
    )
        .into_response()
}

fn controller_gone(e: ControllerError) -> Response {
    error!("Session controller unavailable: {}", e);
    error_response(StatusCode::SERVICE_UNAVAILABLE, "ControllerClosed", e)
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /recording/start
/// Start a new recording session
pub async fn start_recording(State(state): State<AppState>) -> Response {
    info!("HTTP: start recording");

    match state.controller.start().await {
        Ok(session) => {
            let path = session
                .output_path
                .as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_default();
            (
                StatusCode::OK,
                Json(StartRecordingResponse {
                    status: "recording".to_string(),
                    message: format!("Recording to {}", path),
                    session,
                }),
            )
                .into_response()
        }
        Err(ControllerError::Session(e @ SessionError::AlreadyActive(_))) => {
            warn!("Start rejected: {}", e);
            error_response(StatusCode::CONFLICT, e.kind(), e)
        }
        Err(ControllerError::Session(e)) => {
            error!("Failed to start recording: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.kind(), e)
        }
        Err(e) => controller_gone(e),
    }
}

/// POST /recording/stop
/// Stop the active recording; a no-op when nothing is recording
pub async fn stop_recording(State(state): State<AppState>) -> Response {
    info!("HTTP: stop recording");

    match state.controller.stop().await {
        Ok(Some(report)) => {
            let message = match report.bytes {
                Some(bytes) => format!("Recording saved: {} ({} bytes)", report.output_path.display(), bytes),
                None => format!("Recording stopped, but {} was not found", report.output_path.display()),
            };
            (
                StatusCode::OK,
                Json(StopRecordingResponse {
                    status: "stopped".to_string(),
                    message,
                    report: Some(report),
                }),
            )
                .into_response()
        }
        Ok(None) => (
            StatusCode::OK,
            Json(StopRecordingResponse {
                status: "idle".to_string(),
                message: "Not recording".to_string(),
                report: None,
            }),
        )
            .into_response(),
        Err(e) => controller_gone(e),
    }
}

/// GET /recording/status
pub async fn get_status(State(state): State<AppState>) -> Response {
    match state.controller.status().await {
        Ok(status) => (StatusCode::OK, Json(status)).into_response(),
        Err(e) => controller_gone(e),
    }
}

/// GET /recording/events
/// Lifecycle event log, oldest first
pub async fn get_events(State(state): State<AppState>) -> impl IntoResponse {
    let events: Vec<EventLine> = state
        .events
        .snapshot()
        .into_iter()
        .map(|event| EventLine {
            line: event.to_string(),
            event,
        })
        .collect();
    (StatusCode::OK, Json(events))
}

/// GET /recording/history
pub async fn get_history(State(state): State<AppState>) -> Response {
    match state.controller.history().await {
        Ok(history) => (StatusCode::OK, Json(history)).into_response(),
        Err(e) => controller_gone(e),
    }
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
