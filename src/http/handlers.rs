use super::state::AppState;
use crate::audio::CapturedAudio;
use crate::session::SessionState;
use axum::{
    body::Bytes,
    extract::State,
    http::{header::CONTENT_TYPE, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use tracing::{error, info};

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session_id: String,
    pub status: SessionState,
}

#[derive(Debug, Serialize)]
pub struct TranscriptResponse {
    pub session_id: String,
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
        .into_response()
}

fn no_session() -> Response {
    error_response(StatusCode::NOT_FOUND, "No session")
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /session/start
/// Open a new session, cancelling any unfinished one
pub async fn start_session(State(state): State<AppState>) -> impl IntoResponse {
    let session_id = state.orchestrator.start().await;
    info!("Session {} opened via API", session_id);

    (
        StatusCode::OK,
        Json(SessionResponse {
            session_id,
            status: SessionState::Capturing,
        }),
    )
}

/// POST /session/submit
/// Body is the captured audio; Content-Type is passed through to the backend
pub async fn submit_audio(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("application/octet-stream");

    let audio = match CapturedAudio::new(body, content_type) {
        Ok(audio) => audio,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, format!("{:#}", e)),
    };

    match state.orchestrator.submit(audio).await {
        Ok(session_id) => (
            StatusCode::OK,
            Json(SessionResponse {
                session_id,
                status: SessionState::Uploading,
            }),
        )
            .into_response(),
        Err(e) => {
            error!("Failed to submit audio: {:#}", e);
            error_response(
                StatusCode::CONFLICT,
                format!("Failed to submit audio: {:#}", e),
            )
        }
    }
}

/// POST /session/cancel
/// Stop the current session
pub async fn cancel_session(State(state): State<AppState>) -> Response {
    let Some(session_id) = state.orchestrator.cancel().await else {
        return no_session();
    };

    let status = state
        .orchestrator
        .stats()
        .await
        .map(|stats| stats.state)
        .unwrap_or(SessionState::Cancelled);

    (StatusCode::OK, Json(SessionResponse { session_id, status })).into_response()
}

/// GET /session/status
/// Statistics for the current session
pub async fn get_session_status(State(state): State<AppState>) -> Response {
    match state.orchestrator.stats().await {
        Some(stats) => (StatusCode::OK, Json(stats)).into_response(),
        None => no_session(),
    }
}

/// GET /session/transcript
/// Reply text accumulated so far
pub async fn get_session_transcript(State(state): State<AppState>) -> Response {
    match state.orchestrator.transcript().await {
        Some((session_id, text)) => {
            (StatusCode::OK, Json(TranscriptResponse { session_id, text })).into_response()
        }
        None => no_session(),
    }
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
