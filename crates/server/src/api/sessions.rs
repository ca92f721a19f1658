//! Session management endpoints.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use super::{ApiError, AppState, current_session, fmt_time, session_cookie};
use crate::session::store::{EventLedger, Session, SessionStore};

/// Session body with its aggregate metrics folded in.
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub token: String,
    pub created_at: String,
    pub last_activity: String,
    pub is_active: bool,
    pub metadata: Value,
    pub event_count: u64,
    pub total_tokens: u64,
    pub total_cost_usd: f64,
}

#[derive(Debug, Serialize)]
pub struct CreateSessionResponse {
    pub token: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ResetResponse {
    pub success: bool,
    pub message: String,
    pub token: String,
    pub events_deleted: usize,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub success: bool,
    pub message: String,
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct SessionMetricsResponse {
    pub token: String,
    pub event_count: u64,
    pub total_tokens: u64,
    pub total_cost_usd: f64,
    pub models_used: Vec<String>,
}

async fn session_response(
    state: &AppState,
    session: &Session,
) -> Result<SessionResponse, ApiError> {
    let metrics = state.storage.aggregate(session).await?;
    Ok(SessionResponse {
        token: session.token.clone(),
        created_at: fmt_time(&session.created_at),
        last_activity: fmt_time(&session.last_activity),
        is_active: session.is_active,
        metadata: Value::Object(session.metadata.clone()),
        event_count: metrics.event_count,
        total_tokens: metrics.total_tokens,
        total_cost_usd: metrics.total_cost_usd,
    })
}

/// `POST /api/v1/sessions` — mint a token, insert the session, set the cookie.
pub async fn create_session(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let token = Uuid::new_v4().to_string();
    let session = state.storage.create(&token).await?;
    log::info!("created new session {}", session.token);

    let cookie = session_cookie(&state.cookie_name, &session.token, state.cookie_max_age_secs);
    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(CreateSessionResponse {
            token: session.token,
            message: "session created successfully".to_string(),
        }),
    ))
}

/// `GET /api/v1/sessions/{token}` — read-only lookup, 404 when absent.
pub async fn get_session(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<SessionResponse>, ApiError> {
    let session = state.storage.get_by_token(&token).await?;
    Ok(Json(session_response(&state, &session).await?))
}

/// `GET /api/v1/sessions/current` — resolve (creating if needed) and report.
pub async fn get_current_session(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<SessionResponse>, ApiError> {
    let session = current_session(&state, &headers).await?;
    Ok(Json(session_response(&state, &session).await?))
}

async fn reset(state: &AppState, session: &Session) -> Result<ResetResponse, ApiError> {
    let events_deleted = state.storage.delete_all_for_session(session).await?;
    state.storage.reset_metadata(session).await?;
    log::info!("reset session {}: deleted {} events", session.token, events_deleted);

    Ok(ResetResponse {
        success: true,
        message: format!("session reset successfully, deleted {} events", events_deleted),
        token: session.token.clone(),
        events_deleted,
    })
}

/// `POST /api/v1/sessions/{token}/reset` — drop events, keep the session.
pub async fn reset_session(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<ResetResponse>, ApiError> {
    let session = state.storage.get_by_token(&token).await?;
    Ok(Json(reset(&state, &session).await?))
}

/// `POST /api/v1/sessions/current/reset`
pub async fn reset_current_session(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ResetResponse>, ApiError> {
    let session = current_session(&state, &headers).await?;
    Ok(Json(reset(&state, &session).await?))
}

/// `GET /api/v1/sessions/current/metrics`
pub async fn current_metrics(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<SessionMetricsResponse>, ApiError> {
    let session = current_session(&state, &headers).await?;
    let metrics = state.storage.aggregate(&session).await?;
    Ok(Json(SessionMetricsResponse {
        token: session.token,
        event_count: metrics.event_count,
        total_tokens: metrics.total_tokens,
        total_cost_usd: metrics.total_cost_usd,
        models_used: metrics.distinct_models,
    }))
}

/// `DELETE /api/v1/sessions/{token}` — remove the session and all its events.
pub async fn delete_session(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let session = state.storage.get_by_token(&token).await?;
    state.storage.delete(&session).await?;
    log::info!("deleted session {}", token);

    Ok(Json(DeleteResponse {
        success: true,
        message: "session deleted successfully".to_string(),
        token,
    }))
}
