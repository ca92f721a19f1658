//! HTTP surface: routing, shared state, and error mapping.

pub mod chat;
pub mod cleanup;
pub mod events;
pub mod sessions;

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tower_http::cors::CorsLayer;

use crate::chat_service::ChatService;
use crate::cleanup::CleanupService;
use crate::session::error::SessionError;
use crate::session::store::{Session, SessionStore};
use crate::session::{SqliteStorage, resolve_token};

/// Header consulted when no session cookie is present (non-browser callers).
pub const SESSION_HEADER: &str = "x-session-id";

/// Shared handler state, built once at startup.
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<SqliteStorage>,
    pub chat: Arc<ChatService>,
    pub cleanup: Arc<CleanupService>,
    pub cookie_name: String,
    /// Cookie lifetime in seconds; matches the retention window.
    pub cookie_max_age_secs: i64,
}

/// Build the full application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/sessions", post(sessions::create_session))
        .route("/api/v1/sessions/current", get(sessions::get_current_session))
        .route("/api/v1/sessions/current/reset", post(sessions::reset_current_session))
        .route("/api/v1/sessions/current/metrics", get(sessions::current_metrics))
        .route(
            "/api/v1/sessions/{token}",
            get(sessions::get_session).delete(sessions::delete_session),
        )
        .route("/api/v1/sessions/{token}/reset", post(sessions::reset_session))
        .route("/api/v1/chat", post(chat::chat))
        .route("/api/v1/events/recent", get(events::recent_events))
        .route("/api/v1/cleanup/stats", get(cleanup::stats))
        .route("/api/v1/cleanup/run", post(cleanup::run))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ── Error mapping ─────────────────────────────────────────────────────────────

/// A failure a handler surfaces to the caller: status code plus a
/// structured `{"error": ...}` body, never a raw backtrace.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        let status = match &err {
            SessionError::NotFound(_) => StatusCode::NOT_FOUND,
            SessionError::Conflict(_) => StatusCode::CONFLICT,
            SessionError::Inactive(_) => StatusCode::FORBIDDEN,
            SessionError::Provider(_)
            | SessionError::RateUnknown(_)
            | SessionError::Storage(_)
            | SessionError::Serialization(_)
            | SessionError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            log::error!("request failed: {}", err);
        }
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

// ── Session resolution helpers ────────────────────────────────────────────────

/// Resolve the caller's session: cookie, then header, then a minted token,
/// get-or-created (and touched) in the store.
pub async fn current_session(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<Session, ApiError> {
    let cookie = cookie_value(headers, &state.cookie_name);
    let header = headers
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok());
    let resolved = resolve_token(cookie.as_deref(), header);
    if resolved.minted {
        log::info!("minted new session token {}", resolved.token);
    }
    Ok(state.storage.get_or_create(&resolved.token).await?)
}

/// Extract a cookie's value from the request headers.
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|raw| raw.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}

/// Build the Set-Cookie value carrying a session token.
pub fn session_cookie(name: &str, token: &str, max_age_secs: i64) -> String {
    format!(
        "{}={}; Path=/; HttpOnly; Max-Age={}; SameSite=Lax",
        name, token, max_age_secs
    )
}

pub(crate) fn fmt_time(time: &OffsetDateTime) -> String {
    time.format(&Rfc3339).unwrap_or_default()
}

// ── Health ────────────────────────────────────────────────────────────────────

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    match state.storage.counts().await {
        Ok((sessions, events)) => Json(json!({
            "status": "healthy",
            "database": "connected",
            "sessions": sessions,
            "events": events,
        })),
        Err(err) => {
            log::error!("health check failed: {}", err);
            Json(json!({
                "status": "unhealthy",
                "error": err.to_string(),
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn cookie_value_finds_named_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("other=1; tokenscope_session=abc-123; theme=dark"),
        );
        assert_eq!(
            cookie_value(&headers, "tokenscope_session").as_deref(),
            Some("abc-123")
        );
        assert_eq!(cookie_value(&headers, "missing"), None);
    }

    #[test]
    fn session_cookie_carries_lifetime() {
        let cookie = session_cookie("sid", "tok", 604800);
        assert!(cookie.starts_with("sid=tok;"));
        assert!(cookie.contains("Max-Age=604800"));
        assert!(cookie.contains("HttpOnly"));
    }
}
