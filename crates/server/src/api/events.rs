//! Event listing endpoints.

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use super::{ApiError, AppState, current_session, fmt_time};
use crate::session::store::EventLedger;

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 500;

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct EventResponse {
    pub id: String,
    pub time: String,
    pub model: String,
    pub provider: String,
    pub tokens_total: u32,
    pub tokens_prompt: u32,
    pub tokens_completion: u32,
    pub cost_usd: f64,
    pub latency_ms: Option<u32>,
    pub status: String,
    pub has_error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `GET /api/v1/events/recent?limit=N` — newest first for the current session.
pub async fn recent_events(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<RecentQuery>,
) -> Result<Json<Vec<EventResponse>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
    let session = current_session(&state, &headers).await?;
    let events = state.storage.list_recent(&session, limit).await?;

    let body = events
        .into_iter()
        .map(|event| EventResponse {
            id: event.id,
            time: fmt_time(&event.time),
            model: event.model.unwrap_or_else(|| "unknown".to_string()),
            provider: event.provider.unwrap_or_else(|| "unknown".to_string()),
            tokens_total: event.tokens_total,
            tokens_prompt: event.tokens_prompt,
            tokens_completion: event.tokens_completion,
            cost_usd: event.cost_usd,
            latency_ms: event.latency_ms,
            status: event.status.to_string(),
            has_error: event.has_error,
            error: event.error_message,
        })
        .collect();
    Ok(Json(body))
}
