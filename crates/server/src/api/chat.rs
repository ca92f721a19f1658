//! The chat endpoint.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use super::{ApiError, AppState, current_session};

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub response: String,
    pub event_id: String,
}

/// `POST /api/v1/chat` — invoke the model and record the attempt.
///
/// The chat service guarantees the ledger sees exactly one event whether the
/// upstream call succeeds or fails.
pub async fn chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    if request.message.trim().is_empty() {
        return Err(ApiError::bad_request("message must not be empty"));
    }

    let session = current_session(&state, &headers).await?;
    let outcome = state.chat.chat(&session, &request.message).await?;
    Ok(Json(ChatResponse {
        response: outcome.response,
        event_id: outcome.event_id,
    }))
}
