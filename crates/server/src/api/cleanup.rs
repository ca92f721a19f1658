//! Cleanup endpoints: a monitoring snapshot and a manual trigger.

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use super::{ApiError, AppState};
use crate::cleanup::{CleanupOutcome, CleanupPolicy, CleanupStats};

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub success: bool,
    pub stats: CleanupStats,
}

/// `GET /api/v1/cleanup/stats` — read-side snapshot, never mutates.
pub async fn stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, ApiError> {
    let stats = state.cleanup.stats().await?;
    Ok(Json(StatsResponse {
        success: true,
        stats,
    }))
}

#[derive(Debug, Deserialize)]
pub struct RunQuery {
    /// Defaults to true: a bare trigger previews instead of deleting.
    pub dry_run: Option<bool>,
    pub policy: Option<CleanupPolicy>,
}

/// `POST /api/v1/cleanup/run?dry_run=bool&policy=expired|inactive`
pub async fn run(
    State(state): State<AppState>,
    Query(query): Query<RunQuery>,
) -> Json<CleanupOutcome> {
    let dry_run = query.dry_run.unwrap_or(true);
    let policy = query.policy.unwrap_or(CleanupPolicy::Expired);
    Json(state.cleanup.run(policy, dry_run).await)
}
