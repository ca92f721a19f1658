//! Domain types and the storage seams for sessions and usage events.
//!
//! A `Session` exclusively owns its `Event`s: deleting a session removes its
//! events in the same transaction, and nothing else ever mutates an event
//! after insertion.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

use crate::session::error::SessionResult;

/// Opaque per-session key-value document. Never interpreted by the core.
pub type Metadata = Map<String, Value>;

/// A caller-scoped identity bucket persisting usage history.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    /// Internal durable identifier, never exposed in API bodies.
    pub id: i64,
    /// Externally visible identity, unique, assigned once, immutable.
    pub token: String,
    pub created_at: OffsetDateTime,
    /// Monotonically non-decreasing; last writer wins under concurrency.
    pub last_activity: OffsetDateTime,
    pub metadata: Metadata,
    /// Cleared only by soft-deactivation cleanup; never flips back on its own.
    pub is_active: bool,
}

/// Outcome classification of one model invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Success,
    Error,
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventStatus::Success => f.write_str("success"),
            EventStatus::Error => f.write_str("error"),
        }
    }
}

impl FromStr for EventStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(EventStatus::Success),
            "error" => Ok(EventStatus::Error),
            other => Err(format!("unknown event status: {}", other)),
        }
    }
}

/// An immutable record of one model invocation attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub id: String,
    pub time: OffsetDateTime,
    pub session_id: i64,
    pub model: Option<String>,
    pub provider: Option<String>,
    pub endpoint: Option<String>,
    pub tokens_prompt: u32,
    pub tokens_completion: u32,
    pub tokens_total: u32,
    pub latency_ms: Option<u32>,
    pub cost_usd: f64,
    pub messages: Option<Value>,
    pub response: Option<String>,
    pub status: EventStatus,
    pub has_error: bool,
    pub error_message: Option<String>,
}

/// Invocation descriptors shared by success and error records.
#[derive(Debug, Clone, Default)]
pub struct EventDescriptor {
    pub model: Option<String>,
    pub provider: Option<String>,
    pub endpoint: Option<String>,
}

/// Success-path payload handed to the ledger.
#[derive(Debug, Clone)]
pub struct SuccessRecord {
    pub tokens_prompt: u32,
    pub tokens_completion: u32,
    pub latency_ms: u32,
    pub cost_usd: f64,
    /// Request payload, stored verbatim for audit.
    pub messages: Value,
    /// Returned text, stored verbatim.
    pub response: String,
}

/// Per-session sums and counts derived from the event set.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionMetrics {
    pub event_count: u64,
    pub total_tokens: u64,
    pub total_cost_usd: f64,
    pub distinct_models: Vec<String>,
}

/// Predicate for cleanup scans and stats counts.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionFilter {
    /// Match sessions whose `last_activity` is strictly before this instant.
    pub last_activity_before: Option<OffsetDateTime>,
    /// Restrict the match to sessions with `is_active = true`.
    pub only_active: bool,
}

impl SessionFilter {
    pub fn idle_since(cutoff: OffsetDateTime) -> Self {
        Self {
            last_activity_before: Some(cutoff),
            only_active: false,
        }
    }

    pub fn active_idle_since(cutoff: OffsetDateTime) -> Self {
        Self {
            last_activity_before: Some(cutoff),
            only_active: true,
        }
    }

    pub fn active() -> Self {
        Self {
            last_activity_before: None,
            only_active: true,
        }
    }
}

/// Owner of session identity and lifecycle. Sole writer of session fields.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert a fresh session for `token`. Fails with
    /// [`crate::session::SessionError::Conflict`] when the token exists.
    async fn create(&self, token: &str) -> SessionResult<Session>;

    /// Look up by token, bumping `last_activity`; insert on first sighting.
    /// Safe under concurrent first-sightings of the same token: the unique
    /// token constraint decides the winner and the loser re-fetches.
    async fn get_or_create(&self, token: &str) -> SessionResult<Session>;

    /// Read-only lookup. Does not touch `last_activity`.
    async fn get_by_token(&self, token: &str) -> SessionResult<Session>;

    /// Replace `metadata` with `{}` and bump `last_activity`.
    async fn reset_metadata(&self, session: &Session) -> SessionResult<Session>;

    /// Remove the session and all its events in one transaction.
    async fn delete(&self, session: &Session) -> SessionResult<()>;

    /// Enumerate sessions matching `filter`. Order is unspecified.
    async fn list_where(&self, filter: SessionFilter) -> SessionResult<Vec<Session>>;

    /// Count sessions matching `filter`.
    async fn count_where(&self, filter: SessionFilter) -> SessionResult<u64>;

    /// Delete the session (and its events) only if its `last_activity` is
    /// still before `cutoff`. Returns the number of events removed, or
    /// `None` when the session was touched since the scan or already gone.
    async fn delete_if_idle(
        &self,
        session_id: i64,
        cutoff: OffsetDateTime,
    ) -> SessionResult<Option<usize>>;

    /// Flip `is_active` to false only if the session is still active and its
    /// `last_activity` is before `cutoff`. Returns whether a row changed.
    async fn deactivate_if_idle(
        &self,
        session_id: i64,
        cutoff: OffsetDateTime,
    ) -> SessionResult<bool>;
}

/// Owner of the append-only event ledger. Sole writer of event records.
#[async_trait]
pub trait EventLedger: Send + Sync {
    async fn record_success(
        &self,
        session: &Session,
        descriptor: EventDescriptor,
        record: SuccessRecord,
    ) -> SessionResult<Event>;

    /// Record a failed attempt: zero tokens, zero cost, `status = error`.
    async fn record_error(
        &self,
        session: &Session,
        descriptor: EventDescriptor,
        error_message: &str,
    ) -> SessionResult<Event>;

    /// Newest-first, bounded listing.
    async fn list_recent(&self, session: &Session, limit: usize) -> SessionResult<Vec<Event>>;

    /// Sums and counts over all events of the session. A session with zero
    /// events yields zeros and an empty model list, not an error.
    async fn aggregate(&self, session: &Session) -> SessionResult<SessionMetrics>;

    /// Remove every event of the session, returning how many were deleted.
    async fn delete_all_for_session(&self, session: &Session) -> SessionResult<usize>;

    /// Count events owned by the given sessions (cleanup sizing).
    async fn count_for_sessions(&self, session_ids: &[i64]) -> SessionResult<u64>;
}
