//! Idle-session reclamation.
//!
//! Two policies over the same scan machinery: `Expired` hard-deletes
//! sessions idle past the retention window (events cascade), `Inactive`
//! soft-deactivates sessions idle past the shorter inactivity window
//! (events untouched). Every invocation is a bounded batch; nothing here
//! schedules itself — an HTTP caller or the CLI triggers a run.
//!
//! The selection snapshot is advisory: each apply re-validates
//! `last_activity` against the cutoff inside the mutating statement, so a
//! session touched mid-batch survives, and a session already gone is
//! skipped rather than failed. Errors never escape as panics or `Err`;
//! callers always receive a well-formed [`CleanupOutcome`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};

use crate::session::error::SessionResult;
use crate::session::store::{EventLedger, SessionFilter, SessionStore};
use crate::session::SqliteStorage;

/// Which reclamation rule a run applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CleanupPolicy {
    /// Hard-delete sessions idle past the retention window.
    Expired,
    /// Mark sessions idle past the inactivity window as inactive.
    Inactive,
}

/// Windows driving the two policies.
#[derive(Debug, Clone, Copy)]
pub struct CleanupConfig {
    pub retention_window: Duration,
    pub inactivity_window: Duration,
}

/// Structured result of one cleanup invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CleanupOutcome {
    pub success: bool,
    pub dry_run: bool,
    pub policy: CleanupPolicy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sessions_deleted: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub events_deleted: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sessions_would_delete: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub events_would_delete: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sessions_marked_inactive: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sessions_would_mark: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub message: String,
}

impl CleanupOutcome {
    fn base(policy: CleanupPolicy, dry_run: bool) -> Self {
        Self {
            success: true,
            dry_run,
            policy,
            sessions_deleted: None,
            events_deleted: None,
            sessions_would_delete: None,
            events_would_delete: None,
            sessions_marked_inactive: None,
            sessions_would_mark: None,
            error: None,
            message: String::new(),
        }
    }

    fn failure(policy: CleanupPolicy, dry_run: bool, error: String) -> Self {
        let mut outcome = Self::base(policy, dry_run);
        outcome.success = false;
        outcome.message = format!("cleanup failed: {}", error);
        outcome.error = Some(error);
        outcome
    }
}

/// Read-side snapshot for monitoring; never mutates anything.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CleanupStats {
    pub total_sessions: u64,
    pub active_sessions: u64,
    pub inactive_sessions: u64,
    pub expired_sessions: u64,
    pub inactive_last_24h: u64,
    pub retention_days: i64,
    pub cutoff_time: String,
}

/// Batch reclamation over the session store.
pub struct CleanupService {
    storage: Arc<SqliteStorage>,
    config: CleanupConfig,
}

impl CleanupService {
    pub fn new(storage: Arc<SqliteStorage>, config: CleanupConfig) -> Self {
        Self { storage, config }
    }

    /// Run one batch. Storage failures come back as a failed outcome, never
    /// as an error the caller has to unwind.
    pub async fn run(&self, policy: CleanupPolicy, dry_run: bool) -> CleanupOutcome {
        log::info!("starting session cleanup (policy={:?}, dry_run={})", policy, dry_run);
        let result = match policy {
            CleanupPolicy::Expired => self.run_expired(dry_run).await,
            CleanupPolicy::Inactive => self.run_inactive(dry_run).await,
        };
        match result {
            Ok(outcome) => {
                log::info!("cleanup finished: {}", outcome.message);
                outcome
            }
            Err(err) => {
                log::error!("cleanup aborted: {}", err);
                CleanupOutcome::failure(policy, dry_run, err.to_string())
            }
        }
    }

    async fn run_expired(&self, dry_run: bool) -> SessionResult<CleanupOutcome> {
        let cutoff = OffsetDateTime::now_utc() - self.config.retention_window;
        let expired = self
            .storage
            .list_where(SessionFilter::idle_since(cutoff))
            .await?;

        let mut outcome = CleanupOutcome::base(CleanupPolicy::Expired, dry_run);
        if expired.is_empty() {
            outcome.sessions_deleted = Some(0);
            outcome.events_deleted = Some(0);
            outcome.message = "no expired sessions found".to_string();
            return Ok(outcome);
        }

        // Sizing before any mutation, for reporting.
        let ids: Vec<i64> = expired.iter().map(|s| s.id).collect();
        let event_count = self.storage.count_for_sessions(&ids).await?;
        log::info!(
            "cleanup selected {} sessions holding {} events (cutoff {})",
            expired.len(),
            event_count,
            cutoff
        );

        if dry_run {
            outcome.sessions_deleted = Some(0);
            outcome.events_deleted = Some(0);
            outcome.sessions_would_delete = Some(expired.len() as u64);
            outcome.events_would_delete = Some(event_count);
            outcome.message = format!(
                "dry run: would delete {} sessions and {} events",
                expired.len(),
                event_count
            );
            return Ok(outcome);
        }

        let mut sessions_deleted = 0u64;
        let mut events_deleted = 0u64;
        for session in &expired {
            match self.storage.delete_if_idle(session.id, cutoff).await? {
                Some(events) => {
                    log::info!(
                        "deleted session {} (last active {})",
                        session.token,
                        session.last_activity
                    );
                    sessions_deleted += 1;
                    events_deleted += events as u64;
                }
                None => {
                    log::debug!(
                        "session {} touched or removed since the scan, skipping",
                        session.token
                    );
                }
            }
        }

        outcome.sessions_deleted = Some(sessions_deleted);
        outcome.events_deleted = Some(events_deleted);
        outcome.message = format!(
            "deleted {} sessions and {} events",
            sessions_deleted, events_deleted
        );
        Ok(outcome)
    }

    async fn run_inactive(&self, dry_run: bool) -> SessionResult<CleanupOutcome> {
        let cutoff = OffsetDateTime::now_utc() - self.config.inactivity_window;
        let idle = self
            .storage
            .list_where(SessionFilter::active_idle_since(cutoff))
            .await?;

        let mut outcome = CleanupOutcome::base(CleanupPolicy::Inactive, dry_run);
        if idle.is_empty() {
            outcome.sessions_marked_inactive = Some(0);
            outcome.message = "no inactive sessions found".to_string();
            return Ok(outcome);
        }

        if dry_run {
            outcome.sessions_marked_inactive = Some(0);
            outcome.sessions_would_mark = Some(idle.len() as u64);
            outcome.message =
                format!("dry run: would mark {} sessions as inactive", idle.len());
            return Ok(outcome);
        }

        let mut marked = 0u64;
        for session in &idle {
            if self.storage.deactivate_if_idle(session.id, cutoff).await? {
                marked += 1;
            } else {
                log::debug!(
                    "session {} touched or already inactive, skipping",
                    session.token
                );
            }
        }

        outcome.sessions_marked_inactive = Some(marked);
        outcome.message = format!("marked {} sessions as inactive", marked);
        Ok(outcome)
    }

    /// Monitoring snapshot, independent of the apply machinery.
    pub async fn stats(&self) -> SessionResult<CleanupStats> {
        let now = OffsetDateTime::now_utc();
        let cutoff = now - self.config.retention_window;
        let day_cutoff = now - Duration::hours(24);

        let total_sessions = self.storage.count_where(SessionFilter::default()).await?;
        let active_sessions = self.storage.count_where(SessionFilter::active()).await?;
        let expired_sessions = self
            .storage
            .count_where(SessionFilter::idle_since(cutoff))
            .await?;
        let inactive_last_24h = self
            .storage
            .count_where(SessionFilter::active_idle_since(day_cutoff))
            .await?;

        Ok(CleanupStats {
            total_sessions,
            active_sessions,
            inactive_sessions: total_sessions - active_sessions,
            expired_sessions,
            inactive_last_24h,
            retention_days: self.config.retention_window.whole_days(),
            cutoff_time: cutoff.format(&Rfc3339).unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use crate::session::store::{EventDescriptor, SessionStore, SuccessRecord};

    fn config() -> CleanupConfig {
        CleanupConfig {
            retention_window: Duration::days(7),
            inactivity_window: Duration::hours(24),
        }
    }

    fn service() -> (CleanupService, Arc<SqliteStorage>) {
        let storage = Arc::new(SqliteStorage::open_in_memory().expect("in-memory db"));
        (CleanupService::new(storage.clone(), config()), storage)
    }

    async fn seed_event(storage: &SqliteStorage, session: &crate::session::Session) {
        storage
            .record_success(
                session,
                EventDescriptor {
                    model: Some("m".to_string()),
                    provider: Some("anthropic".to_string()),
                    endpoint: None,
                },
                SuccessRecord {
                    tokens_prompt: 10,
                    tokens_completion: 5,
                    latency_ms: 50,
                    cost_usd: 0.001,
                    messages: json!([]),
                    response: "ok".to_string(),
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn hard_delete_honors_retention_boundary() {
        let (service, storage) = service();
        let now = OffsetDateTime::now_utc();

        let old = storage.create("old").await.unwrap();
        seed_event(&storage, &old).await;
        storage
            .set_last_activity(old.id, now - Duration::days(8))
            .await
            .unwrap();

        let recent = storage.create("recent").await.unwrap();
        seed_event(&storage, &recent).await;
        storage
            .set_last_activity(recent.id, now - Duration::days(1))
            .await
            .unwrap();

        let outcome = service.run(CleanupPolicy::Expired, false).await;
        assert!(outcome.success);
        assert_eq!(outcome.sessions_deleted, Some(1));
        assert_eq!(outcome.events_deleted, Some(1));

        assert!(storage.get_by_token("old").await.is_err());
        let survivor = storage.get_by_token("recent").await.unwrap();
        let metrics = storage.aggregate(&survivor).await.unwrap();
        assert_eq!(metrics.event_count, 1);
    }

    #[tokio::test]
    async fn soft_deactivate_keeps_events() {
        let (service, storage) = service();
        let now = OffsetDateTime::now_utc();

        let idle = storage.create("idle").await.unwrap();
        seed_event(&storage, &idle).await;
        storage
            .set_last_activity(idle.id, now - Duration::hours(30))
            .await
            .unwrap();

        let busy = storage.create("busy").await.unwrap();

        let outcome = service.run(CleanupPolicy::Inactive, false).await;
        assert!(outcome.success);
        assert_eq!(outcome.sessions_marked_inactive, Some(1));

        let idle = storage.get_by_token("idle").await.unwrap();
        assert!(!idle.is_active);
        let metrics = storage.aggregate(&idle).await.unwrap();
        assert_eq!(metrics.event_count, 1);

        assert!(storage.get_by_token("busy").await.unwrap().is_active);
    }

    #[tokio::test]
    async fn dry_run_reports_without_mutating() {
        let (service, storage) = service();
        let now = OffsetDateTime::now_utc();

        let old = storage.create("old").await.unwrap();
        seed_event(&storage, &old).await;
        seed_event(&storage, &old).await;
        storage
            .set_last_activity(old.id, now - Duration::days(8))
            .await
            .unwrap();

        let before_sessions = storage.count_where(SessionFilter::default()).await.unwrap();
        let before = storage.aggregate(&old).await.unwrap();

        let outcome = service.run(CleanupPolicy::Expired, true).await;
        assert!(outcome.success);
        assert!(outcome.dry_run);
        assert_eq!(outcome.sessions_deleted, Some(0));
        assert_eq!(outcome.events_deleted, Some(0));
        assert_eq!(outcome.sessions_would_delete, Some(1));
        assert_eq!(outcome.events_would_delete, Some(2));

        // Identical selection results before and after: nothing was written.
        let after_sessions = storage.count_where(SessionFilter::default()).await.unwrap();
        let after = storage.aggregate(&old).await.unwrap();
        assert_eq!(before_sessions, after_sessions);
        assert_eq!(before, after);
        assert!(storage.get_by_token("old").await.unwrap().is_active);

        let outcome = service.run(CleanupPolicy::Inactive, true).await;
        assert!(outcome.success);
        assert_eq!(outcome.sessions_marked_inactive, Some(0));
        assert_eq!(outcome.sessions_would_mark, Some(1));
        assert!(storage.get_by_token("old").await.unwrap().is_active);
    }

    #[tokio::test]
    async fn empty_selection_is_a_clean_result() {
        let (service, storage) = service();
        storage.create("fresh").await.unwrap();

        let outcome = service.run(CleanupPolicy::Expired, false).await;
        assert!(outcome.success);
        assert_eq!(outcome.sessions_deleted, Some(0));
        assert_eq!(outcome.events_deleted, Some(0));
        assert_eq!(outcome.message, "no expired sessions found");
    }

    #[tokio::test]
    async fn stats_snapshot_counts_every_bucket() {
        let (service, storage) = service();
        let now = OffsetDateTime::now_utc();

        let expired = storage.create("expired").await.unwrap();
        storage
            .set_last_activity(expired.id, now - Duration::days(8))
            .await
            .unwrap();

        let dormant = storage.create("dormant").await.unwrap();
        storage
            .set_last_activity(dormant.id, now - Duration::hours(30))
            .await
            .unwrap();

        let deactivated = storage.create("deactivated").await.unwrap();
        storage
            .set_last_activity(deactivated.id, now - Duration::hours(30))
            .await
            .unwrap();
        storage
            .deactivate_if_idle(deactivated.id, now - Duration::hours(24))
            .await
            .unwrap();

        storage.create("fresh").await.unwrap();

        let stats = service.stats().await.unwrap();
        assert_eq!(stats.total_sessions, 4);
        assert_eq!(stats.active_sessions, 3);
        assert_eq!(stats.inactive_sessions, 1);
        assert_eq!(stats.expired_sessions, 1);
        // Idle beyond 24h and still active: "expired" and "dormant".
        assert_eq!(stats.inactive_last_24h, 2);
        assert_eq!(stats.retention_days, 7);
        assert!(!stats.cutoff_time.is_empty());
    }
}
