//! Tests for the SQLite storage using in-memory databases.
//!
//! Each test opens a fresh in-memory database with the full schema applied,
//! then exercises the store traits.

#[cfg(test)]
mod tests {
    use serde_json::json;
    use time::{Duration, OffsetDateTime};

    use crate::session::error::SessionError;
    use crate::session::store::{
        EventDescriptor, EventLedger, EventStatus, SessionFilter, SessionStore, SuccessRecord,
    };
    use crate::session::SqliteStorage;

    fn storage() -> SqliteStorage {
        SqliteStorage::open_in_memory().expect("in-memory db")
    }

    fn descriptor(model: &str) -> EventDescriptor {
        EventDescriptor {
            model: Some(model.to_string()),
            provider: Some("anthropic".to_string()),
            endpoint: Some("/api/v1/chat".to_string()),
        }
    }

    fn success_record(tokens_prompt: u32, tokens_completion: u32, cost_usd: f64) -> SuccessRecord {
        SuccessRecord {
            tokens_prompt,
            tokens_completion,
            latency_ms: 120,
            cost_usd,
            messages: json!([{"role": "user", "content": "hello"}]),
            response: "hi".to_string(),
        }
    }

    // ── Session store ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn create_sets_defaults() {
        let storage = storage();
        let session = storage.create("tok-1").await.unwrap();

        assert_eq!(session.token, "tok-1");
        assert!(session.is_active);
        assert!(session.metadata.is_empty());
        assert_eq!(session.created_at, session.last_activity);
    }

    #[tokio::test]
    async fn create_duplicate_token_conflicts() {
        let storage = storage();
        storage.create("tok-1").await.unwrap();

        let err = storage.create("tok-1").await.unwrap_err();
        assert!(matches!(err, SessionError::Conflict(_)));
    }

    #[tokio::test]
    async fn get_or_create_is_idempotent_and_touches() {
        let storage = storage();
        let first = storage.get_or_create("tok-1").await.unwrap();

        storage
            .set_last_activity(first.id, first.last_activity - Duration::hours(1))
            .await
            .unwrap();
        let before = storage.get_by_token("tok-1").await.unwrap().last_activity;

        let second = storage.get_or_create("tok-1").await.unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.created_at, first.created_at);
        assert!(second.last_activity >= before);
    }

    #[tokio::test]
    async fn concurrent_first_sightings_create_one_row() {
        let storage = storage();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let storage = storage.clone();
            handles.push(tokio::spawn(async move {
                storage.get_or_create("raced-token").await
            }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            let session = handle.await.unwrap().unwrap();
            ids.push(session.id);
        }
        ids.dedup();
        assert_eq!(ids.len(), 1, "all callers must resolve the same session row");

        let count = storage.count_where(SessionFilter::default()).await.unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn get_by_token_does_not_touch_activity() {
        let storage = storage();
        let session = storage.create("tok-1").await.unwrap();
        storage
            .set_last_activity(session.id, session.last_activity - Duration::hours(2))
            .await
            .unwrap();

        let first = storage.get_by_token("tok-1").await.unwrap();
        let second = storage.get_by_token("tok-1").await.unwrap();
        assert_eq!(first.last_activity, second.last_activity);
    }

    #[tokio::test]
    async fn get_by_token_missing_is_not_found() {
        let storage = storage();
        let err = storage.get_by_token("ghost").await.unwrap_err();
        assert!(matches!(err, SessionError::NotFound(token) if token == "ghost"));
    }

    #[tokio::test]
    async fn reset_metadata_clears_and_bumps_activity() {
        let storage = storage();
        let mut session = storage.create("tok-1").await.unwrap();
        session
            .metadata
            .insert("theme".to_string(), json!("dark"));
        storage
            .set_metadata(session.id, &session.metadata)
            .await
            .unwrap();
        storage
            .set_last_activity(session.id, session.last_activity - Duration::hours(1))
            .await
            .unwrap();
        let stale = storage.get_by_token("tok-1").await.unwrap();
        assert!(!stale.metadata.is_empty());

        let reset = storage.reset_metadata(&stale).await.unwrap();
        assert!(reset.metadata.is_empty());
        assert!(reset.last_activity > stale.last_activity);
        assert_eq!(reset.id, stale.id);
        assert_eq!(reset.token, stale.token);
        assert_eq!(reset.created_at, stale.created_at);
        assert!(reset.is_active);
    }

    #[tokio::test]
    async fn delete_removes_session_and_events() {
        let storage = storage();
        let session = storage.create("tok-1").await.unwrap();
        storage
            .record_success(&session, descriptor("m"), success_record(10, 5, 0.01))
            .await
            .unwrap();

        storage.delete(&session).await.unwrap();

        let err = storage.get_by_token("tok-1").await.unwrap_err();
        assert!(matches!(err, SessionError::NotFound(_)));
        let events = storage.count_for_sessions(&[session.id]).await.unwrap();
        assert_eq!(events, 0);
    }

    #[tokio::test]
    async fn delete_missing_session_is_not_found() {
        let storage = storage();
        let session = storage.create("tok-1").await.unwrap();
        storage.delete(&session).await.unwrap();

        let err = storage.delete(&session).await.unwrap_err();
        assert!(matches!(err, SessionError::NotFound(_)));
    }

    #[tokio::test]
    async fn list_where_filters_by_cutoff_and_activity() {
        let storage = storage();
        let now = OffsetDateTime::now_utc();

        let old = storage.create("old").await.unwrap();
        storage
            .set_last_activity(old.id, now - Duration::days(8))
            .await
            .unwrap();
        let _fresh = storage.create("fresh").await.unwrap();
        let dormant = storage.create("dormant").await.unwrap();
        storage
            .set_last_activity(dormant.id, now - Duration::days(8))
            .await
            .unwrap();
        storage
            .deactivate_if_idle(dormant.id, now - Duration::days(1))
            .await
            .unwrap();

        let cutoff = now - Duration::days(7);
        let idle = storage
            .list_where(SessionFilter::idle_since(cutoff))
            .await
            .unwrap();
        let idle_tokens: Vec<&str> = idle.iter().map(|s| s.token.as_str()).collect();
        assert_eq!(idle.len(), 2);
        assert!(idle_tokens.contains(&"old"));
        assert!(idle_tokens.contains(&"dormant"));
        assert!(!idle_tokens.contains(&"fresh"));

        let idle_active = storage
            .list_where(SessionFilter::active_idle_since(cutoff))
            .await
            .unwrap();
        assert_eq!(idle_active.len(), 1);
        assert_eq!(idle_active[0].token, "old");
    }

    #[tokio::test]
    async fn delete_if_idle_respects_freshness_recheck() {
        let storage = storage();
        let now = OffsetDateTime::now_utc();
        let session = storage.create("tok-1").await.unwrap();
        storage
            .record_success(&session, descriptor("m"), success_record(10, 5, 0.01))
            .await
            .unwrap();

        // Still fresh: nothing happens.
        let kept = storage
            .delete_if_idle(session.id, now - Duration::days(7))
            .await
            .unwrap();
        assert_eq!(kept, None);
        assert!(storage.get_by_token("tok-1").await.is_ok());

        // Backdate, then the same call removes the session and reports its events.
        storage
            .set_last_activity(session.id, now - Duration::days(8))
            .await
            .unwrap();
        let removed = storage
            .delete_if_idle(session.id, now - Duration::days(7))
            .await
            .unwrap();
        assert_eq!(removed, Some(1));

        // Retry on an already-gone session is a no-op, not an error.
        let retried = storage
            .delete_if_idle(session.id, now - Duration::days(7))
            .await
            .unwrap();
        assert_eq!(retried, None);
    }

    #[tokio::test]
    async fn deactivate_if_idle_flips_once() {
        let storage = storage();
        let now = OffsetDateTime::now_utc();
        let session = storage.create("tok-1").await.unwrap();
        storage
            .set_last_activity(session.id, now - Duration::hours(30))
            .await
            .unwrap();

        let cutoff = now - Duration::hours(24);
        assert!(storage.deactivate_if_idle(session.id, cutoff).await.unwrap());
        assert!(!storage.get_by_token("tok-1").await.unwrap().is_active);

        // Already inactive: no row changes on retry.
        assert!(!storage.deactivate_if_idle(session.id, cutoff).await.unwrap());
    }

    // ── Event ledger ──────────────────────────────────────────────────────────

    #[tokio::test]
    async fn record_success_totals_tokens() {
        let storage = storage();
        let session = storage.create("tok-1").await.unwrap();

        let event = storage
            .record_success(&session, descriptor("claude-3-5-sonnet-20241022"), success_record(1000, 500, 0.0105))
            .await
            .unwrap();

        assert_eq!(event.tokens_total, 1500);
        assert_eq!(event.status, EventStatus::Success);
        assert!(!event.has_error);
        assert_eq!(event.latency_ms, Some(120));
        assert_eq!(event.session_id, session.id);
    }

    #[tokio::test]
    async fn record_error_zeroes_usage_and_cost() {
        let storage = storage();
        let session = storage.create("tok-1").await.unwrap();

        let event = storage
            .record_error(&session, descriptor("claude-3-5-sonnet-20241022"), "upstream timeout")
            .await
            .unwrap();

        assert_eq!(event.tokens_total, 0);
        assert_eq!(event.cost_usd, 0.0);
        assert_eq!(event.status, EventStatus::Error);
        assert!(event.has_error);
        assert_eq!(event.latency_ms, None);
        assert_eq!(event.error_message.as_deref(), Some("upstream timeout"));
    }

    #[tokio::test]
    async fn list_recent_is_newest_first_and_bounded() {
        let storage = storage();
        let session = storage.create("tok-1").await.unwrap();

        let mut ids = Vec::new();
        for i in 0..5 {
            let event = storage
                .record_success(&session, descriptor("m"), success_record(i, i, 0.0))
                .await
                .unwrap();
            ids.push(event.id);
        }

        let recent = storage.list_recent(&session, 3).await.unwrap();
        assert_eq!(recent.len(), 3);
        let recent_ids: Vec<&str> = recent.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(recent_ids, vec![ids[4].as_str(), ids[3].as_str(), ids[2].as_str()]);
        assert!(recent[0].time >= recent[1].time);
        assert!(recent[1].time >= recent[2].time);

        let stored = storage.list_recent(&session, 10).await.unwrap();
        let fetched = stored.iter().find(|e| e.id == ids[4]).unwrap();
        assert_eq!(fetched.messages, Some(serde_json::json!([{"role": "user", "content": "hello"}])));
    }

    #[tokio::test]
    async fn aggregate_sums_across_outcomes() {
        let storage = storage();
        let session = storage.create("tok-1").await.unwrap();
        storage
            .record_success(&session, descriptor("model-a"), success_record(100, 50, 0.002))
            .await
            .unwrap();
        storage
            .record_success(&session, descriptor("model-b"), success_record(200, 100, 0.004))
            .await
            .unwrap();
        storage
            .record_error(&session, descriptor("model-a"), "boom")
            .await
            .unwrap();

        let metrics = storage.aggregate(&session).await.unwrap();
        assert_eq!(metrics.event_count, 3);
        assert_eq!(metrics.total_tokens, 450);
        assert!((metrics.total_cost_usd - 0.006).abs() < 1e-12);
        assert_eq!(metrics.distinct_models, vec!["model-a", "model-b"]);
    }

    #[tokio::test]
    async fn aggregate_on_empty_session_is_zeros() {
        let storage = storage();
        let session = storage.create("tok-1").await.unwrap();

        let metrics = storage.aggregate(&session).await.unwrap();
        assert_eq!(metrics.event_count, 0);
        assert_eq!(metrics.total_tokens, 0);
        assert_eq!(metrics.total_cost_usd, 0.0);
        assert!(metrics.distinct_models.is_empty());
    }

    #[tokio::test]
    async fn delete_all_for_session_reports_count() {
        let storage = storage();
        let session = storage.create("tok-1").await.unwrap();
        for _ in 0..3 {
            storage
                .record_success(&session, descriptor("m"), success_record(1, 1, 0.0))
                .await
                .unwrap();
        }

        let deleted = storage.delete_all_for_session(&session).await.unwrap();
        assert_eq!(deleted, 3);

        // Session reset semantics: events gone, the session row survives.
        let survivor = storage.get_by_token("tok-1").await.unwrap();
        assert_eq!(survivor.id, session.id);
        assert_eq!(survivor.created_at, session.created_at);
        let metrics = storage.aggregate(&session).await.unwrap();
        assert_eq!(metrics.event_count, 0);

        let again = storage.delete_all_for_session(&session).await.unwrap();
        assert_eq!(again, 0);
    }

    #[tokio::test]
    async fn events_scoped_to_their_session() {
        let storage = storage();
        let a = storage.create("tok-a").await.unwrap();
        let b = storage.create("tok-b").await.unwrap();
        storage
            .record_success(&a, descriptor("m"), success_record(10, 10, 0.0))
            .await
            .unwrap();

        let b_events = storage.list_recent(&b, 10).await.unwrap();
        assert!(b_events.is_empty());
        assert_eq!(storage.count_for_sessions(&[a.id]).await.unwrap(), 1);
        assert_eq!(storage.count_for_sessions(&[b.id]).await.unwrap(), 0);
        assert_eq!(storage.count_for_sessions(&[a.id, b.id]).await.unwrap(), 1);
        assert_eq!(storage.count_for_sessions(&[]).await.unwrap(), 0);
    }
}
