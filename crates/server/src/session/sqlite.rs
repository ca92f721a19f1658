//! SQLite implementation of [`SessionStore`] and [`EventLedger`].
//!
//! A single connection behind `Arc<Mutex<_>>`; every operation hops onto the
//! blocking pool via `spawn_blocking` so the async runtime never stalls on
//! disk I/O. The mutex is held only for the duration of one statement or
//! transaction, so concurrent requests interleave at statement granularity.
//! Consistency comes from SQLite's constraints and transactions, not from
//! in-process locking: the unique `token` index is what arbitrates racing
//! first-sightings of a session.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::session::error::{SessionError, SessionResult};
use crate::session::schema;
use crate::session::store::{
    Event, EventDescriptor, EventLedger, EventStatus, Metadata, Session, SessionFilter,
    SessionMetrics, SessionStore, SuccessRecord,
};

/// Unified storage handle implementing both store traits.
#[derive(Clone)]
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    /// Open (or create) the database at `path` and apply the schema.
    pub async fn connect(path: PathBuf) -> SessionResult<Self> {
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection, rusqlite::Error> {
            let mut conn = Connection::open(&path)?;
            conn.execute("PRAGMA foreign_keys = ON;", [])?;
            schema::init_schema(&mut conn)?;
            Ok(conn)
        })
        .await
        .map_err(|e| SessionError::Other(format!("failed to spawn blocking task: {}", e)))?
        .map_err(SessionError::from)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory database, used by tests and ephemeral deployments.
    pub fn open_in_memory() -> SessionResult<Self> {
        let mut conn = Connection::open_in_memory().map_err(SessionError::from)?;
        conn.execute("PRAGMA foreign_keys = ON;", [])
            .map_err(SessionError::from)?;
        schema::init_schema(&mut conn).map_err(SessionError::from)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn run_blocking<F, R>(&self, f: F) -> SessionResult<R>
    where
        F: FnOnce(&mut Connection) -> Result<R, rusqlite::Error> + Send + 'static,
        R: Send + 'static,
    {
        let conn_arc = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn_arc.lock().unwrap();
            f(&mut conn)
        })
        .await
        .map_err(|e| SessionError::Other(format!("task execution failed: {}", e)))?
        .map_err(SessionError::from)
    }

    /// Row counts for the health endpoint.
    pub async fn counts(&self) -> SessionResult<(u64, u64)> {
        self.run_blocking(|conn| {
            let sessions: u64 = conn.query_row("SELECT COUNT(*) FROM sessions", [], |r| r.get(0))?;
            let events: u64 = conn.query_row("SELECT COUNT(*) FROM events", [], |r| r.get(0))?;
            Ok((sessions, events))
        })
        .await
    }
}

// ── Timestamp encoding ────────────────────────────────────────────────────────
// Stored as unix-epoch milliseconds so SQL comparison and ordering are exact.

fn to_millis(dt: &OffsetDateTime) -> i64 {
    (dt.unix_timestamp_nanos() / 1_000_000) as i64
}

fn from_millis(ms: i64) -> Result<OffsetDateTime, rusqlite::Error> {
    OffsetDateTime::from_unix_timestamp_nanos(ms as i128 * 1_000_000).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Integer, Box::new(e))
    })
}

/// Current instant truncated to millisecond precision, so values round-trip
/// through storage unchanged.
fn now_millis() -> OffsetDateTime {
    let now = OffsetDateTime::now_utc();
    from_millis(to_millis(&now)).unwrap_or(now)
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

// ── Row mapping ───────────────────────────────────────────────────────────────

const SESSION_COLUMNS: &str = "id, token, created_at, last_activity, metadata, is_active";

fn map_row_to_session(row: &rusqlite::Row) -> Result<Session, rusqlite::Error> {
    let metadata_json: String = row.get(4)?;
    let metadata: Metadata = serde_json::from_str(&metadata_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(Session {
        id: row.get(0)?,
        token: row.get(1)?,
        created_at: from_millis(row.get(2)?)?,
        last_activity: from_millis(row.get(3)?)?,
        metadata,
        is_active: row.get::<_, i64>(5)? != 0,
    })
}

const EVENT_COLUMNS: &str = "id, time, session_id, model, provider, endpoint, tokens_prompt, \
     tokens_completion, tokens_total, latency_ms, cost_usd, messages, response, status, \
     has_error, error_message";

fn map_row_to_event(row: &rusqlite::Row) -> Result<Event, rusqlite::Error> {
    let status_str: String = row.get(13)?;
    let status: EventStatus = status_str.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(
            13,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::other(e)),
        )
    })?;
    let messages = row
        .get::<_, Option<String>>(11)?
        .map(|raw| {
            serde_json::from_str(&raw).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    11,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })
        })
        .transpose()?;

    Ok(Event {
        id: row.get(0)?,
        time: from_millis(row.get(1)?)?,
        session_id: row.get(2)?,
        model: row.get(3)?,
        provider: row.get(4)?,
        endpoint: row.get(5)?,
        tokens_prompt: row.get(6)?,
        tokens_completion: row.get(7)?,
        tokens_total: row.get(8)?,
        latency_ms: row.get(9)?,
        cost_usd: row.get(10)?,
        messages,
        response: row.get(12)?,
        status,
        has_error: row.get::<_, i64>(14)? != 0,
        error_message: row.get(15)?,
    })
}

fn filter_clause(filter: &SessionFilter) -> (&'static str, Vec<i64>) {
    match (filter.last_activity_before, filter.only_active) {
        (Some(cutoff), true) => (
            " WHERE last_activity < ? AND is_active = 1",
            vec![to_millis(&cutoff)],
        ),
        (Some(cutoff), false) => (" WHERE last_activity < ?", vec![to_millis(&cutoff)]),
        (None, true) => (" WHERE is_active = 1", Vec::new()),
        (None, false) => ("", Vec::new()),
    }
}

// ── SessionStore ──────────────────────────────────────────────────────────────

#[async_trait]
impl SessionStore for SqliteStorage {
    async fn create(&self, token: &str) -> SessionResult<Session> {
        let token_owned = token.to_string();
        let now = now_millis();
        let now_ms = to_millis(&now);

        let id = self
            .run_blocking(move |conn| {
                conn.execute(
                    "INSERT INTO sessions (token, created_at, last_activity, metadata, is_active) \
                     VALUES (?, ?, ?, '{}', 1)",
                    params![token_owned, now_ms, now_ms],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await
            .map_err(|err| match err {
                SessionError::Conflict(_) => SessionError::Conflict(token.to_string()),
                other => other,
            })?;

        Ok(Session {
            id,
            token: token.to_string(),
            created_at: now,
            last_activity: now,
            metadata: Metadata::new(),
            is_active: true,
        })
    }

    async fn get_or_create(&self, token: &str) -> SessionResult<Session> {
        let token_owned = token.to_string();
        let missing_token = token.to_string();

        let session = self
            .run_blocking(move |conn| {
                let now_ms = to_millis(&now_millis());

                // Touch doubles as the existence probe.
                let touched = conn.execute(
                    "UPDATE sessions SET last_activity = MAX(last_activity, ?) WHERE token = ?",
                    params![now_ms, token_owned],
                )?;

                if touched == 0 {
                    let inserted = conn.execute(
                        "INSERT INTO sessions (token, created_at, last_activity, metadata, is_active) \
                         VALUES (?, ?, ?, '{}', 1)",
                        params![token_owned, now_ms, now_ms],
                    );
                    match inserted {
                        Ok(_) => {}
                        // Lost the first-sighting race: another writer owns the
                        // row now, fall through to touching and fetching it.
                        Err(err) if is_unique_violation(&err) => {
                            conn.execute(
                                "UPDATE sessions SET last_activity = MAX(last_activity, ?) WHERE token = ?",
                                params![now_ms, token_owned],
                            )?;
                        }
                        Err(err) => return Err(err),
                    }
                }

                conn.query_row(
                    &format!("SELECT {} FROM sessions WHERE token = ?", SESSION_COLUMNS),
                    params![token_owned],
                    map_row_to_session,
                )
                .optional()
            })
            .await?;

        session.ok_or(SessionError::NotFound(missing_token))
    }

    async fn get_by_token(&self, token: &str) -> SessionResult<Session> {
        let token_owned = token.to_string();
        let missing_token = token.to_string();

        let session = self
            .run_blocking(move |conn| {
                conn.query_row(
                    &format!("SELECT {} FROM sessions WHERE token = ?", SESSION_COLUMNS),
                    params![token_owned],
                    map_row_to_session,
                )
                .optional()
            })
            .await?;

        session.ok_or(SessionError::NotFound(missing_token))
    }

    async fn reset_metadata(&self, session: &Session) -> SessionResult<Session> {
        let session_id = session.id;
        let token = session.token.clone();

        let updated = self
            .run_blocking(move |conn| {
                let now_ms = to_millis(&now_millis());
                let affected = conn.execute(
                    "UPDATE sessions SET metadata = '{}', last_activity = MAX(last_activity, ?) \
                     WHERE id = ?",
                    params![now_ms, session_id],
                )?;
                if affected == 0 {
                    return Ok(None);
                }
                conn.query_row(
                    &format!("SELECT {} FROM sessions WHERE id = ?", SESSION_COLUMNS),
                    params![session_id],
                    map_row_to_session,
                )
                .optional()
            })
            .await?;

        updated.ok_or(SessionError::NotFound(token))
    }

    async fn delete(&self, session: &Session) -> SessionResult<()> {
        let session_id = session.id;
        let token = session.token.clone();

        // Explicit two-step delete inside one transaction; the FK cascade in
        // the schema is only a backstop.
        let affected = self
            .run_blocking(move |conn| {
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM events WHERE session_id = ?", params![session_id])?;
                let affected =
                    tx.execute("DELETE FROM sessions WHERE id = ?", params![session_id])?;
                tx.commit()?;
                Ok(affected)
            })
            .await?;

        if affected == 0 {
            return Err(SessionError::NotFound(token));
        }
        Ok(())
    }

    async fn list_where(&self, filter: SessionFilter) -> SessionResult<Vec<Session>> {
        self.run_blocking(move |conn| {
            let (clause, bind) = filter_clause(&filter);
            let mut stmt =
                conn.prepare(&format!("SELECT {} FROM sessions{}", SESSION_COLUMNS, clause))?;
            let rows = stmt.query_map(params_from_iter(bind), map_row_to_session)?;
            rows.collect::<Result<Vec<_>, _>>()
        })
        .await
    }

    async fn count_where(&self, filter: SessionFilter) -> SessionResult<u64> {
        self.run_blocking(move |conn| {
            let (clause, bind) = filter_clause(&filter);
            conn.query_row(
                &format!("SELECT COUNT(*) FROM sessions{}", clause),
                params_from_iter(bind),
                |row| row.get(0),
            )
        })
        .await
    }

    async fn delete_if_idle(
        &self,
        session_id: i64,
        cutoff: OffsetDateTime,
    ) -> SessionResult<Option<usize>> {
        let cutoff_ms = to_millis(&cutoff);
        self.run_blocking(move |conn| {
            let tx = conn.transaction()?;

            // Freshness re-check: a session touched since the scan survives.
            let still_idle: Option<i64> = tx
                .query_row(
                    "SELECT id FROM sessions WHERE id = ? AND last_activity < ?",
                    params![session_id, cutoff_ms],
                    |row| row.get(0),
                )
                .optional()?;
            if still_idle.is_none() {
                return Ok(None);
            }

            let events =
                tx.execute("DELETE FROM events WHERE session_id = ?", params![session_id])?;
            tx.execute("DELETE FROM sessions WHERE id = ?", params![session_id])?;
            tx.commit()?;
            Ok(Some(events))
        })
        .await
    }

    async fn deactivate_if_idle(
        &self,
        session_id: i64,
        cutoff: OffsetDateTime,
    ) -> SessionResult<bool> {
        let cutoff_ms = to_millis(&cutoff);
        self.run_blocking(move |conn| {
            let affected = conn.execute(
                "UPDATE sessions SET is_active = 0 \
                 WHERE id = ? AND is_active = 1 AND last_activity < ?",
                params![session_id, cutoff_ms],
            )?;
            Ok(affected > 0)
        })
        .await
    }
}

// ── EventLedger ───────────────────────────────────────────────────────────────

#[async_trait]
impl EventLedger for SqliteStorage {
    async fn record_success(
        &self,
        session: &Session,
        descriptor: EventDescriptor,
        record: SuccessRecord,
    ) -> SessionResult<Event> {
        let event = Event {
            id: Uuid::new_v4().to_string(),
            time: now_millis(),
            session_id: session.id,
            model: descriptor.model,
            provider: descriptor.provider,
            endpoint: descriptor.endpoint,
            tokens_prompt: record.tokens_prompt,
            tokens_completion: record.tokens_completion,
            tokens_total: record.tokens_prompt + record.tokens_completion,
            latency_ms: Some(record.latency_ms),
            cost_usd: record.cost_usd,
            messages: Some(record.messages),
            response: Some(record.response),
            status: EventStatus::Success,
            has_error: false,
            error_message: None,
        };
        self.insert_event(event).await
    }

    async fn record_error(
        &self,
        session: &Session,
        descriptor: EventDescriptor,
        error_message: &str,
    ) -> SessionResult<Event> {
        let event = Event {
            id: Uuid::new_v4().to_string(),
            time: now_millis(),
            session_id: session.id,
            model: descriptor.model,
            provider: descriptor.provider,
            endpoint: descriptor.endpoint,
            tokens_prompt: 0,
            tokens_completion: 0,
            tokens_total: 0,
            latency_ms: None,
            cost_usd: 0.0,
            messages: None,
            response: None,
            status: EventStatus::Error,
            has_error: true,
            error_message: Some(error_message.to_string()),
        };
        self.insert_event(event).await
    }

    async fn list_recent(&self, session: &Session, limit: usize) -> SessionResult<Vec<Event>> {
        let session_id = session.id;
        self.run_blocking(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM events WHERE session_id = ? \
                 ORDER BY time DESC, rowid DESC LIMIT ?",
                EVENT_COLUMNS
            ))?;
            let rows = stmt.query_map(params![session_id, limit as i64], map_row_to_event)?;
            rows.collect::<Result<Vec<_>, _>>()
        })
        .await
    }

    async fn aggregate(&self, session: &Session) -> SessionResult<SessionMetrics> {
        let session_id = session.id;
        self.run_blocking(move |conn| {
            let (event_count, total_tokens, total_cost_usd) = conn.query_row(
                "SELECT COUNT(*), COALESCE(SUM(tokens_total), 0), COALESCE(SUM(cost_usd), 0.0) \
                 FROM events WHERE session_id = ?",
                params![session_id],
                |row| Ok((row.get::<_, u64>(0)?, row.get::<_, u64>(1)?, row.get::<_, f64>(2)?)),
            )?;

            let mut stmt = conn.prepare(
                "SELECT DISTINCT model FROM events \
                 WHERE session_id = ? AND model IS NOT NULL ORDER BY model",
            )?;
            let models = stmt.query_map(params![session_id], |row| row.get(0))?;
            let distinct_models = models.collect::<Result<Vec<String>, _>>()?;

            Ok(SessionMetrics {
                event_count,
                total_tokens,
                total_cost_usd,
                distinct_models,
            })
        })
        .await
    }

    async fn delete_all_for_session(&self, session: &Session) -> SessionResult<usize> {
        let session_id = session.id;
        self.run_blocking(move |conn| {
            conn.execute("DELETE FROM events WHERE session_id = ?", params![session_id])
        })
        .await
    }

    async fn count_for_sessions(&self, session_ids: &[i64]) -> SessionResult<u64> {
        if session_ids.is_empty() {
            return Ok(0);
        }
        let ids = session_ids.to_vec();
        self.run_blocking(move |conn| {
            let placeholders = vec!["?"; ids.len()].join(", ");
            conn.query_row(
                &format!("SELECT COUNT(*) FROM events WHERE session_id IN ({})", placeholders),
                params_from_iter(ids),
                |row| row.get(0),
            )
        })
        .await
    }
}

#[cfg(test)]
impl SqliteStorage {
    /// Test support: rewind a session's activity clock.
    pub(crate) async fn set_last_activity(
        &self,
        session_id: i64,
        when: OffsetDateTime,
    ) -> SessionResult<()> {
        let when_ms = to_millis(&when);
        self.run_blocking(move |conn| {
            conn.execute(
                "UPDATE sessions SET last_activity = ? WHERE id = ?",
                params![when_ms, session_id],
            )?;
            Ok(())
        })
        .await
    }

    /// Test support: store an arbitrary metadata document.
    pub(crate) async fn set_metadata(
        &self,
        session_id: i64,
        metadata: &Metadata,
    ) -> SessionResult<()> {
        let metadata_json = serde_json::to_string(metadata)?;
        self.run_blocking(move |conn| {
            conn.execute(
                "UPDATE sessions SET metadata = ? WHERE id = ?",
                params![metadata_json, session_id],
            )?;
            Ok(())
        })
        .await
    }
}

impl SqliteStorage {
    async fn insert_event(&self, event: Event) -> SessionResult<Event> {
        let stored = event.clone();
        let messages_json = match &event.messages {
            Some(value) => Some(serde_json::to_string(value)?),
            None => None,
        };

        self.run_blocking(move |conn| {
            conn.execute(
                "INSERT INTO events (id, time, session_id, model, provider, endpoint, \
                 tokens_prompt, tokens_completion, tokens_total, latency_ms, cost_usd, \
                 messages, response, status, has_error, error_message) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    stored.id,
                    to_millis(&stored.time),
                    stored.session_id,
                    stored.model,
                    stored.provider,
                    stored.endpoint,
                    stored.tokens_prompt,
                    stored.tokens_completion,
                    stored.tokens_total,
                    stored.latency_ms,
                    stored.cost_usd,
                    messages_json,
                    stored.response,
                    stored.status.to_string(),
                    stored.has_error as i64,
                    stored.error_message,
                ],
            )?;
            Ok(())
        })
        .await?;

        Ok(event)
    }
}
