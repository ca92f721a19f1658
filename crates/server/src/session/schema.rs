//! Database schema initialization.
//!
//! ID strategy follows a hybrid layout: sessions carry an INTEGER primary
//! key for fast joins plus a unique external `token`; events are identified
//! by `(id, time)` so high-volume time-ordered storage stays cheap to
//! partition. Timestamps are stored as unix-epoch milliseconds so SQL
//! comparisons and ordering are exact.

use rusqlite::Connection;

/// Create all tables and indexes if they do not exist yet.
pub fn init_schema(conn: &mut Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            id INTEGER PRIMARY KEY,
            token TEXT UNIQUE NOT NULL,
            created_at INTEGER NOT NULL,
            last_activity INTEGER NOT NULL,
            metadata TEXT NOT NULL DEFAULT '{}',
            is_active INTEGER NOT NULL DEFAULT 1
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_token ON sessions(token);
        CREATE INDEX IF NOT EXISTS idx_sessions_last_activity ON sessions(last_activity);
        CREATE INDEX IF NOT EXISTS idx_sessions_active ON sessions(is_active) WHERE is_active = 1;

        CREATE TABLE IF NOT EXISTS events (
            id TEXT NOT NULL,
            time INTEGER NOT NULL,
            session_id INTEGER NOT NULL,
            model TEXT,
            provider TEXT,
            endpoint TEXT,
            tokens_prompt INTEGER NOT NULL DEFAULT 0,
            tokens_completion INTEGER NOT NULL DEFAULT 0,
            tokens_total INTEGER NOT NULL DEFAULT 0,
            latency_ms INTEGER,
            cost_usd REAL NOT NULL DEFAULT 0,
            messages TEXT,
            response TEXT,
            status TEXT NOT NULL,
            has_error INTEGER NOT NULL DEFAULT 0,
            error_message TEXT,
            PRIMARY KEY (id, time),
            FOREIGN KEY(session_id) REFERENCES sessions(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_events_session_time ON events(session_id, time);
        CREATE INDEX IF NOT EXISTS idx_events_model ON events(model);
        "#,
    )
}
