//! Database schema and migrations.

use rusqlite::Connection;

use crate::storage::StorageError;

/// Run all pending migrations.
pub fn migrate(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY,
            event_id TEXT NOT NULL UNIQUE,
            user_id TEXT NOT NULL,
            agent_id TEXT NOT NULL,
            signal_type TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            received_at TEXT NOT NULL,
            payload_json TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS anomalies (
            id INTEGER PRIMARY KEY,
            user_id TEXT NOT NULL,
            signal_type TEXT NOT NULL,
            severity TEXT NOT NULL,
            window_count INTEGER NOT NULL,
            threshold INTEGER NOT NULL,
            window_start TEXT NOT NULL,
            detected_at TEXT NOT NULL,
            event_id TEXT NOT NULL,
            FOREIGN KEY (event_id) REFERENCES events(event_id)
        );

        CREATE INDEX IF NOT EXISTS idx_events_user_received ON events(user_id, received_at);
        CREATE INDEX IF NOT EXISTS idx_events_received ON events(received_at);
        CREATE INDEX IF NOT EXISTS idx_anomalies_user_detected ON anomalies(user_id, detected_at);

        INSERT OR IGNORE INTO schema_version (version) VALUES (1);",
    )?;

    Ok(())
}
