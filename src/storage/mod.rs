//! SQLite storage layer -- pool, schema, event and anomaly persistence.

pub mod schema;

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::detect::{Anomaly, AnomalyRecord, Severity};
use crate::event::{Event, SignalType};

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

const WRITE_ATTEMPTS: u32 = 3;
const BACKOFF_STEP: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("connection pool: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("payload serialization: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("database path: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage task aborted: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("write failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<StorageError>,
    },
}

/// Open (or create) the SQLite database and return a connection pool.
///
/// synchronous=FULL so an acknowledged append survives power loss; ingestion
/// confirms the write before the detector ever sees the event.
pub fn open_pool(path: &str) -> Result<Pool, StorageError> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = FULL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager)?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

/// Handle to the events and anomalies tables. Cheap to clone.
#[derive(Clone)]
pub struct EventStore {
    pool: Pool,
}

impl EventStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Durably append one event. Idempotent: resubmitting an event_id that
    /// is already stored writes nothing and returns the existing row id.
    pub async fn append_event(&self, event: &Event) -> Result<i64, StorageError> {
        let event = event.clone();
        self.retry_write("append_event", move |pool| insert_event(&pool, &event))
            .await
    }

    /// Durably append one anomaly, returning the assigned row id.
    pub async fn append_anomaly(&self, anomaly: &Anomaly) -> Result<i64, StorageError> {
        let anomaly = anomaly.clone();
        self.retry_write("append_anomaly", move |pool| insert_anomaly(&pool, &anomaly))
            .await
    }

    /// Anomalies for one user, newest first. Stateless query, safe to
    /// re-issue at any time.
    pub async fn anomalies_for_user(
        &self,
        user_id: &str,
        limit: u32,
    ) -> Result<Vec<AnomalyRecord>, StorageError> {
        let pool = self.pool.clone();
        let user_id = user_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<Vec<AnomalyRecord>, StorageError> {
            let conn = pool.get()?;
            let mut stmt = conn.prepare(
                "SELECT id, user_id, signal_type, severity, window_count, threshold,
                        window_start, detected_at, event_id
                 FROM anomalies
                 WHERE user_id = ?1
                 ORDER BY detected_at DESC, id DESC
                 LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![user_id, limit], row_to_anomaly)?;
            let mut records = Vec::new();
            for row in rows {
                records.push(row?);
            }
            Ok(records)
        })
        .await?
    }

    /// Writes get a bounded retry: up to `WRITE_ATTEMPTS` tries with linear
    /// backoff, then the last cause surfaces as `RetriesExhausted`. Inserts
    /// are idempotent, so a retry can never duplicate a record.
    async fn retry_write<T, F>(&self, what: &'static str, run: F) -> Result<T, StorageError>
    where
        F: Fn(Pool) -> Result<T, StorageError> + Clone + Send + 'static,
        T: Send + 'static,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let pool = self.pool.clone();
            let run = run.clone();
            match tokio::task::spawn_blocking(move || run(pool)).await? {
                Ok(value) => return Ok(value),
                Err(e) if attempt < WRITE_ATTEMPTS => {
                    warn!(what, attempt, error = %e, "storage write failed, retrying");
                    tokio::time::sleep(BACKOFF_STEP * attempt).await;
                }
                Err(e) => {
                    return Err(StorageError::RetriesExhausted {
                        attempts: attempt,
                        source: Box::new(e),
                    });
                }
            }
        }
    }
}

fn insert_event(pool: &Pool, event: &Event) -> Result<i64, StorageError> {
    let conn = pool.get()?;
    let payload_json = serde_json::to_string(&event.payload)?;

    let changed = conn.execute(
        "INSERT INTO events (event_id, user_id, agent_id, signal_type, timestamp, received_at, payload_json)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(event_id) DO NOTHING",
        params![
            event.event_id.to_string(),
            event.user_id,
            event.agent_id,
            event.signal_type.as_str(),
            event.timestamp.to_rfc3339(),
            event.received_at.to_rfc3339(),
            payload_json,
        ],
    )?;

    if changed == 1 {
        return Ok(conn.last_insert_rowid());
    }

    // resubmit of an already-stored event: hand back the existing row
    let id = conn.query_row(
        "SELECT id FROM events WHERE event_id = ?1",
        params![event.event_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(id)
}

fn insert_anomaly(pool: &Pool, anomaly: &Anomaly) -> Result<i64, StorageError> {
    let conn = pool.get()?;
    conn.execute(
        "INSERT INTO anomalies (user_id, signal_type, severity, window_count, threshold,
                                window_start, detected_at, event_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            anomaly.user_id,
            anomaly.signal_type.as_str(),
            anomaly.severity.as_str(),
            anomaly.window_count,
            anomaly.threshold,
            anomaly.window_start.to_rfc3339(),
            anomaly.detected_at.to_rfc3339(),
            anomaly.event_id.to_string(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn row_to_anomaly(row: &rusqlite::Row<'_>) -> rusqlite::Result<AnomalyRecord> {
    let signal_raw: String = row.get(2)?;
    let severity_raw: String = row.get(3)?;

    Ok(AnomalyRecord {
        id: row.get(0)?,
        anomaly: Anomaly {
            user_id: row.get(1)?,
            signal_type: SignalType::parse(&signal_raw)
                .ok_or_else(|| bad_column(2, &signal_raw))?,
            severity: Severity::parse(&severity_raw)
                .ok_or_else(|| bad_column(3, &severity_raw))?,
            window_count: row.get(4)?,
            threshold: row.get(5)?,
            window_start: get_timestamp(row, 6)?,
            detected_at: get_timestamp(row, 7)?,
            event_id: {
                let raw: String = row.get(8)?;
                Uuid::parse_str(&raw).map_err(|_| bad_column(8, &raw))?
            },
        },
    })
}

fn get_timestamp(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| bad_column(idx, &raw))
}

fn bad_column(idx: usize, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        format!("unexpected value: {value}").into(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn test_pool() -> (tempfile::TempDir, Pool) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let pool = open_pool(path.to_str().unwrap()).unwrap();
        (dir, pool)
    }

    fn sample_event(event_id: Uuid, at: DateTime<Utc>) -> Event {
        Event {
            event_id,
            user_id: "user-1".to_string(),
            agent_id: "agent-1".to_string(),
            signal_type: SignalType::Hrv,
            timestamp: at,
            received_at: at,
            payload: json!({"bpm_delta": 12}),
        }
    }

    fn sample_anomaly(event_id: Uuid, detected_at: DateTime<Utc>) -> Anomaly {
        Anomaly {
            user_id: "user-1".to_string(),
            signal_type: SignalType::Hrv,
            severity: Severity::Warning,
            window_count: 11,
            threshold: 10,
            window_start: detected_at - chrono::Duration::seconds(4),
            detected_at,
            event_id,
        }
    }

    #[tokio::test]
    async fn append_and_read_back() {
        let (_dir, pool) = test_pool();
        let store = EventStore::new(pool);
        let at = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let event_id = Uuid::new_v4();

        store.append_event(&sample_event(event_id, at)).await.unwrap();
        let row_id = store.append_anomaly(&sample_anomaly(event_id, at)).await.unwrap();
        assert!(row_id > 0);

        let records = store.anomalies_for_user("user-1", 100).await.unwrap();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.id, row_id);
        assert_eq!(record.anomaly.user_id, "user-1");
        assert_eq!(record.anomaly.signal_type, SignalType::Hrv);
        assert_eq!(record.anomaly.severity, Severity::Warning);
        assert_eq!(record.anomaly.window_count, 11);
        assert_eq!(record.anomaly.detected_at, at);
        assert_eq!(record.anomaly.event_id, event_id);
    }

    #[tokio::test]
    async fn append_event_is_idempotent() {
        let (_dir, pool) = test_pool();
        let store = EventStore::new(pool.clone());
        let at = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let event = sample_event(Uuid::new_v4(), at);

        let first = store.append_event(&event).await.unwrap();
        let second = store.append_event(&event).await.unwrap();
        assert_eq!(first, second);

        let conn = pool.get().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn anomalies_come_back_newest_first_and_limited() {
        let (_dir, pool) = test_pool();
        let store = EventStore::new(pool);
        let base = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();

        for i in 0..3 {
            let event_id = Uuid::new_v4();
            let at = base + chrono::Duration::seconds(i);
            store.append_event(&sample_event(event_id, at)).await.unwrap();
            store.append_anomaly(&sample_anomaly(event_id, at)).await.unwrap();
        }

        let records = store.anomalies_for_user("user-1", 100).await.unwrap();
        assert_eq!(records.len(), 3);
        assert!(records[0].anomaly.detected_at > records[1].anomaly.detected_at);
        assert!(records[1].anomaly.detected_at > records[2].anomaly.detected_at);

        let records = store.anomalies_for_user("user-1", 2).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].anomaly.detected_at, base + chrono::Duration::seconds(2));

        let none = store.anomalies_for_user("someone-else", 100).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn write_failure_surfaces_after_bounded_retry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        open_pool(path.to_str().unwrap()).unwrap();

        // second pool on the same file, forced read-only: every write fails
        let manager = SqliteConnectionManager::file(&path)
            .with_init(|c| c.execute_batch("PRAGMA query_only = ON;"));
        let read_only = R2D2Pool::new(manager).unwrap();

        let store = EventStore::new(read_only);
        let at = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let err = store
            .append_event(&sample_event(Uuid::new_v4(), at))
            .await
            .unwrap_err();

        match err {
            StorageError::RetriesExhausted { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("expected RetriesExhausted, got {other:?}"),
        }
    }
}
