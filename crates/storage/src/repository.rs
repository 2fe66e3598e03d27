//! Repository Implementation

use crate::StorageError;
use chrono::{NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// How a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Last protocol step reached
    Completed,
    /// Person left the booth
    Aborted,
    /// Kiosk shut down mid-session
    Shutdown,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Completed => "completed",
            Outcome::Aborted => "aborted",
            Outcome::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Outcome {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "completed" => Ok(Outcome::Completed),
            "aborted" => Ok(Outcome::Aborted),
            "shutdown" => Ok(Outcome::Shutdown),
            other => Err(StorageError::InvalidRecord(format!("unknown outcome '{}'", other))),
        }
    }
}

/// One finished session (row of the `videos` table)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: Uuid,
    /// Local start date, YYYY-MM-DD
    pub date: String,
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
    /// Session length rounded to whole seconds
    pub duration_seconds: u32,
    pub outcome: Outcome,
    pub steps_completed: u32,
}

impl SessionRecord {
    pub fn new(
        session_id: Uuid,
        started_at: NaiveDateTime,
        duration: Duration,
        outcome: Outcome,
        steps_completed: usize,
    ) -> Self {
        Self {
            session_id,
            date: started_at.format("%Y-%m-%d").to_string(),
            hour: started_at.hour(),
            minute: started_at.minute(),
            second: started_at.second(),
            duration_seconds: duration.as_secs_f64().round() as u32,
            outcome,
            steps_completed: steps_completed as u32,
        }
    }
}

/// Archived session with its row id
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredSession {
    pub id: i64,
    #[serde(flatten)]
    pub record: SessionRecord,
}

impl StoredSession {
    fn from_row(row: &SqliteRow) -> Result<Self, StorageError> {
        let session_id: String = row.try_get("session_id")?;
        let outcome: String = row.try_get("outcome")?;
        Ok(Self {
            id: row.try_get("id")?,
            record: SessionRecord {
                session_id: Uuid::parse_str(&session_id)
                    .map_err(|e| StorageError::InvalidRecord(format!("session_id: {}", e)))?,
                date: row.try_get("date")?,
                hour: row.try_get("hour")?,
                minute: row.try_get("minute")?,
                second: row.try_get("second")?,
                duration_seconds: row.try_get("duration_seconds")?,
                outcome: outcome.parse()?,
                steps_completed: row.try_get("steps_completed")?,
            },
        })
    }
}

const CREATE_VIDEOS: &str = r#"
CREATE TABLE IF NOT EXISTS videos (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    date TEXT NOT NULL,
    hour INTEGER NOT NULL,
    minute INTEGER NOT NULL,
    second INTEGER NOT NULL,
    duration_seconds INTEGER NOT NULL,
    outcome TEXT NOT NULL,
    steps_completed INTEGER NOT NULL
)
"#;

/// Session archive backed by SQLite
#[derive(Clone)]
pub struct SessionRepository {
    pool: SqlitePool,
}

impl SessionRepository {
    /// Open (or create) the database at `url`, e.g. `sqlite://data/kiosk.db`
    pub async fn connect(url: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let repo = Self { pool };
        repo.migrate().await?;
        info!("Session archive opened at {}", url);
        Ok(repo)
    }

    /// Private in-memory database (tests, dry runs)
    pub async fn in_memory() -> Result<Self, StorageError> {
        // Every connection to :memory: is a separate database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        let repo = Self { pool };
        repo.migrate().await?;
        info!("Creating in-memory session archive");
        Ok(repo)
    }

    async fn migrate(&self) -> Result<(), StorageError> {
        sqlx::query(CREATE_VIDEOS).execute(&self.pool).await?;
        Ok(())
    }

    /// Insert a session record, returning its row id
    pub async fn insert(&self, record: &SessionRecord) -> Result<i64, StorageError> {
        let result = sqlx::query(
            "INSERT INTO videos (session_id, date, hour, minute, second, duration_seconds, outcome, steps_completed) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.session_id.to_string())
        .bind(&record.date)
        .bind(record.hour)
        .bind(record.minute)
        .bind(record.second)
        .bind(record.duration_seconds)
        .bind(record.outcome.as_str())
        .bind(record.steps_completed)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        debug!("Inserted session {} with ID {}", record.session_id, id);
        Ok(id)
    }

    /// Most recent sessions first
    pub async fn recent(&self, limit: u32) -> Result<Vec<StoredSession>, StorageError> {
        let rows = sqlx::query("SELECT * FROM videos ORDER BY id DESC LIMIT ?")
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(StoredSession::from_row).collect()
    }

    /// Total archived sessions
    pub async fn count(&self) -> Result<i64, StorageError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM videos")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Delete every session and compact the file
    pub async fn clear(&self) -> Result<u64, StorageError> {
        let deleted = sqlx::query("DELETE FROM videos")
            .execute(&self.pool)
            .await?
            .rows_affected();
        sqlx::query("VACUUM").execute(&self.pool).await?;
        info!("Cleared {} archived sessions", deleted);
        Ok(deleted)
    }

    /// Close the pool, waiting for in-flight queries
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
