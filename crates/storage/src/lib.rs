//! Storage Layer
//!
//! SQLite persistence of finished booth sessions:
//! - `SessionRepository` over an sqlx pool (one row per session)
//! - `ArchiveWriter` task that takes records off the analysis path

mod repository;
mod writer;

pub use repository::{Outcome, SessionRecord, SessionRepository, StoredSession};
pub use writer::{ArchiveHandle, ArchiveWriter, DEFAULT_ARCHIVE_CAPACITY};

use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Invalid record: {0}")]
    InvalidRecord(String),
    #[error("Archive queue is full")]
    QueueFull,
    #[error("Archive writer has stopped")]
    Closed,
}
