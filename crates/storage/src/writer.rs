//! Background archive writer

use crate::{SessionRecord, SessionRepository, StorageError};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Records that may wait for the writer before submissions are rejected
pub const DEFAULT_ARCHIVE_CAPACITY: usize = 64;

/// Non-blocking submission side of the archive writer
#[derive(Clone)]
pub struct ArchiveHandle {
    tx: mpsc::Sender<SessionRecord>,
}

impl ArchiveHandle {
    /// Queue a record without waiting (callable from any thread)
    pub fn submit(&self, record: SessionRecord) -> Result<(), StorageError> {
        self.tx.try_send(record).map_err(|e| match e {
            mpsc::error::TrySendError::Full(record) => {
                warn!("Archive queue full, dropping session {}", record.session_id);
                StorageError::QueueFull
            }
            mpsc::error::TrySendError::Closed(_) => StorageError::Closed,
        })
    }
}

/// Task that drains submitted records into the repository
pub struct ArchiveWriter;

impl ArchiveWriter {
    /// Start the writer on the current tokio runtime.
    ///
    /// The task ends once every [`ArchiveHandle`] is dropped and the queue is
    /// drained; it yields the number of records written.
    pub fn spawn(
        repository: Arc<SessionRepository>,
        capacity: usize,
    ) -> (ArchiveHandle, JoinHandle<u64>) {
        let (tx, mut rx) = mpsc::channel::<SessionRecord>(capacity.max(1));

        let task = tokio::spawn(async move {
            let mut written = 0u64;
            while let Some(record) = rx.recv().await {
                match repository.insert(&record).await {
                    Ok(id) => {
                        written += 1;
                        info!(
                            id,
                            session = %record.session_id,
                            outcome = %record.outcome,
                            steps = record.steps_completed,
                            "Session archived"
                        );
                    }
                    Err(e) => error!("Failed to archive session {}: {}", record.session_id, e),
                }
            }
            info!("Archive writer stopped after {} records", written);
            written
        });

        (ArchiveHandle { tx }, task)
    }
}
