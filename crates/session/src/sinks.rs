//! Output collaborators of the orchestrator
//!
//! All sinks are fire-and-forget: implementations log their own failures and
//! never block the analysis thread.

use instruction::Prompt;
use storage::{ArchiveHandle, SessionRecord};
use tracing::{info, warn};
use uuid::Uuid;

/// Speaks or displays prompts to the person in the booth
pub trait PromptSink: Send + Sync {
    fn announce(&self, prompt: &Prompt);
}

/// Session video recording; redundant calls are no-ops
pub trait RecordingSink: Send + Sync {
    fn start(&self, session_id: Uuid);
    fn stop(&self, session_id: Uuid);
}

/// Persists finished sessions
pub trait SessionArchive: Send + Sync {
    fn archive(&self, record: SessionRecord);
}

/// Prompt sink that writes prompts to the log (audio playback lives outside the kiosk)
#[derive(Debug, Clone, Copy, Default)]
pub struct LogPromptSink;

impl PromptSink for LogPromptSink {
    fn announce(&self, prompt: &Prompt) {
        info!(key = %prompt.key, "{}", prompt.text);
    }
}

impl SessionArchive for ArchiveHandle {
    fn archive(&self, record: SessionRecord) {
        let session_id = record.session_id;
        if let Err(e) = self.submit(record) {
            warn!("Session {} not archived: {}", session_id, e);
        }
    }
}
