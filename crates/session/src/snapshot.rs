//! Read-only view of the orchestrator published after every tick

use chrono::{DateTime, Local};
use instruction::{InstructionEvent, PresenceStatus, Prompt};
use serde::Serialize;
use tokio::sync::watch;
use uuid::Uuid;

/// Receiving side handed to the status server
pub type SnapshotReceiver = watch::Receiver<SessionSnapshot>;

/// Immutable state snapshot
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionSnapshot {
    /// Debounced booth presence
    pub presence: PresenceStatus,
    /// Active session, if any
    pub session_id: Option<Uuid>,
    pub started_at: Option<DateTime<Local>>,
    /// Last completed step (0 = idle)
    pub current_step: usize,
    pub total_steps: usize,
    /// Terminal step reached; waiting for the person to leave
    pub finished: bool,
    pub recording: bool,
    pub last_event: Option<InstructionEvent>,
    pub last_prompt: Option<Prompt>,
    /// Ticks processed since start
    pub ticks: u64,
    pub sessions_started: u64,
    pub updated_at: Option<DateTime<Local>>,
}

pub(crate) fn channel(total_steps: usize) -> (watch::Sender<SessionSnapshot>, SnapshotReceiver) {
    watch::channel(SessionSnapshot {
        total_steps,
        ..Default::default()
    })
}
