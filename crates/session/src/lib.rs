//! Booth Session Orchestration
//!
//! Per-tick coordination of presence, instruction progress, prompts,
//! recording and archiving, plus the sampler/analysis pipeline that feeds it.

pub mod orchestrator;
pub mod pipeline;
pub mod sinks;
pub mod snapshot;

pub use orchestrator::{SessionOrchestrator, Sinks, TickReport};
pub use pipeline::{spawn_analysis, spawn_sampler};
pub use sinks::{LogPromptSink, PromptSink, RecordingSink, SessionArchive};
pub use snapshot::{SessionSnapshot, SnapshotReceiver};

use thiserror::Error;

/// Session errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Frame analysis failed: {0}")]
    Attendant(#[from] attendant::AttendantError),

    #[error(transparent)]
    Instruction(#[from] instruction::InstructionError),
}
