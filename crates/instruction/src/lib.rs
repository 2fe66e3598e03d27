//! Booth Instruction Protocol
//!
//! Turns per-frame verdicts into guidance for the person in the booth:
//! - Debounced presence detection (`presence`)
//! - Ordered step table with prompts and thresholds (`protocol`)
//! - Pass/fail counting with retry prompts and escalation (`machine`)

pub mod machine;
pub mod presence;
pub mod protocol;

pub use machine::{InstructionEvent, InstructionStateMachine, ProtocolState};
pub use presence::{PresenceConfig, PresenceGate, PresenceStatus, PresenceTransition};
pub use protocol::{Prompt, PromptKey, PromptOutcome, Protocol, ProtocolConfig, Step, StepConfig};

use thiserror::Error;

/// Instruction protocol errors
#[derive(Error, Debug)]
pub enum InstructionError {
    #[error("Configuration error: {0}")]
    Config(String),
}
