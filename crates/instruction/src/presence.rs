//! Debounced booth presence

use crate::InstructionError;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Presence debounce configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceConfig {
    /// Consecutive "person seen" ticks before the booth counts as occupied
    #[serde(default = "default_enter_threshold")]
    pub enter_threshold: u32,

    /// Consecutive "nobody seen" ticks before the booth counts as empty
    #[serde(default = "default_exit_threshold")]
    pub exit_threshold: u32,
}

fn default_enter_threshold() -> u32 {
    5
}

fn default_exit_threshold() -> u32 {
    20
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            enter_threshold: default_enter_threshold(),
            exit_threshold: default_exit_threshold(),
        }
    }
}

impl PresenceConfig {
    pub fn validate(&self) -> Result<(), InstructionError> {
        if self.enter_threshold == 0 {
            return Err(InstructionError::Config("enter_threshold must be > 0".into()));
        }
        if self.exit_threshold == 0 {
            return Err(InstructionError::Config("exit_threshold must be > 0".into()));
        }
        Ok(())
    }
}

/// Debounced presence state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    #[default]
    Absent,
    Present,
}

/// Edge reported by [`PresenceGate::update`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceTransition {
    Entered,
    Left,
}

/// Hysteresis filter over raw per-tick presence verdicts
#[derive(Debug, Clone)]
pub struct PresenceGate {
    config: PresenceConfig,
    status: PresenceStatus,
    consecutive_present: u32,
    consecutive_absent: u32,
}

impl PresenceGate {
    pub fn new(config: PresenceConfig) -> Result<Self, InstructionError> {
        config.validate()?;
        Ok(Self {
            config,
            status: PresenceStatus::Absent,
            consecutive_present: 0,
            consecutive_absent: 0,
        })
    }

    /// Feed one raw verdict; returns the edge if the state just changed
    pub fn update(&mut self, person_seen: bool) -> Option<PresenceTransition> {
        match self.status {
            PresenceStatus::Absent => {
                self.consecutive_present = if person_seen { self.consecutive_present + 1 } else { 0 };
                if self.consecutive_present >= self.config.enter_threshold {
                    self.status = PresenceStatus::Present;
                    self.clear_counters();
                    debug!("Booth occupied");
                    return Some(PresenceTransition::Entered);
                }
            }
            PresenceStatus::Present => {
                self.consecutive_absent = if person_seen { 0 } else { self.consecutive_absent + 1 };
                if self.consecutive_absent >= self.config.exit_threshold {
                    self.status = PresenceStatus::Absent;
                    self.clear_counters();
                    debug!("Booth empty");
                    return Some(PresenceTransition::Left);
                }
            }
        }
        None
    }

    pub fn status(&self) -> PresenceStatus {
        self.status
    }

    pub fn is_present(&self) -> bool {
        self.status == PresenceStatus::Present
    }

    /// Back to ABSENT with fresh counters
    pub fn reset(&mut self) {
        self.status = PresenceStatus::Absent;
        self.clear_counters();
    }

    fn clear_counters(&mut self) {
        self.consecutive_present = 0;
        self.consecutive_absent = 0;
    }
}
