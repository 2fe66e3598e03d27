//! Drop-Oldest Ring Buffer
//!
//! Bounded hand-off between the frame-batch sampler and the analysis thread.
//! When analysis falls behind, the oldest batches are discarded so the
//! analysis always works on recent frames.

mod buffer;

pub use buffer::{RingBuffer, DEFAULT_CAPACITY};

use thiserror::Error;

/// Ring buffer errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RingBufferError {
    #[error("Ring buffer is closed")]
    Closed,
}
