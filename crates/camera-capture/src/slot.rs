//! Latest-frame slot
//!
//! Readers overwrite the slot on every decoded frame; consumers always see the
//! most recent complete frame or nothing. A reader never waits for a consumer.

use crate::frame::VideoFrame;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Frame source collaborator as seen by the analysis side
pub trait FrameSource: Send + Sync {
    /// Most recent frame, or `None` when no frame is available yet
    fn poll(&self) -> Option<Arc<VideoFrame>>;
}

/// Single-frame mailbox shared between a camera reader and the sampler
#[derive(Debug, Default)]
pub struct LatestFrame {
    frame: Mutex<Option<Arc<VideoFrame>>>,
    /// Frames published since creation
    published: AtomicU64,
}

impl LatestFrame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current frame
    pub fn publish(&self, frame: VideoFrame) {
        let frame = Arc::new(frame);
        // A poisoned lock only means a reader panicked mid-swap; the slot itself is still valid
        let mut slot = self.frame.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(frame);
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    /// Forget the current frame (source disconnected)
    pub fn clear(&self) {
        let mut slot = self.frame.lock().unwrap_or_else(|e| e.into_inner());
        *slot = None;
    }

    /// Total frames published
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

impl FrameSource for LatestFrame {
    fn poll(&self) -> Option<Arc<VideoFrame>> {
        self.frame
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_slot_polls_none() {
        let slot = LatestFrame::new();
        assert!(slot.poll().is_none());
        assert_eq!(slot.published(), 0);
    }

    #[test]
    fn test_publish_overwrites() {
        let slot = LatestFrame::new();
        slot.publish(VideoFrame::new(vec![0; 3], 1, 1, 10, 1));
        slot.publish(VideoFrame::new(vec![0; 3], 1, 1, 20, 2));

        let frame = slot.poll().unwrap();
        assert_eq!(frame.sequence, 2);
        assert_eq!(slot.published(), 2);
        // Polling does not consume
        assert!(slot.poll().is_some());
    }

    #[test]
    fn test_clear_hides_stale_frame() {
        let slot = LatestFrame::new();
        slot.publish(VideoFrame::blank(1, 1));
        slot.clear();
        assert!(slot.poll().is_none());
    }
}
