//! Video frame types and processing

use crate::CameraId;
use std::sync::Arc;
use std::time::Instant;

/// Decoded RGB video frame
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// RGB pixel data (width * height * 3)
    pub data: Vec<u8>,
    /// Frame width
    pub width: u32,
    /// Frame height
    pub height: u32,
    /// Capture timestamp (nanoseconds since the reader started)
    pub timestamp_ns: u64,
    /// Frame sequence number
    pub sequence: u64,
}

impl VideoFrame {
    /// Create a new video frame from raw RGB data
    pub fn new(data: Vec<u8>, width: u32, height: u32, timestamp_ns: u64, sequence: u64) -> Self {
        Self {
            data,
            width,
            height,
            timestamp_ns,
            sequence,
        }
    }

    /// Black frame of the given size (tests and placeholders)
    pub fn blank(width: u32, height: u32) -> Self {
        Self::new(vec![0; (width * height * 3) as usize], width, height, 0, 0)
    }

    /// Whether the buffer length matches the dimensions
    pub fn is_complete(&self) -> bool {
        self.data.len() == self.width as usize * self.height as usize * 3
    }

    /// Downscale so the longer side is at most `max_side`, keeping the aspect ratio.
    ///
    /// Returns `None` when the frame is already small enough or the buffer is
    /// incomplete; callers then keep using the original frame.
    pub fn downscaled(&self, max_side: u32) -> Option<VideoFrame> {
        let longest = self.width.max(self.height);
        if max_side == 0 || longest <= max_side {
            return None;
        }

        let img = image::ImageBuffer::<image::Rgb<u8>, _>::from_raw(
            self.width,
            self.height,
            self.data.as_slice(),
        )?;

        let scale = max_side as f32 / longest as f32;
        let new_width = ((self.width as f32 * scale).round() as u32).max(1);
        let new_height = ((self.height as f32 * scale).round() as u32).max(1);
        let resized = image::imageops::resize(
            &img,
            new_width,
            new_height,
            image::imageops::FilterType::Triangle,
        );

        Some(VideoFrame {
            data: resized.into_raw(),
            width: new_width,
            height: new_height,
            timestamp_ns: self.timestamp_ns,
            sequence: self.sequence,
        })
    }
}

/// One frame per camera, sampled at the same analysis tick
#[derive(Debug, Clone)]
pub struct FrameBatch {
    /// Batch sequence number (monotonic per sampler)
    pub sequence: u64,
    /// When the batch was assembled
    pub sampled_at: Instant,
    /// Latest frame of each camera, `None` if that camera has no frame yet
    frames: Vec<Option<Arc<VideoFrame>>>,
}

impl FrameBatch {
    pub fn new(sequence: u64, frames: Vec<Option<Arc<VideoFrame>>>) -> Self {
        Self {
            sequence,
            sampled_at: Instant::now(),
            frames,
        }
    }

    /// Frame of a given camera
    pub fn get(&self, camera: CameraId) -> Option<&Arc<VideoFrame>> {
        self.frames.get(camera.index()).and_then(|f| f.as_ref())
    }

    /// Number of camera positions in the batch
    pub fn camera_count(&self) -> usize {
        self.frames.len()
    }

    /// Whether no camera delivered a frame
    pub fn is_empty(&self) -> bool {
        self.frames.iter().all(Option::is_none)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncated_frame_is_incomplete() {
        let mut frame = VideoFrame::blank(2, 2);
        assert!(frame.is_complete());
        frame.data.truncate(9);
        assert!(!frame.is_complete());
    }

    #[test]
    fn test_downscale_keeps_aspect_ratio() {
        let frame = VideoFrame::blank(2560, 1440);
        let small = frame.downscaled(853).unwrap();
        assert_eq!(small.width, 853);
        assert_eq!(small.height, 480);
        assert!(small.is_complete());
    }

    #[test]
    fn test_downscale_skips_small_frames() {
        let frame = VideoFrame::blank(640, 480);
        assert!(frame.downscaled(853).is_none());
        assert!(frame.downscaled(0).is_none());
    }

    #[test]
    fn test_batch_lookup() {
        let batch = FrameBatch::new(
            7,
            vec![Some(Arc::new(VideoFrame::blank(1, 1))), None],
        );
        assert!(batch.get(CameraId(0)).is_some());
        assert!(batch.get(CameraId(1)).is_none());
        assert!(batch.get(CameraId(5)).is_none());
        assert_eq!(batch.camera_count(), 2);
        assert!(!batch.is_empty());
    }
}
