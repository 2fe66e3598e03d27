//! Landmark detector collaborators and the geometry they report
//!
//! The detectors themselves (pose landmarker, face geometry model, hand
//! landmarker) live outside this crate. A detection miss is `Ok(None)`;
//! `Err` is reserved for detector faults.

use camera_capture::frame::VideoFrame;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

/// Pose landmark index of the nose (head midpoint)
pub const NOSE: usize = 0;
/// Pose landmark index of the left shoulder
pub const LEFT_SHOULDER: usize = 11;
/// Pose landmark index of the right shoulder
pub const RIGHT_SHOULDER: usize = 12;

/// Keypoints per detected hand
pub const KEYPOINTS_PER_HAND: usize = 21;

/// Detector fault (not a detection miss)
#[derive(Error, Debug)]
#[error("{detector} detector failed: {message}")]
pub struct DetectorError {
    pub detector: &'static str,
    pub message: String,
}

impl DetectorError {
    pub fn new(detector: &'static str, message: impl Into<String>) -> Self {
        Self {
            detector,
            message: message.into(),
        }
    }
}

/// Normalized image point (0..1 on both axes)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point2 {
    pub x: f32,
    pub y: f32,
}

impl Point2 {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Integer pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelPoint {
    pub x: i32,
    pub y: i32,
}

/// Pose landmarks of the most prominent person in a frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoseLandmarks {
    /// Normalized points in the upstream landmark model's index convention
    pub points: Vec<Point2>,
    /// Width of the analysed frame
    pub frame_width: u32,
    /// Height of the analysed frame
    pub frame_height: u32,
}

impl PoseLandmarks {
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Landmark converted to pixel coordinates (truncated like the upstream tooling)
    pub fn pixel(&self, index: usize) -> Option<PixelPoint> {
        let point = self.points.get(index)?;
        Some(PixelPoint {
            x: (point.x * self.frame_width as f32) as i32,
            y: (point.y * self.frame_height as f32) as i32,
        })
    }
}

/// Face geometry reading (units of the face geometry model)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FaceGeometry {
    /// Eye-nose vs nose-mouth vertical ratio
    pub pitch: f32,
    /// Vertical offset between the eyes
    pub roll: f32,
    /// Horizontal nose offset between the eyes
    pub yaw: f32,
    /// Mouth width relative to eye distance
    pub smile_ratio: f32,
}

/// Hand keypoints detected in a frame
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HandKeypoints {
    /// Keypoint count of every detected hand
    pub per_hand: Vec<usize>,
}

impl HandKeypoints {
    /// Total keypoints across all hands
    pub fn total(&self) -> usize {
        self.per_hand.iter().sum()
    }
}

/// Body pose landmark detector
pub trait PoseDetector: Send + Sync {
    fn detect_pose(&self, frame: &VideoFrame) -> Result<Option<PoseLandmarks>, DetectorError>;
}

/// Face geometry detector
pub trait FaceDetector: Send + Sync {
    fn detect_face(&self, frame: &VideoFrame) -> Result<Option<FaceGeometry>, DetectorError>;
}

/// Hand landmark detector
pub trait HandDetector: Send + Sync {
    fn detect_hands(&self, frame: &VideoFrame) -> Result<Option<HandKeypoints>, DetectorError>;
}

/// Shared detector collaborators used by one analyzer
#[derive(Clone)]
pub struct Detectors {
    pub pose: Arc<dyn PoseDetector>,
    pub face: Arc<dyn FaceDetector>,
    pub hands: Arc<dyn HandDetector>,
}

impl Detectors {
    /// Detectors that never report anything (no models installed)
    pub fn unavailable() -> Self {
        warn!("No landmark models configured. Every step check will report a miss.");
        let detector = Arc::new(NoModelDetector);
        Self {
            pose: detector.clone(),
            face: detector.clone(),
            hands: detector,
        }
    }
}

/// Fallback used when no landmark model is installed: every frame is a miss
#[derive(Debug, Clone, Copy, Default)]
pub struct NoModelDetector;

impl PoseDetector for NoModelDetector {
    fn detect_pose(&self, _frame: &VideoFrame) -> Result<Option<PoseLandmarks>, DetectorError> {
        Ok(None)
    }
}

impl FaceDetector for NoModelDetector {
    fn detect_face(&self, _frame: &VideoFrame) -> Result<Option<FaceGeometry>, DetectorError> {
        Ok(None)
    }
}

impl HandDetector for NoModelDetector {
    fn detect_hands(&self, _frame: &VideoFrame) -> Result<Option<HandKeypoints>, DetectorError> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_conversion_truncates() {
        let landmarks = PoseLandmarks {
            points: vec![Point2::new(0.5, 0.25), Point2::new(0.999, 0.999)],
            frame_width: 853,
            frame_height: 480,
        };
        assert_eq!(landmarks.pixel(0), Some(PixelPoint { x: 426, y: 120 }));
        assert_eq!(landmarks.pixel(1), Some(PixelPoint { x: 852, y: 479 }));
        assert_eq!(landmarks.pixel(2), None);
    }

    #[test]
    fn test_hand_total() {
        let hands = HandKeypoints {
            per_hand: vec![KEYPOINTS_PER_HAND, KEYPOINTS_PER_HAND],
        };
        assert_eq!(hands.total(), 42);
        assert_eq!(HandKeypoints::default().total(), 0);
    }

    #[test]
    fn test_no_model_detector_misses() {
        let frame = VideoFrame::blank(2, 2);
        let detectors = Detectors::unavailable();
        assert!(detectors.pose.detect_pose(&frame).unwrap().is_none());
        assert!(detectors.face.detect_face(&frame).unwrap().is_none());
        assert!(detectors.hands.detect_hands(&frame).unwrap().is_none());
    }
}
