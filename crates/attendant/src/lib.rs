//! Attendant Verification
//!
//! Frame analysis for the booth instruction protocol:
//! - Presence detection on downscaled frames
//! - Hand placement (keypoint count)
//! - Face orientation and smile checks
//! - Body orientation from shoulder/head landmarks

pub mod analyzer;
pub mod detector;
pub mod predicate;

pub use analyzer::{FrameAnalyzer, PresenceProbe};
pub use detector::{
    DetectorError, Detectors, FaceDetector, FaceGeometry, HandDetector, HandKeypoints,
    NoModelDetector, PoseDetector, PoseLandmarks,
};
pub use predicate::{BodyFacing, Predicate, Reading, ReadingSource, Window};

use thiserror::Error;

/// Attendant verification errors
#[derive(Error, Debug)]
pub enum AttendantError {
    #[error(transparent)]
    Detector(#[from] DetectorError),

    #[error("Invalid {field} reading: {value}")]
    InvalidReading { field: &'static str, value: f32 },

    #[error("Pose landmark {0} missing")]
    LandmarkMissing(usize),

    #[error("{predicate} predicate cannot use a {reading} reading")]
    ReadingMismatch {
        predicate: &'static str,
        reading: ReadingSource,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}
