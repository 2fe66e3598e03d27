//! Frame analysis: detector call + predicate

use crate::detector::{Detectors, PoseDetector};
use crate::predicate::{presence, Predicate, Reading, ReadingSource};
use crate::AttendantError;
use camera_capture::frame::VideoFrame;
use std::sync::Arc;
use tracing::trace;

/// Runs the detector a step predicate needs and applies the predicate
#[derive(Clone)]
pub struct FrameAnalyzer {
    detectors: Detectors,
}

impl FrameAnalyzer {
    pub fn new(detectors: Detectors) -> Self {
        Self { detectors }
    }

    /// Verdict for one frame against one step predicate
    pub fn analyze(&self, frame: &VideoFrame, predicate: &Predicate) -> Result<bool, AttendantError> {
        let verdict = match predicate.source() {
            ReadingSource::Pose => {
                let pose = self.detectors.pose.detect_pose(frame)?;
                predicate.evaluate(Reading::Pose(pose.as_ref()))?
            }
            ReadingSource::Face => {
                let face = self.detectors.face.detect_face(frame)?;
                predicate.evaluate(Reading::Face(face.as_ref()))?
            }
            ReadingSource::Hands => {
                let hands = self.detectors.hands.detect_hands(frame)?;
                predicate.evaluate(Reading::Hands(hands.as_ref()))?
            }
        };

        trace!(
            predicate = predicate.name(),
            sequence = frame.sequence,
            verdict,
            "Frame analysed"
        );
        Ok(verdict)
    }
}

/// Cheap person-present check run on every batch
#[derive(Clone)]
pub struct PresenceProbe {
    pose: Arc<dyn PoseDetector>,
    max_side: u32,
}

impl PresenceProbe {
    /// Longest side frames are reduced to before detection
    pub const DEFAULT_MAX_SIDE: u32 = 480;

    pub fn new(pose: Arc<dyn PoseDetector>, max_side: u32) -> Self {
        Self {
            pose,
            max_side: max_side.max(1),
        }
    }

    /// Whether a person is visible in the frame
    pub fn is_present(&self, frame: &VideoFrame) -> Result<bool, AttendantError> {
        let reduced = frame.downscaled(self.max_side);
        let frame = reduced.as_ref().unwrap_or(frame);
        let pose = self.pose.detect_pose(frame)?;
        Ok(presence(pose.as_ref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::{
        DetectorError, FaceDetector, FaceGeometry, HandDetector, HandKeypoints, Point2, PoseLandmarks,
    };
    use crate::predicate::Window;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct StubDetector {
        face: Option<FaceGeometry>,
        hands: Option<HandKeypoints>,
        pose: Option<PoseLandmarks>,
        fail: bool,
        calls: AtomicUsize,
        last_width: Mutex<u32>,
    }

    impl StubDetector {
        fn fault(&self) -> Result<(), DetectorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(DetectorError::new("stub", "model crashed"));
            }
            Ok(())
        }
    }

    impl PoseDetector for StubDetector {
        fn detect_pose(&self, frame: &VideoFrame) -> Result<Option<PoseLandmarks>, DetectorError> {
            self.fault()?;
            *self.last_width.lock().unwrap() = frame.width;
            Ok(self.pose.clone())
        }
    }

    impl FaceDetector for StubDetector {
        fn detect_face(&self, _frame: &VideoFrame) -> Result<Option<FaceGeometry>, DetectorError> {
            self.fault()?;
            Ok(self.face)
        }
    }

    impl HandDetector for StubDetector {
        fn detect_hands(&self, _frame: &VideoFrame) -> Result<Option<HandKeypoints>, DetectorError> {
            self.fault()?;
            Ok(self.hands.clone())
        }
    }

    fn analyzer(stub: Arc<StubDetector>) -> FrameAnalyzer {
        FrameAnalyzer::new(Detectors {
            pose: stub.clone(),
            face: stub.clone(),
            hands: stub,
        })
    }

    fn someone() -> PoseLandmarks {
        PoseLandmarks {
            points: vec![Point2::new(0.5, 0.5)],
            frame_width: 64,
            frame_height: 48,
        }
    }

    #[test]
    fn test_face_predicate_uses_face_detector() {
        let stub = Arc::new(StubDetector {
            face: Some(FaceGeometry {
                pitch: 1.0,
                roll: 0.0,
                yaw: 5.0,
                smile_ratio: 0.5,
            }),
            ..Default::default()
        });
        let predicate = Predicate::FaceOrientation {
            yaw: Window::between(-50.0, 50.0),
            pitch: Window::between(0.5, 1.5),
        };

        let frame = VideoFrame::blank(8, 8);
        assert!(analyzer(stub.clone()).analyze(&frame, &predicate).unwrap());
        assert_eq!(stub.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_hand_predicate_counts_keypoints() {
        let stub = Arc::new(StubDetector {
            hands: Some(HandKeypoints { per_hand: vec![21] }),
            ..Default::default()
        });
        let predicate = Predicate::HandPlacement { expected_keypoints: 42 };
        let frame = VideoFrame::blank(8, 8);
        assert!(!analyzer(stub).analyze(&frame, &predicate).unwrap());
    }

    #[test]
    fn test_detector_fault_propagates() {
        let stub = Arc::new(StubDetector {
            fail: true,
            ..Default::default()
        });
        let frame = VideoFrame::blank(8, 8);
        let result = analyzer(stub).analyze(&frame, &Predicate::Presence);
        assert!(matches!(result, Err(AttendantError::Detector(_))));
    }

    #[test]
    fn test_presence_probe_downscales() {
        let stub = Arc::new(StubDetector {
            pose: Some(someone()),
            ..Default::default()
        });
        let probe = PresenceProbe::new(stub.clone(), 32);
        let frame = VideoFrame::blank(128, 64);

        assert!(probe.is_present(&frame).unwrap());
        assert_eq!(*stub.last_width.lock().unwrap(), 32);
    }

    #[test]
    fn test_presence_probe_empty_booth() {
        let stub = Arc::new(StubDetector::default());
        let probe = PresenceProbe::new(stub, PresenceProbe::DEFAULT_MAX_SIDE);
        assert!(!probe.is_present(&VideoFrame::blank(16, 16)).unwrap());
    }

    #[test]
    fn test_predicate_from_json() {
        let json = r#"{"kind":"body_orientation","facing":"left","max_px":30}"#;
        let predicate: Predicate = serde_json::from_str(json).unwrap();
        assert_eq!(predicate.source(), ReadingSource::Pose);
        assert!(predicate.validate().is_ok());

        let json = r#"{"kind":"face_orientation","yaw":{"max":-25.0},"pitch":{"min":0.3,"max":1.8}}"#;
        let predicate: Predicate = serde_json::from_str(json).unwrap();
        assert_eq!(
            predicate,
            Predicate::FaceOrientation {
                yaw: Window::below(-25.0),
                pitch: Window::between(0.3, 1.8),
            }
        );
    }
}
