//! Geometric step predicates
//!
//! Pure functions from one geometry reading to a "step satisfied" verdict.
//! Thresholds are configuration data so the same predicate serves every
//! protocol variant. A missing detection is `false`; malformed readings are
//! errors.

use crate::detector::{
    FaceGeometry, HandKeypoints, PixelPoint, PoseLandmarks, LEFT_SHOULDER, NOSE, RIGHT_SHOULDER,
};
use crate::AttendantError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Value window `[min, max)`, or `[min, max]` with `max_inclusive`; an omitted bound is unbounded
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Window {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f32>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub max_inclusive: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl Window {
    pub const fn between(min: f32, max: f32) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
            max_inclusive: false,
        }
    }

    pub const fn at_least(min: f32) -> Self {
        Self {
            min: Some(min),
            max: None,
            max_inclusive: false,
        }
    }

    pub const fn below(max: f32) -> Self {
        Self {
            min: None,
            max: Some(max),
            max_inclusive: false,
        }
    }

    pub const fn at_most(max: f32) -> Self {
        Self {
            min: None,
            max: Some(max),
            max_inclusive: true,
        }
    }

    pub fn contains(&self, value: f32) -> bool {
        let under_max = |max: f32| {
            if self.max_inclusive {
                value <= max
            } else {
                value < max
            }
        };
        self.min.map_or(true, |min| value >= min) && self.max.map_or(true, under_max)
    }

    fn validate(&self, name: &str) -> Result<(), AttendantError> {
        for bound in [self.min, self.max].into_iter().flatten() {
            if !bound.is_finite() {
                return Err(AttendantError::Config(format!("{} bound {} is not finite", name, bound)));
            }
        }
        if let (Some(min), Some(max)) = (self.min, self.max) {
            if min >= max {
                return Err(AttendantError::Config(format!(
                    "{} window is empty: min {} >= max {}",
                    name, min, max
                )));
            }
        }
        Ok(())
    }
}

/// Body orientation relative to the camera
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyFacing {
    Forward,
    Behind,
    Left,
    Right,
}

/// Which detector a predicate needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadingSource {
    Pose,
    Face,
    Hands,
}

impl fmt::Display for ReadingSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadingSource::Pose => write!(f, "pose"),
            ReadingSource::Face => write!(f, "face"),
            ReadingSource::Hands => write!(f, "hands"),
        }
    }
}

/// One detector reading for one frame
#[derive(Debug, Clone, Copy)]
pub enum Reading<'a> {
    Pose(Option<&'a PoseLandmarks>),
    Face(Option<&'a FaceGeometry>),
    Hands(Option<&'a HandKeypoints>),
}

impl Reading<'_> {
    pub fn source(&self) -> ReadingSource {
        match self {
            Reading::Pose(_) => ReadingSource::Pose,
            Reading::Face(_) => ReadingSource::Face,
            Reading::Hands(_) => ReadingSource::Hands,
        }
    }
}

/// Step predicate, resolved once when the protocol table is built
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Predicate {
    /// Somebody is in the booth
    Presence,
    /// Both hands on the rest
    HandPlacement {
        #[serde(default = "default_expected_keypoints")]
        expected_keypoints: usize,
    },
    /// Face turned into the yaw/pitch window
    FaceOrientation { yaw: Window, pitch: Window },
    /// Face inside the window and smiling
    Smile {
        yaw: Window,
        pitch: Window,
        min_smile_ratio: f32,
    },
    /// Body turned relative to the camera
    BodyOrientation { facing: BodyFacing, max_px: i32 },
}

fn default_expected_keypoints() -> usize {
    crate::detector::KEYPOINTS_PER_HAND * 2
}

impl Predicate {
    /// Detector this predicate consumes
    pub fn source(&self) -> ReadingSource {
        match self {
            Predicate::Presence | Predicate::BodyOrientation { .. } => ReadingSource::Pose,
            Predicate::FaceOrientation { .. } | Predicate::Smile { .. } => ReadingSource::Face,
            Predicate::HandPlacement { .. } => ReadingSource::Hands,
        }
    }

    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Predicate::Presence => "presence",
            Predicate::HandPlacement { .. } => "hand_placement",
            Predicate::FaceOrientation { .. } => "face_orientation",
            Predicate::Smile { .. } => "smile",
            Predicate::BodyOrientation { .. } => "body_orientation",
        }
    }

    /// Reject threshold sets that can never (or always) match
    pub fn validate(&self) -> Result<(), AttendantError> {
        match self {
            Predicate::Presence => Ok(()),
            Predicate::HandPlacement { expected_keypoints } => {
                if *expected_keypoints == 0 {
                    return Err(AttendantError::Config("expected_keypoints must be > 0".into()));
                }
                Ok(())
            }
            Predicate::FaceOrientation { yaw, pitch } => {
                yaw.validate("yaw")?;
                pitch.validate("pitch")
            }
            Predicate::Smile {
                yaw,
                pitch,
                min_smile_ratio,
            } => {
                yaw.validate("yaw")?;
                pitch.validate("pitch")?;
                if !min_smile_ratio.is_finite() {
                    return Err(AttendantError::Config("min_smile_ratio is not finite".into()));
                }
                Ok(())
            }
            Predicate::BodyOrientation { max_px, .. } => {
                if *max_px <= 0 {
                    return Err(AttendantError::Config(format!("max_px must be > 0, got {}", max_px)));
                }
                Ok(())
            }
        }
    }

    /// Apply the predicate to a reading from its detector
    pub fn evaluate(&self, reading: Reading<'_>) -> Result<bool, AttendantError> {
        match (self, reading) {
            (Predicate::Presence, Reading::Pose(pose)) => Ok(presence(pose)),
            (Predicate::HandPlacement { expected_keypoints }, Reading::Hands(hands)) => {
                Ok(hands_placed(hands, *expected_keypoints))
            }
            (Predicate::FaceOrientation { yaw, pitch }, Reading::Face(face)) => {
                face_oriented(face, yaw, pitch)
            }
            (
                Predicate::Smile {
                    yaw,
                    pitch,
                    min_smile_ratio,
                },
                Reading::Face(face),
            ) => smiling(face, yaw, pitch, *min_smile_ratio),
            (Predicate::BodyOrientation { facing, max_px }, Reading::Pose(pose)) => {
                body_oriented(pose, *facing, *max_px)
            }
            (predicate, reading) => Err(AttendantError::ReadingMismatch {
                predicate: predicate.name(),
                reading: reading.source(),
            }),
        }
    }
}

/// Landmark set non-empty
pub fn presence(pose: Option<&PoseLandmarks>) -> bool {
    pose.map_or(false, |p| !p.is_empty())
}

/// Exactly the expected number of hand keypoints
pub fn hands_placed(hands: Option<&HandKeypoints>, expected_keypoints: usize) -> bool {
    hands.map_or(false, |h| h.total() == expected_keypoints)
}

fn finite(field: &'static str, value: f32) -> Result<f32, AttendantError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(AttendantError::InvalidReading { field, value })
    }
}

/// Yaw and pitch inside their windows
pub fn face_oriented(
    face: Option<&FaceGeometry>,
    yaw: &Window,
    pitch: &Window,
) -> Result<bool, AttendantError> {
    let Some(face) = face else {
        return Ok(false);
    };
    let face_yaw = finite("yaw", face.yaw)?;
    let face_pitch = finite("pitch", face.pitch)?;
    Ok(yaw.contains(face_yaw) && pitch.contains(face_pitch))
}

/// Orientation window satisfied and smile ratio above threshold
pub fn smiling(
    face: Option<&FaceGeometry>,
    yaw: &Window,
    pitch: &Window,
    min_smile_ratio: f32,
) -> Result<bool, AttendantError> {
    if !face_oriented(face, yaw, pitch)? {
        return Ok(false);
    }
    let Some(face) = face else {
        return Ok(false);
    };
    Ok(finite("smile_ratio", face.smile_ratio)? > min_smile_ratio)
}

/// Shoulder/head geometry test in pixel space
pub fn body_facing(
    left_shoulder: PixelPoint,
    right_shoulder: PixelPoint,
    head: PixelPoint,
    facing: BodyFacing,
    max_px: i32,
) -> bool {
    let shoulder_span = (left_shoulder.x - right_shoulder.x).abs();
    let shoulder_mid_x = (left_shoulder.x + right_shoulder.x) as f32 / 2.0;
    let head_offset = (head.x as f32 - shoulder_mid_x).abs();

    match facing {
        // Facing the camera the left shoulder shows on the image's right side
        BodyFacing::Forward => left_shoulder.x > right_shoulder.x && head_offset < max_px as f32,
        BodyFacing::Behind => left_shoulder.x < right_shoulder.x && head_offset < max_px as f32,
        BodyFacing::Left => shoulder_span < max_px && head.x > left_shoulder.x,
        BodyFacing::Right => shoulder_span < max_px && head.x < left_shoulder.x,
    }
}

/// Body orientation from pose landmarks
pub fn body_oriented(
    pose: Option<&PoseLandmarks>,
    facing: BodyFacing,
    max_px: i32,
) -> Result<bool, AttendantError> {
    let Some(pose) = pose.filter(|p| !p.is_empty()) else {
        return Ok(false);
    };

    let point = |index: usize| -> Result<PixelPoint, AttendantError> {
        let pixel = pose.pixel(index).ok_or(AttendantError::LandmarkMissing(index))?;
        let raw = pose.points[index];
        finite("landmark x", raw.x)?;
        finite("landmark y", raw.y)?;
        Ok(pixel)
    };

    Ok(body_facing(
        point(LEFT_SHOULDER)?,
        point(RIGHT_SHOULDER)?,
        point(NOSE)?,
        facing,
        max_px,
    ))
}
