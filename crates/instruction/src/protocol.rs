//! Instruction protocol table

use crate::InstructionError;
use attendant::predicate::{BodyFacing, Predicate, Window};
use camera_capture::CameraId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether a prompt confirms a step or asks the person to try again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptOutcome {
    Success,
    Failure,
}

/// Prompt identifier; displays as `"{step}_true"` / `"{step}_false"`
/// (the audio clip names used by the booth speaker)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PromptKey {
    pub step: usize,
    pub outcome: PromptOutcome,
}

impl PromptKey {
    pub fn success(step: usize) -> Self {
        Self {
            step,
            outcome: PromptOutcome::Success,
        }
    }

    pub fn failure(step: usize) -> Self {
        Self {
            step,
            outcome: PromptOutcome::Failure,
        }
    }
}

impl fmt::Display for PromptKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.outcome {
            PromptOutcome::Success => write!(f, "{}_true", self.step),
            PromptOutcome::Failure => write!(f, "{}_false", self.step),
        }
    }
}

impl Serialize for PromptKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Text announced to the person in the booth
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prompt {
    pub key: PromptKey,
    pub text: String,
}

/// One step as written in configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConfig {
    /// Check that completes the step
    pub check: Predicate,

    /// Camera the check runs on
    #[serde(default)]
    pub camera: CameraId,

    /// Consecutive passing ticks needed (protocol default when omitted)
    #[serde(default)]
    pub pass_threshold: Option<u32>,

    /// Announced when the step is reached
    pub success_prompt: String,

    /// Announced when the person keeps failing the step
    #[serde(default)]
    pub failure_prompt: Option<String>,
}

/// Protocol configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Start over at the idle step after the last step instead of waiting for a reset
    #[serde(default)]
    pub auto_repeat: bool,

    /// Consecutive passing ticks needed to complete a step
    #[serde(default = "default_pass_threshold")]
    pub default_pass_threshold: u32,

    /// Consecutive failing ticks before the retry prompt
    #[serde(default = "default_fail_threshold")]
    pub fail_threshold: u32,

    /// Retry prompts before the step is skipped
    #[serde(default = "default_fail_escalation_max")]
    pub fail_escalation_max: u32,

    /// Ordered steps; step 1 is the first entry
    pub steps: Vec<StepConfig>,
}

fn default_pass_threshold() -> u32 {
    2
}

fn default_fail_threshold() -> u32 {
    200
}

fn default_fail_escalation_max() -> u32 {
    3
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self::standard()
    }
}

fn face(yaw: Window, pitch: Window) -> Predicate {
    Predicate::FaceOrientation { yaw, pitch }
}

fn body(facing: BodyFacing, max_px: i32) -> Predicate {
    Predicate::BodyOrientation { facing, max_px }
}

fn step(check: Predicate, success: &str, failure: Option<&str>) -> StepConfig {
    StepConfig {
        check,
        camera: CameraId::PRIMARY,
        pass_threshold: None,
        success_prompt: success.to_string(),
        failure_prompt: failure.map(str::to_string),
    }
}

impl ProtocolConfig {
    /// Eleven-step booth protocol: hands, four head turns, smile, three body turns
    pub fn standard() -> Self {
        let any_yaw = Window::between(-150.0, 150.0);

        Self {
            auto_repeat: false,
            default_pass_threshold: default_pass_threshold(),
            fail_threshold: default_fail_threshold(),
            fail_escalation_max: default_fail_escalation_max(),
            steps: vec![
                step(
                    Predicate::Presence,
                    "Xin chào, vui lòng đặt tay lên giá theo hướng dẫn",
                    None,
                ),
                step(
                    Predicate::HandPlacement { expected_keypoints: 42 },
                    "Tốt, quay về ô vuông, xem video hướng dẫn, nhìn thẳng camera và nhìn lần lượt 4 hướng",
                    Some("Chưa đạt, vui lòng đặt tay lên giá theo hướng dẫn"),
                ),
                step(
                    face(Window::between(-50.0, 50.0), Window::between(0.5, 1.5)),
                    "Tốt, hãy nhìn lên trên như video hướng dẫn",
                    Some("Vui lòng nhìn thẳng vào camera"),
                ),
                step(
                    face(any_yaw, Window::below(0.6)),
                    "Tốt",
                    Some("Hãy nhìn lên trên như video hướng dẫn"),
                ),
                step(
                    face(Window::at_most(-25.0), Window::between(0.3, 1.8)),
                    "Tốt",
                    Some("Hãy nhìn sang phải như video hướng dẫn"),
                ),
                step(
                    face(any_yaw, Window::at_least(1.6)),
                    "Tốt",
                    Some("Hãy nhìn xuống dưới như video hướng dẫn"),
                ),
                step(
                    face(Window::at_least(25.0), Window::between(0.5, 1.5)),
                    "Tốt, hãy nhìn thẳng camera và cười như ảnh hướng dẫn",
                    Some("Hãy nhìn sang trái như video hướng dẫn"),
                ),
                step(
                    Predicate::Smile {
                        yaw: any_yaw,
                        pitch: Window::between(0.3, 1.8),
                        min_smile_ratio: 0.88,
                    },
                    "Tốt, quay phải 90 độ, giữ thẳng người, đầu nhìn thẳng",
                    Some("Vui lòng nhìn thẳng camera và cười như ảnh hướng dẫn"),
                ),
                step(
                    body(BodyFacing::Right, 30),
                    "Tốt, quay phải quay lưng về phía camera, giữ thẳng người, đầu nhìn thẳng",
                    Some("Vui lòng quay phải 90 độ so với camera"),
                ),
                step(
                    body(BodyFacing::Behind, 100),
                    "Tốt, quay phải 90 độ, đầu nhìn thẳng về phía cửa",
                    Some("Chưa đạt, hãy quay lưng về phía camera, đầu nhìn thẳng"),
                ),
                step(
                    body(BodyFacing::Left, 30),
                    "Tốt, đã hoàn thành, xin cảm ơn",
                    Some("Chưa đạt, vui lòng quay người về phía cửa, đầu nhìn thẳng"),
                ),
            ],
        }
    }
}

/// Validated protocol step
#[derive(Debug, Clone)]
pub struct Step {
    /// 1-based position in the protocol
    pub index: usize,
    pub predicate: Predicate,
    pub camera: CameraId,
    pub pass_threshold: u32,
    pub success_prompt: Prompt,
    pub failure_prompt: Option<Prompt>,
}

/// Validated, immutable protocol shared by the state machine and the orchestrator
#[derive(Debug, Clone)]
pub struct Protocol {
    steps: Vec<Step>,
    auto_repeat: bool,
    fail_threshold: u32,
    fail_escalation_max: u32,
}

impl Protocol {
    /// Validate a configuration against the number of installed cameras
    pub fn new(config: ProtocolConfig, camera_count: usize) -> Result<Self, InstructionError> {
        if config.steps.is_empty() {
            return Err(InstructionError::Config("protocol has no steps".into()));
        }
        if config.default_pass_threshold == 0 {
            return Err(InstructionError::Config("default_pass_threshold must be > 0".into()));
        }
        if config.fail_threshold == 0 {
            return Err(InstructionError::Config("fail_threshold must be > 0".into()));
        }
        if config.fail_escalation_max == 0 {
            return Err(InstructionError::Config("fail_escalation_max must be > 0".into()));
        }

        let mut steps = Vec::with_capacity(config.steps.len());
        for (position, step) in config.steps.into_iter().enumerate() {
            let index = position + 1;
            step.check
                .validate()
                .map_err(|e| InstructionError::Config(format!("step {}: {}", index, e)))?;

            if step.camera.index() >= camera_count {
                return Err(InstructionError::Config(format!(
                    "step {} uses {} but only {} camera(s) are configured",
                    index, step.camera, camera_count
                )));
            }

            let pass_threshold = step.pass_threshold.unwrap_or(config.default_pass_threshold);
            if pass_threshold == 0 {
                return Err(InstructionError::Config(format!(
                    "step {}: pass_threshold must be > 0",
                    index
                )));
            }

            steps.push(Step {
                index,
                predicate: step.check,
                camera: step.camera,
                pass_threshold,
                success_prompt: Prompt {
                    key: PromptKey::success(index),
                    text: step.success_prompt,
                },
                failure_prompt: step.failure_prompt.map(|text| Prompt {
                    key: PromptKey::failure(index),
                    text,
                }),
            });
        }

        Ok(Self {
            steps,
            auto_repeat: config.auto_repeat,
            fail_threshold: config.fail_threshold,
            fail_escalation_max: config.fail_escalation_max,
        })
    }

    /// Number of steps (the terminal step index)
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Step by 1-based index
    pub fn step(&self, index: usize) -> Option<&Step> {
        index.checked_sub(1).and_then(|i| self.steps.get(i))
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn auto_repeat(&self) -> bool {
        self.auto_repeat
    }

    pub fn fail_threshold(&self) -> u32 {
        self.fail_threshold
    }

    pub fn fail_escalation_max(&self) -> u32 {
        self.fail_escalation_max
    }
}
