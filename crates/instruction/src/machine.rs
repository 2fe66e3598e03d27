//! Instruction state machine

use crate::protocol::{Prompt, Protocol, Step};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Progress through the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProtocolState {
    /// Last completed step (0 = idle)
    pub current_step: usize,
    /// Consecutive passing verdicts on the step being attempted
    pub consecutive_pass: u32,
    /// Consecutive failing verdicts on the step being attempted
    pub consecutive_fail: u32,
    /// Retry prompts issued for the step being attempted
    pub fail_escalations: u32,
}

impl ProtocolState {
    fn clear_counters(&mut self) {
        self.consecutive_pass = 0;
        self.consecutive_fail = 0;
        self.fail_escalations = 0;
    }
}

/// Event emitted by [`InstructionStateMachine::observe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InstructionEvent {
    /// Step reached; `forced` when it was skipped after repeated failures
    Advanced { step: usize, forced: bool },
    /// Person keeps failing `step`; repeat its instruction
    Retry { step: usize },
}

impl InstructionEvent {
    pub fn step(&self) -> usize {
        match self {
            InstructionEvent::Advanced { step, .. } | InstructionEvent::Retry { step } => *step,
        }
    }

    /// Prompt to announce for this event (retries on steps without a failure prompt stay silent)
    pub fn prompt<'a>(&self, protocol: &'a Protocol) -> Option<&'a Prompt> {
        let step = protocol.step(self.step())?;
        match self {
            InstructionEvent::Advanced { .. } => Some(&step.success_prompt),
            InstructionEvent::Retry { .. } => step.failure_prompt.as_ref(),
        }
    }
}

/// Pass/fail counter machine walking the protocol one step at a time
pub struct InstructionStateMachine {
    protocol: Arc<Protocol>,
    state: ProtocolState,
}

impl InstructionStateMachine {
    pub fn new(protocol: Arc<Protocol>) -> Self {
        Self {
            protocol,
            state: ProtocolState::default(),
        }
    }

    /// Feed the verdict for the step being attempted
    pub fn observe(&mut self, passed: bool) -> Option<InstructionEvent> {
        if self.is_terminal() {
            return None;
        }

        let attempted = self.state.current_step + 1;
        let step = self.protocol.step(attempted)?;

        if passed {
            self.state.consecutive_pass += 1;
            self.state.consecutive_fail = 0;
            if self.state.consecutive_pass >= step.pass_threshold {
                return Some(self.advance(false));
            }
            return None;
        }

        self.state.consecutive_pass = 0;
        // Nobody is being guided yet at the idle step
        if self.state.current_step == 0 {
            return None;
        }

        self.state.consecutive_fail += 1;
        if self.state.consecutive_fail < self.protocol.fail_threshold() {
            return None;
        }

        self.state.consecutive_fail = 0;
        self.state.fail_escalations += 1;
        if self.state.fail_escalations >= self.protocol.fail_escalation_max() {
            warn!(
                step = attempted,
                escalations = self.state.fail_escalations,
                "Step skipped after repeated failures"
            );
            return Some(self.advance(true));
        }

        debug!(
            step = attempted,
            escalations = self.state.fail_escalations,
            "Step retry"
        );
        Some(InstructionEvent::Retry { step: attempted })
    }

    fn advance(&mut self, forced: bool) -> InstructionEvent {
        self.state.current_step += 1;
        self.state.clear_counters();
        let step = self.state.current_step;

        if step == self.protocol.len() {
            info!(step, forced, "Protocol completed");
            if self.protocol.auto_repeat() {
                self.state.current_step = 0;
            }
        } else {
            info!(step, forced, "Step completed");
        }

        InstructionEvent::Advanced { step, forced }
    }

    /// Back to the idle step with cleared counters
    pub fn reset(&mut self) {
        self.state = ProtocolState::default();
    }

    /// Last step reached and not repeating
    pub fn is_terminal(&self) -> bool {
        self.state.current_step >= self.protocol.len()
    }

    /// Step whose predicate is evaluated next (`None` when terminal)
    pub fn active_step(&self) -> Option<&Step> {
        self.protocol.step(self.state.current_step + 1)
    }

    pub fn current_step(&self) -> usize {
        self.state.current_step
    }

    pub fn state(&self) -> ProtocolState {
        self.state
    }

    pub fn protocol(&self) -> &Arc<Protocol> {
        &self.protocol
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ProtocolConfig, StepConfig};
    use attendant::predicate::Predicate;
    use camera_capture::CameraId;
    use proptest::prelude::*;

    fn protocol(
        steps: usize,
        pass_threshold: u32,
        fail_threshold: u32,
        fail_escalation_max: u32,
        auto_repeat: bool,
    ) -> Arc<Protocol> {
        let steps = (1..=steps)
            .map(|i| StepConfig {
                check: Predicate::Presence,
                camera: CameraId::PRIMARY,
                pass_threshold: None,
                success_prompt: format!("step {} done", i),
                failure_prompt: Some(format!("step {} again", i)),
            })
            .collect();
        let config = ProtocolConfig {
            auto_repeat,
            default_pass_threshold: pass_threshold,
            fail_threshold,
            fail_escalation_max,
            steps,
        };
        Arc::new(Protocol::new(config, 1).unwrap())
    }

    fn machine_at(step: usize, protocol: Arc<Protocol>) -> InstructionStateMachine {
        let mut machine = InstructionStateMachine::new(protocol);
        while machine.current_step() < step {
            machine.observe(true);
        }
        machine
    }

    #[test]
    fn test_pass_threshold_needs_consecutive_passes() {
        let mut machine = machine_at(1, protocol(4, 2, 200, 3, false));

        let events: Vec<_> = [true, false, true, true]
            .iter()
            .map(|&v| machine.observe(v))
            .collect();

        assert_eq!(
            events,
            vec![
                None,
                None,
                None,
                Some(InstructionEvent::Advanced { step: 2, forced: false })
            ]
        );
    }

    #[test]
    fn test_idle_failure_resets_pass_without_nagging() {
        let mut machine = InstructionStateMachine::new(protocol(3, 2, 1, 3, false));
        assert_eq!(machine.observe(true), None);
        assert_eq!(machine.observe(false), None);
        assert_eq!(machine.state().consecutive_fail, 0);
        assert_eq!(machine.observe(true), None);
        assert_eq!(machine.current_step(), 0);
    }

    #[test]
    fn test_fail_escalation_forces_advance() {
        let mut machine = machine_at(1, protocol(4, 2, 3, 3, false));

        let events: Vec<_> = (0..9).filter_map(|_| machine.observe(false)).collect();
        assert_eq!(
            events,
            vec![
                InstructionEvent::Retry { step: 2 },
                InstructionEvent::Retry { step: 2 },
                InstructionEvent::Advanced { step: 2, forced: true },
            ]
        );
        assert_eq!(machine.state(), ProtocolState { current_step: 2, ..Default::default() });
    }

    #[test]
    fn test_pass_does_not_clear_escalations() {
        let mut machine = machine_at(1, protocol(4, 5, 2, 2, false));
        machine.observe(false);
        assert_eq!(machine.observe(false), Some(InstructionEvent::Retry { step: 2 }));
        machine.observe(true);
        machine.observe(false);
        assert_eq!(
            machine.observe(false),
            Some(InstructionEvent::Advanced { step: 2, forced: true })
        );
    }

    #[test]
    fn test_terminal_without_repeat() {
        let mut machine = machine_at(0, protocol(2, 1, 200, 3, false));
        assert_eq!(
            machine.observe(true),
            Some(InstructionEvent::Advanced { step: 1, forced: false })
        );
        assert_eq!(
            machine.observe(true),
            Some(InstructionEvent::Advanced { step: 2, forced: false })
        );
        assert!(machine.is_terminal());
        assert!(machine.active_step().is_none());
        assert_eq!(machine.observe(true), None);
        assert_eq!(machine.observe(false), None);
        assert_eq!(machine.current_step(), 2);
    }

    #[test]
    fn test_auto_repeat_wraps_to_idle() {
        let mut machine = InstructionStateMachine::new(protocol(2, 1, 200, 3, true));
        machine.observe(true);
        assert_eq!(
            machine.observe(true),
            Some(InstructionEvent::Advanced { step: 2, forced: false })
        );
        assert!(!machine.is_terminal());
        assert_eq!(machine.current_step(), 0);
        assert_eq!(machine.active_step().map(|s| s.index), Some(1));
    }

    #[test]
    fn test_reset_is_idempotent() {
        let mut machine = machine_at(2, protocol(4, 1, 200, 3, false));
        machine.observe(false);

        machine.reset();
        let once = machine.state();
        machine.reset();
        assert_eq!(machine.state(), once);
        assert_eq!(once, ProtocolState::default());
    }

    #[test]
    fn test_event_prompts() {
        let protocol = Arc::new(Protocol::new(ProtocolConfig::standard(), 1).unwrap());
        let advanced = InstructionEvent::Advanced { step: 1, forced: false };
        assert_eq!(advanced.prompt(&protocol).unwrap().key.to_string(), "1_true");

        let retry = InstructionEvent::Retry { step: 3 };
        let prompt = retry.prompt(&protocol).unwrap();
        assert_eq!(prompt.key.to_string(), "3_false");
        assert_eq!(prompt.text, "Vui lòng nhìn thẳng vào camera");

        assert!(InstructionEvent::Retry { step: 1 }.prompt(&protocol).is_none());
    }

    proptest! {
        #[test]
        fn prop_advances_are_monotonic(
            verdicts in prop::collection::vec(any::<bool>(), 0..400),
            pass_threshold in 1u32..4,
            fail_threshold in 1u32..6,
            escalation_max in 1u32..4,
        ) {
            let mut machine = InstructionStateMachine::new(
                protocol(6, pass_threshold, fail_threshold, escalation_max, false),
            );
            let mut last = 0;
            for verdict in verdicts {
                let before = machine.current_step();
                if let Some(InstructionEvent::Advanced { step, .. }) = machine.observe(verdict) {
                    prop_assert_eq!(step, last + 1);
                    last = step;
                } else {
                    prop_assert_eq!(machine.current_step(), before);
                }
                prop_assert!(machine.current_step() <= 6);
            }
        }

        #[test]
        fn prop_one_counter_moves_per_tick(verdicts in prop::collection::vec(any::<bool>(), 1..200)) {
            let mut machine = machine_at(1, protocol(4, 1000, 1000, 3, false));
            for verdict in verdicts {
                machine.observe(verdict);
                let state = machine.state();
                if verdict {
                    prop_assert_eq!(state.consecutive_fail, 0);
                } else {
                    prop_assert_eq!(state.consecutive_pass, 0);
                }
            }
        }
    }
}
