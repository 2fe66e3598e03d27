//! Session orchestrator
//!
//! One `tick` per frame batch, always in the same order: presence update,
//! instruction update, prompt dispatch, recording signal, archive, snapshot.
//! The orchestrator is the single owner of presence and protocol state and
//! runs on the analysis thread only.
//!
//! Every camera frame is judged at most once: the sampler may hand over the
//! same frame again when a camera is slower than the analysis rate or its
//! stream stalls, and such a repeat must not count as a new observation.

use crate::sinks::{PromptSink, RecordingSink, SessionArchive};
use crate::snapshot::{self, SessionSnapshot, SnapshotReceiver};
use crate::SessionError;
use attendant::{FrameAnalyzer, PresenceProbe};
use camera_capture::{CameraId, FrameBatch, VideoFrame};
use chrono::{DateTime, Local};
use instruction::{
    InstructionEvent, InstructionStateMachine, PresenceConfig, PresenceGate, PresenceStatus,
    PresenceTransition, Prompt, Protocol,
};
use metrics::{counter, gauge};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use storage::{Outcome, SessionRecord};
use tokio::sync::watch;
use tracing::{debug, info};
use uuid::Uuid;

/// Output collaborators
#[derive(Clone)]
pub struct Sinks {
    pub prompts: Arc<dyn PromptSink>,
    pub recorder: Arc<dyn RecordingSink>,
    pub archive: Arc<dyn SessionArchive>,
}

/// What one tick did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    /// Primary camera had no new frame; nothing changed
    pub skipped: bool,
    pub presence: PresenceStatus,
    pub transition: Option<PresenceTransition>,
    /// Verdict of the active step (`None` when not evaluated)
    pub verdict: Option<bool>,
    pub event: Option<InstructionEvent>,
    /// Session that ended during this tick
    pub ended: Option<Outcome>,
}

struct ActiveSession {
    id: Uuid,
    started_at: DateTime<Local>,
    started: Instant,
    recording: bool,
    finished: bool,
    steps_completed: usize,
}

pub struct SessionOrchestrator {
    protocol: Arc<Protocol>,
    presence: PresenceGate,
    machine: InstructionStateMachine,
    probe: PresenceProbe,
    analyzer: FrameAnalyzer,
    sinks: Sinks,
    snapshot: watch::Sender<SessionSnapshot>,
    session: Option<ActiveSession>,
    last_event: Option<InstructionEvent>,
    last_prompt: Option<Prompt>,
    /// Sequence of the last frame consumed from each camera
    last_seen: HashMap<CameraId, u64>,
    ticks: u64,
    sessions_started: u64,
}

impl SessionOrchestrator {
    pub fn new(
        protocol: Arc<Protocol>,
        presence: PresenceConfig,
        probe: PresenceProbe,
        analyzer: FrameAnalyzer,
        sinks: Sinks,
    ) -> Result<(Self, SnapshotReceiver), SessionError> {
        let (snapshot, receiver) = snapshot::channel(protocol.len());
        let orchestrator = Self {
            machine: InstructionStateMachine::new(protocol.clone()),
            presence: PresenceGate::new(presence)?,
            protocol,
            probe,
            analyzer,
            sinks,
            snapshot,
            session: None,
            last_event: None,
            last_prompt: None,
            last_seen: HashMap::new(),
            ticks: 0,
            sessions_started: 0,
        };
        Ok((orchestrator, receiver))
    }

    /// Process one frame batch
    pub fn tick(&mut self, batch: &FrameBatch) -> Result<TickReport, SessionError> {
        let Some(primary) = self.fresh_frame(batch, CameraId::PRIMARY) else {
            counter!("kiosk_ticks_skipped_total").increment(1);
            debug!(batch = batch.sequence, "No new primary frame, tick skipped");
            return Ok(TickReport {
                skipped: true,
                presence: self.presence.status(),
                ..Default::default()
            });
        };
        self.ticks += 1;

        let person_seen = self.probe.is_present(primary)?;
        let transition = self.presence.update(person_seen);
        let mut report = TickReport {
            presence: self.presence.status(),
            transition,
            ..Default::default()
        };

        if !self.presence.is_present() {
            report.ended = self.end_session(Outcome::Aborted);
            self.machine.reset();
            self.publish();
            return Ok(report);
        }

        if self.session.is_none() {
            self.begin_session();
        }
        if self.session.as_ref().map_or(false, |s| s.finished) {
            self.publish();
            return Ok(report);
        }

        // Instruction update
        if let Some(camera) = self.machine.active_step().map(|step| step.camera) {
            let frame = if camera == CameraId::PRIMARY {
                Some(primary)
            } else {
                self.fresh_frame(batch, camera)
            };
            match (frame, self.machine.active_step()) {
                (Some(frame), Some(step)) => {
                    report.verdict = Some(self.analyzer.analyze(frame, &step.predicate)?);
                }
                _ => debug!(camera = %camera, "No new frame for step camera"),
            }
        }
        report.event = report.verdict.and_then(|passed| self.machine.observe(passed));

        // Prompt dispatch
        if let Some(event) = report.event {
            self.record_event(event);
        }

        // Recording signal; a protocol finished on its first tick still gets a recording
        let terminal = self.machine.is_terminal();
        if let Some(session) = self.session.as_mut() {
            if !session.recording {
                self.sinks.recorder.start(session.id);
                session.recording = true;
            }
            if terminal {
                session.finished = true;
                self.sinks.recorder.stop(session.id);
                session.recording = false;
            }
        }

        // Archive
        if terminal {
            if let Some(session) = self.session.as_ref() {
                self.archive(session, Outcome::Completed);
                report.ended = Some(Outcome::Completed);
            }
        }

        self.publish();
        Ok(report)
    }

    /// End an active session (kiosk stopping)
    pub fn shutdown(&mut self) -> Option<Outcome> {
        let ended = self.end_session(Outcome::Shutdown);
        self.machine.reset();
        self.publish();
        ended
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Frame of `camera` unless an earlier tick already consumed it
    fn fresh_frame<'b>(
        &mut self,
        batch: &'b FrameBatch,
        camera: CameraId,
    ) -> Option<&'b Arc<VideoFrame>> {
        let frame = batch.get(camera)?;
        if self.last_seen.insert(camera, frame.sequence) == Some(frame.sequence) {
            return None;
        }
        Some(frame)
    }

    fn begin_session(&mut self) {
        let session = ActiveSession {
            id: Uuid::new_v4(),
            started_at: Local::now(),
            started: Instant::now(),
            recording: false,
            finished: false,
            steps_completed: 0,
        };
        self.machine.reset();
        self.last_event = None;
        self.last_prompt = None;
        self.sessions_started += 1;
        counter!("kiosk_sessions_started_total").increment(1);
        info!(session = %session.id, "Session started");
        self.session = Some(session);
    }

    fn record_event(&mut self, event: InstructionEvent) {
        match event {
            InstructionEvent::Advanced { step, forced } => {
                counter!("kiosk_steps_advanced_total", "forced" => if forced { "true" } else { "false" })
                    .increment(1);
                if let Some(session) = self.session.as_mut() {
                    session.steps_completed = session.steps_completed.max(step);
                }
            }
            InstructionEvent::Retry { .. } => {
                counter!("kiosk_step_retries_total").increment(1);
            }
        }

        if let Some(prompt) = event.prompt(&self.protocol) {
            self.sinks.prompts.announce(prompt);
            self.last_prompt = Some(prompt.clone());
        }
        self.last_event = Some(event);
    }

    /// Stop recording and archive; `None` when nothing was left to archive
    fn end_session(&mut self, outcome: Outcome) -> Option<Outcome> {
        let session = self.session.take()?;
        if session.recording {
            self.sinks.recorder.stop(session.id);
        }
        // Completed sessions were archived when the last step was reached
        if session.finished {
            info!(session = %session.id, "Booth empty after completed session");
            return None;
        }
        self.archive(&session, outcome);
        Some(outcome)
    }

    fn archive(&self, session: &ActiveSession, outcome: Outcome) {
        let duration = session.started.elapsed();
        counter!("kiosk_sessions_ended_total", "outcome" => outcome.as_str()).increment(1);
        info!(
            session = %session.id,
            %outcome,
            steps = session.steps_completed,
            duration_secs = duration.as_secs(),
            "Session ended"
        );
        self.sinks.archive.archive(SessionRecord::new(
            session.id,
            session.started_at.naive_local(),
            duration,
            outcome,
            session.steps_completed,
        ));
    }

    fn publish(&self) {
        let session = self.session.as_ref();
        gauge!("kiosk_booth_occupied").set(if self.presence.is_present() { 1.0 } else { 0.0 });
        gauge!("kiosk_current_step").set(self.machine.current_step() as f64);

        self.snapshot.send_replace(SessionSnapshot {
            presence: self.presence.status(),
            session_id: session.map(|s| s.id),
            started_at: session.map(|s| s.started_at),
            current_step: self.machine.current_step(),
            total_steps: self.protocol.len(),
            finished: session.map_or(false, |s| s.finished),
            recording: session.map_or(false, |s| s.recording),
            last_event: self.last_event,
            last_prompt: self.last_prompt.clone(),
            ticks: self.ticks,
            sessions_started: self.sessions_started,
            updated_at: Some(Local::now()),
        });
    }
}
