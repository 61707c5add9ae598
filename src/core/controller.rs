//! The capture state machine.
//!
//! One attempt moves `Idle -> Countdown -> AwaitingConfirmation -> Submitting
//! -> Idle`. Countdown events arrive on the channel handed to
//! [`CaptureController::new`] and are fed back through
//! [`CaptureController::handle_event`]; a confirmed capture leaves as a
//! [`Submission`] whose outcome comes back through
//! [`CaptureController::finish_submission`].

use chrono::{DateTime, Local};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

use crate::camera::{CameraError, CameraSession, CameraState, Frame};
use crate::common::CaptureConfig;
use crate::core::countdown::Countdown;
use crate::core::feed::{ActivityFeed, ActivityRecord, ActivityStatus};
use crate::service::{SubmissionGateway, SubmissionOutcome};

pub const CAPTURE_FAILED_MESSAGE: &str = "Failed to capture image. Please try again.";
pub const MISSING_SUBJECT_MESSAGE: &str = "Please enter a user ID";
pub const ENROLLED_MESSAGE: &str = "Face registered successfully!";
pub const NO_MATCH_MESSAGE: &str = "No matching face found. Please register first.";
pub const UNKNOWN_SUBJECT: &str = "unknown";
pub const CAMERA_DISCONNECTED_MESSAGE: &str = "Camera disconnected";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    Enroll,
    #[default]
    Match,
}

impl CaptureMode {
    pub fn toggled(self) -> Self {
        match self {
            CaptureMode::Enroll => CaptureMode::Match,
            CaptureMode::Match => CaptureMode::Enroll,
        }
    }
}

impl fmt::Display for CaptureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureMode::Enroll => write!(f, "enroll"),
            CaptureMode::Match => write!(f, "match"),
        }
    }
}

impl FromStr for CaptureMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "enroll" | "register" => Ok(CaptureMode::Enroll),
            "match" | "recognize" => Ok(CaptureMode::Match),
            other => Err(format!("unknown capture mode '{}', expected enroll or match", other)),
        }
    }
}

/// A frozen frame waiting for the user to confirm or retake it.
#[derive(Debug, Clone)]
pub struct PendingFrame {
    frame: Frame,
    mode: CaptureMode,
    captured_at: DateTime<Local>,
}

#[derive(Debug, Clone)]
pub enum CapturePhase {
    Idle,
    Countdown { remaining: u32 },
    AwaitingConfirmation(PendingFrame),
    Submitting {
        mode: CaptureMode,
        subject_id: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseKind {
    Idle,
    Countdown,
    AwaitingConfirmation,
    Submitting,
}

impl CapturePhase {
    pub fn kind(&self) -> PhaseKind {
        match self {
            CapturePhase::Idle => PhaseKind::Idle,
            CapturePhase::Countdown { .. } => PhaseKind::Countdown,
            CapturePhase::AwaitingConfirmation(_) => PhaseKind::AwaitingConfirmation,
            CapturePhase::Submitting { .. } => PhaseKind::Submitting,
        }
    }
}

/// Timer events, stamped with the countdown they belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureEvent {
    Tick { generation: u64, remaining: u32 },
    CountdownFinished { generation: u64 },
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CaptureRejected {
    #[error("camera is not ready")]
    CameraNotReady,
    #[error("a countdown is already running")]
    CountdownRunning,
    #[error("a captured image is waiting for confirmation")]
    ConfirmationPending,
    #[error("a submission is in flight")]
    SubmissionInFlight,
    #[error("no captured image to confirm")]
    NothingToConfirm,
    #[error("nothing to cancel")]
    NothingToCancel,
    #[error("no submission is in flight")]
    NotSubmitting,
    #[error("mode can only change between captures")]
    ModeLocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub text: String,
    pub kind: MessageKind,
}

impl StatusMessage {
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: MessageKind::Success,
        }
    }

    pub fn failure(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: MessageKind::Failure,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.kind == MessageKind::Failure
    }

    pub fn for_outcome(mode: CaptureMode, outcome: &SubmissionOutcome) -> Self {
        match (outcome, mode) {
            (SubmissionOutcome::Success { .. }, CaptureMode::Enroll) => Self::success(ENROLLED_MESSAGE),
            (SubmissionOutcome::Success { subject_id, confidence }, CaptureMode::Match) => {
                Self::success(format!("Welcome {}! ({}% match)", subject_id, confidence))
            }
            (SubmissionOutcome::NoMatch, _) => Self::failure(NO_MATCH_MESSAGE),
            (SubmissionOutcome::Failure(reason), _) => Self::failure(format!("Error: {}", reason)),
        }
    }
}

/// A confirmed capture on its way to the service.
#[derive(Debug, Clone)]
pub struct Submission {
    mode: CaptureMode,
    subject_id: Option<String>,
    frame: Frame,
}

impl Submission {
    pub fn mode(&self) -> CaptureMode {
        self.mode
    }

    pub fn subject_id(&self) -> Option<&str> {
        self.subject_id.as_deref()
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    pub async fn dispatch<G: SubmissionGateway>(self, gateway: &G) -> SubmissionOutcome {
        match (self.mode, self.subject_id.as_deref()) {
            (CaptureMode::Enroll, Some(subject_id)) => {
                SubmissionOutcome::from_enroll(gateway.enroll(&self.frame, subject_id).await)
            }
            (CaptureMode::Enroll, None) => SubmissionOutcome::Failure(MISSING_SUBJECT_MESSAGE.to_string()),
            (CaptureMode::Match, _) => SubmissionOutcome::from_match(gateway.match_face(&self.frame).await),
        }
    }
}

/// Read-only snapshot for whatever renders the controller.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerView {
    pub camera: CameraState,
    pub mode: CaptureMode,
    pub subject_id: String,
    pub phase: PhaseKind,
    pub countdown: Option<u32>,
    /// When the frame awaiting confirmation was taken.
    pub captured_at: Option<DateTime<Local>>,
    pub message: Option<StatusMessage>,
    pub can_start_capture: bool,
}

pub struct CaptureController {
    camera: CameraSession,
    countdown: Countdown,
    countdown_ticks: NonZeroU32,
    generation: u64,
    events: UnboundedSender<CaptureEvent>,
    phase: CapturePhase,
    mode: CaptureMode,
    subject_id: String,
    message: Option<StatusMessage>,
    feed: ActivityFeed,
}

impl CaptureController {
    pub fn new(camera: CameraSession, config: &CaptureConfig, events: UnboundedSender<CaptureEvent>) -> Self {
        Self {
            camera,
            countdown: Countdown::new(config.tick_interval()),
            countdown_ticks: config.countdown_ticks(),
            generation: 0,
            events,
            phase: CapturePhase::Idle,
            mode: config.default_mode,
            subject_id: String::new(),
            message: None,
            feed: ActivityFeed::new(),
        }
    }

    pub fn phase(&self) -> &CapturePhase {
        &self.phase
    }

    pub fn mode(&self) -> CaptureMode {
        self.mode
    }

    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    pub fn camera_state(&self) -> &CameraState {
        self.camera.state()
    }

    pub fn camera_description(&self) -> String {
        self.camera.describe()
    }

    pub fn message(&self) -> Option<&StatusMessage> {
        self.message.as_ref()
    }

    pub fn feed(&self) -> &ActivityFeed {
        &self.feed
    }

    pub fn feed_mut(&mut self) -> &mut ActivityFeed {
        &mut self.feed
    }

    pub fn is_submitting(&self) -> bool {
        matches!(self.phase, CapturePhase::Submitting { .. })
    }

    /// Decoded copy of the frame awaiting confirmation, for previews.
    pub fn pending_image(&self) -> Option<DynamicImage> {
        match &self.phase {
            CapturePhase::AwaitingConfirmation(pending) => pending.frame.decode().ok(),
            _ => None,
        }
    }

    pub fn view(&self) -> ControllerView {
        ControllerView {
            camera: self.camera.state().clone(),
            mode: self.mode,
            subject_id: self.subject_id.clone(),
            phase: self.phase.kind(),
            countdown: match self.phase {
                CapturePhase::Countdown { remaining } => Some(remaining),
                _ => None,
            },
            captured_at: match &self.phase {
                CapturePhase::AwaitingConfirmation(pending) => Some(pending.captured_at),
                _ => None,
            },
            message: self.message.clone(),
            can_start_capture: self.check_can_start().is_ok(),
        }
    }

    /// Acquires the camera, or retries after an error.
    pub fn start_camera(&mut self) -> CameraState {
        self.camera.start().clone()
    }

    /// Fails the camera when its device went away while live. Returns whether
    /// the camera is still ready.
    pub fn check_camera(&mut self) -> bool {
        if self.camera.state().is_ready() && !self.camera.is_available() {
            self.report_camera_error(CAMERA_DISCONNECTED_MESSAGE);
        }
        self.camera.state().is_ready()
    }

    /// A device error reported by the platform, e.g. revoked access.
    pub fn report_camera_error(&mut self, reason: impl Into<String>) {
        self.camera.fail(reason);
        if let CapturePhase::Countdown { .. } = self.phase {
            self.countdown.cancel();
            self.phase = CapturePhase::Idle;
        }
    }

    pub fn set_mode(&mut self, mode: CaptureMode) -> Result<(), CaptureRejected> {
        if mode == self.mode {
            return Ok(());
        }
        if !matches!(self.phase, CapturePhase::Idle) {
            return Err(CaptureRejected::ModeLocked);
        }
        tracing::debug!("Capture mode set to {}", mode);
        self.mode = mode;
        Ok(())
    }

    pub fn set_subject_id(&mut self, subject_id: impl Into<String>) {
        self.subject_id = subject_id.into();
    }

    fn check_can_start(&self) -> Result<(), CaptureRejected> {
        match self.phase {
            CapturePhase::Submitting { .. } => Err(CaptureRejected::SubmissionInFlight),
            CapturePhase::AwaitingConfirmation(_) => Err(CaptureRejected::ConfirmationPending),
            CapturePhase::Countdown { .. } => Err(CaptureRejected::CountdownRunning),
            CapturePhase::Idle if !self.camera.state().is_ready() => Err(CaptureRejected::CameraNotReady),
            CapturePhase::Idle => Ok(()),
        }
    }

    pub fn start_capture(&mut self) -> Result<(), CaptureRejected> {
        self.check_can_start()?;

        self.message = None;
        self.countdown.cancel();
        self.generation += 1;

        let generation = self.generation;
        let tick_events = self.events.clone();
        let done_events = self.events.clone();
        self.countdown.begin(
            self.countdown_ticks,
            move |remaining| {
                let _ = tick_events.send(CaptureEvent::Tick { generation, remaining });
            },
            move || {
                let _ = done_events.send(CaptureEvent::CountdownFinished { generation });
            },
        );

        tracing::info!("Capture countdown started ({} mode)", self.mode);
        self.phase = CapturePhase::Countdown {
            remaining: self.countdown_ticks.get(),
        };
        Ok(())
    }

    pub fn handle_event(&mut self, event: CaptureEvent) {
        match event {
            CaptureEvent::Tick { generation, remaining } if generation == self.generation => {
                if let CapturePhase::Countdown { remaining: shown } = &mut self.phase {
                    tracing::debug!("Countdown {}", remaining);
                    *shown = remaining;
                }
            }
            CaptureEvent::CountdownFinished { generation } if generation == self.generation => {
                if matches!(self.phase, CapturePhase::Countdown { .. }) {
                    self.take_snapshot();
                }
            }
            stale => tracing::debug!("Ignoring stale countdown event {:?}", stale),
        }
    }

    fn take_snapshot(&mut self) {
        match self.camera.snapshot() {
            Ok(frame) => {
                tracing::info!("Captured frame ({} bytes), awaiting confirmation", frame.len());
                self.phase = CapturePhase::AwaitingConfirmation(PendingFrame {
                    frame,
                    mode: self.mode,
                    captured_at: Local::now(),
                });
            }
            Err(e) => {
                if matches!(e, CameraError::DeviceLost(_)) {
                    tracing::warn!("Camera lost during capture: {}", e);
                } else {
                    tracing::warn!("Snapshot failed: {}", e);
                }
                self.phase = CapturePhase::Idle;
                self.message = Some(StatusMessage::failure(CAPTURE_FAILED_MESSAGE));
            }
        }
    }

    /// Discards the pending frame (retake) or stops a running countdown.
    pub fn cancel(&mut self) -> Result<(), CaptureRejected> {
        match self.phase {
            CapturePhase::AwaitingConfirmation(_) => {
                tracing::info!("Capture discarded");
                self.phase = CapturePhase::Idle;
                Ok(())
            }
            CapturePhase::Countdown { .. } => {
                tracing::info!("Countdown cancelled");
                self.countdown.cancel();
                self.phase = CapturePhase::Idle;
                Ok(())
            }
            CapturePhase::Submitting { .. } => Err(CaptureRejected::SubmissionInFlight),
            CapturePhase::Idle => Err(CaptureRejected::NothingToCancel),
        }
    }

    /// Confirms the pending frame.
    ///
    /// Returns the submission to send, or `None` when an enrollment lacks a
    /// subject id (the frame is dropped and the controller is idle again).
    pub fn confirm(&mut self) -> Result<Option<Submission>, CaptureRejected> {
        let pending = match std::mem::replace(&mut self.phase, CapturePhase::Idle) {
            CapturePhase::AwaitingConfirmation(pending) => pending,
            other => {
                let rejection = match other {
                    CapturePhase::Submitting { .. } => CaptureRejected::SubmissionInFlight,
                    _ => CaptureRejected::NothingToConfirm,
                };
                self.phase = other;
                return Err(rejection);
            }
        };

        let subject_id = match pending.mode {
            CaptureMode::Enroll => {
                let subject_id = self.subject_id.trim();
                if subject_id.is_empty() {
                    tracing::info!("Enrollment confirmed without a user id, discarding capture");
                    self.message = Some(StatusMessage::failure(MISSING_SUBJECT_MESSAGE));
                    return Ok(None);
                }
                Some(subject_id.to_string())
            }
            CaptureMode::Match => None,
        };

        tracing::info!("Submitting capture ({} mode)", pending.mode);
        self.message = None;
        self.phase = CapturePhase::Submitting {
            mode: pending.mode,
            subject_id: subject_id.clone(),
        };

        Ok(Some(Submission {
            mode: pending.mode,
            subject_id,
            frame: pending.frame,
        }))
    }

    /// Applies the service's answer to the in-flight submission.
    pub fn finish_submission(&mut self, outcome: SubmissionOutcome) -> Result<&ActivityRecord, CaptureRejected> {
        let (mode, subject_id) = match std::mem::replace(&mut self.phase, CapturePhase::Idle) {
            CapturePhase::Submitting { mode, subject_id } => (mode, subject_id),
            other => {
                self.phase = other;
                return Err(CaptureRejected::NotSubmitting);
            }
        };

        let message = StatusMessage::for_outcome(mode, &outcome);
        if message.is_failure() {
            tracing::warn!("Submission finished: {}", message.text);
        } else {
            tracing::info!("Submission finished: {}", message.text);
        }
        self.message = Some(message);

        let record = match outcome {
            SubmissionOutcome::Success { subject_id, .. } => ActivityRecord::new(subject_id, ActivityStatus::Success),
            SubmissionOutcome::NoMatch | SubmissionOutcome::Failure(_) => ActivityRecord::new(
                subject_id.unwrap_or_else(|| UNKNOWN_SUBJECT.to_string()),
                ActivityStatus::Failure,
            ),
        };
        Ok(self.feed.append(record))
    }

    /// Stops the countdown and releases the camera.
    pub fn shutdown(&mut self) {
        self.countdown.cancel();
        if matches!(self.phase, CapturePhase::Countdown { .. }) {
            self.phase = CapturePhase::Idle;
        }
        self.camera.stop();
    }
}
