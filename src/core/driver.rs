//! Cooperative event loop around the capture controller.
//!
//! Everything runs on the calling task: user commands, countdown events,
//! periodic camera checks and the single in-flight submission are
//! multiplexed with `tokio::select!`.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::MissedTickBehavior;

use crate::core::controller::{
    CaptureController, CaptureEvent, CaptureMode, CaptureRejected, PhaseKind, StatusMessage,
};
use crate::service::{SubmissionGateway, SubmissionOutcome};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    StartCamera,
    StartCapture,
    Confirm,
    Cancel,
    SetMode(CaptureMode),
    ToggleMode,
    SetSubject(String),
    Quit,
}

/// How often a live camera is checked for disconnection.
pub const CAMERA_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Receives the controller after every processed input.
pub trait Observer {
    fn render(&mut self, controller: &CaptureController);

    fn rejected(&mut self, command: &Command, reason: CaptureRejected) {
        tracing::debug!("{:?} rejected: {}", command, reason);
    }
}

type InFlight<'g> = Pin<Box<dyn Future<Output = SubmissionOutcome> + 'g>>;

/// Runs until `Quit` arrives or the command channel closes. A submission that
/// is in flight at that point is allowed to finish first. The camera is
/// released on return.
pub async fn run<'g, G, O>(
    controller: &mut CaptureController,
    gateway: &'g G,
    commands: &mut UnboundedReceiver<Command>,
    events: &mut UnboundedReceiver<CaptureEvent>,
    observer: &mut O,
) where
    G: SubmissionGateway,
    O: Observer,
{
    let mut in_flight: Option<InFlight<'g>> = None;
    let mut quitting = false;
    let mut camera_check = tokio::time::interval(CAMERA_CHECK_INTERVAL);
    camera_check.set_missed_tick_behavior(MissedTickBehavior::Skip);

    observer.render(controller);

    loop {
        tokio::select! {
            outcome = async {
                match in_flight.as_mut() {
                    Some(submission) => submission.await,
                    None => std::future::pending().await,
                }
            }, if in_flight.is_some() => {
                in_flight = None;
                if let Err(reason) = controller.finish_submission(outcome) {
                    tracing::warn!("Dropping submission outcome: {}", reason);
                }
            }
            Some(event) = events.recv() => {
                controller.handle_event(event);
            }
            _ = camera_check.tick() => {
                controller.check_camera();
            }
            command = commands.recv(), if !quitting => {
                match command {
                    None | Some(Command::Quit) => quitting = true,
                    Some(command) => {
                        if let Err(reason) = apply(controller, gateway, &command, &mut in_flight) {
                            observer.rejected(&command, reason);
                        }
                    }
                }
            }
        }

        if quitting && in_flight.is_none() {
            break;
        }
        observer.render(controller);
    }

    controller.shutdown();
    observer.render(controller);
}

fn apply<'g, G: SubmissionGateway>(
    controller: &mut CaptureController,
    gateway: &'g G,
    command: &Command,
    in_flight: &mut Option<InFlight<'g>>,
) -> Result<(), CaptureRejected> {
    match command {
        Command::StartCamera => {
            controller.start_camera();
            Ok(())
        }
        Command::StartCapture => controller.start_capture(),
        Command::Confirm => {
            if let Some(submission) = controller.confirm()? {
                *in_flight = Some(Box::pin(submission.dispatch(gateway)));
            }
            Ok(())
        }
        Command::Cancel => controller.cancel(),
        Command::SetMode(mode) => controller.set_mode(*mode),
        Command::ToggleMode => controller.set_mode(controller.mode().toggled()),
        Command::SetSubject(subject_id) => {
            controller.set_subject_id(subject_id.clone());
            Ok(())
        }
        Command::Quit => Ok(()),
    }
}

/// Runs one unattended attempt: countdown, snapshot, automatic
/// confirmation and submission. Returns the final status message.
pub async fn capture_once<G: SubmissionGateway>(
    controller: &mut CaptureController,
    gateway: &G,
    events: &mut UnboundedReceiver<CaptureEvent>,
) -> Result<StatusMessage, CaptureRejected> {
    controller.start_capture()?;

    while let Some(event) = events.recv().await {
        controller.handle_event(event);
        match controller.phase().kind() {
            PhaseKind::Countdown => continue,
            _ => break,
        }
    }

    if controller.phase().kind() == PhaseKind::AwaitingConfirmation {
        if let Some(submission) = controller.confirm()? {
            let outcome = submission.dispatch(gateway).await;
            controller.finish_submission(outcome)?;
        }
    }

    controller
        .message()
        .cloned()
        .ok_or(CaptureRejected::NothingToConfirm)
}

/// Seeds the activity feed with the service's history for `subject_id`.
/// Failures are logged and leave the feed untouched.
pub async fn load_history<G: SubmissionGateway>(
    controller: &mut CaptureController,
    gateway: &G,
    subject_id: &str,
) -> usize {
    match gateway.list_recent(subject_id).await {
        Ok(entries) => {
            let accepted = controller.feed_mut().extend_history(&entries);
            tracing::info!("Loaded {} attendance records for {}", accepted, subject_id);
            accepted
        }
        Err(e) => {
            tracing::warn!("Could not load attendance history for {}: {}", subject_id, e);
            0
        }
    }
}
