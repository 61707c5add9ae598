use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};
use crossterm::{cursor, execute, queue, terminal};
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::camera::CameraState;
use crate::cli::ascii_preview::AsciiRenderer;
use crate::core::{
    ActivityFeed, ActivityStatus, CaptureController, CaptureMode, CaptureRejected, Command,
    ControllerView, MessageKind, Observer, PhaseKind,
};

const RECENT_ACTIVITY: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Plain,
    Accent,
    Good,
    Bad,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub text: String,
    pub tone: Tone,
}

impl Line {
    fn new(text: impl Into<String>, tone: Tone) -> Self {
        Self {
            text: text.into(),
            tone,
        }
    }

    fn plain(text: impl Into<String>) -> Self {
        Self::new(text, Tone::Plain)
    }
}

/// Lays out the controller state as screen lines.
pub fn compose(view: &ControllerView, feed: &ActivityFeed, preview: Option<Vec<String>>, editing: bool) -> Vec<Line> {
    let mut lines = Vec::new();

    let title = match view.mode {
        CaptureMode::Enroll => "Face Recognition - Register a new face",
        CaptureMode::Match => "Face Recognition - Mark your attendance",
    };
    lines.push(Line::new(title, Tone::Accent));
    lines.push(Line::plain(""));

    // Visible in match mode too while it is being typed into
    if view.mode == CaptureMode::Enroll || editing {
        let cursor = if editing { "_" } else { "" };
        lines.push(Line::plain(format!("User ID: {}{}", view.subject_id, cursor)));
    }

    match &view.camera {
        CameraState::Uninitialized => lines.push(Line::plain("Camera: starting...")),
        CameraState::Ready => lines.push(Line::new("Camera: ready", Tone::Good)),
        CameraState::Errored(reason) => {
            lines.push(Line::new(format!("Camera: {}", reason), Tone::Bad));
            lines.push(Line::plain("Press c to try again"));
        }
    }
    lines.push(Line::plain(""));

    match view.phase {
        PhaseKind::Idle => {}
        PhaseKind::Countdown => {
            if let Some(remaining) = view.countdown {
                lines.push(Line::new(format!("        {}", remaining), Tone::Accent));
            }
        }
        PhaseKind::AwaitingConfirmation => {
            for row in preview.unwrap_or_default() {
                lines.push(Line::plain(row));
            }
            let question = match view.mode {
                CaptureMode::Enroll => "Use this image to register your face?",
                CaptureMode::Match => "Use this image to mark your attendance?",
            };
            lines.push(Line::new(question, Tone::Accent));
            lines.push(Line::plain("[y] Confirm   [r] Retake"));
        }
        PhaseKind::Submitting => lines.push(Line::new("Processing...", Tone::Accent)),
    }

    if let Some(message) = &view.message {
        let tone = match message.kind {
            MessageKind::Success => Tone::Good,
            MessageKind::Failure => Tone::Bad,
        };
        lines.push(Line::new(message.text.clone(), tone));
    }
    lines.push(Line::plain(""));

    lines.push(Line::new("Recent Activity", Tone::Accent));
    if feed.is_empty() {
        lines.push(Line::plain("  No recent activity to display"));
    }
    for record in feed.recent(RECENT_ACTIVITY) {
        let (tone, detail) = match record.status {
            ActivityStatus::Success => (Tone::Good, "Successfully marked attendance"),
            ActivityStatus::Failure => (Tone::Bad, "Failed to recognize face"),
        };
        lines.push(Line::new(
            format!(
                "  {:<20} {}  {}",
                record.subject_id,
                record.timestamp.format("%Y-%m-%d %H:%M:%S"),
                detail
            ),
            tone,
        ));
    }
    lines.push(Line::plain(""));

    let capture_hint = if view.can_start_capture { "[space] Capture" } else { "" };
    lines.push(Line::plain(format!(
        "{}   [m] Switch mode   [i] Edit user ID   [q] Quit",
        capture_hint
    )));

    lines
}

/// Capture time stamped onto the confirmation preview.
pub fn preview_caption(view: &ControllerView) -> String {
    view.captured_at
        .map(|at| format!(" {} ", at.format("%H:%M:%S")))
        .unwrap_or_default()
}

/// Full-screen terminal renderer for the interactive session.
pub struct TerminalView {
    renderer: AsciiRenderer,
    last: Option<(ControllerView, usize, bool)>,
    notice: Option<String>,
    editing: Arc<AtomicBool>,
}

impl TerminalView {
    /// `editing` is shared with the key mapper and shows the input cursor.
    pub fn new(editing: Arc<AtomicBool>) -> Self {
        Self {
            renderer: AsciiRenderer::new(None, None),
            last: None,
            notice: None,
            editing,
        }
    }

    fn draw(&self, lines: &[Line]) -> io::Result<()> {
        let mut out = io::stdout();
        queue!(out, terminal::Clear(terminal::ClearType::All), cursor::MoveTo(0, 0))?;
        for line in lines {
            let color = match line.tone {
                Tone::Plain => None,
                Tone::Accent => Some(Color::Cyan),
                Tone::Good => Some(Color::Green),
                Tone::Bad => Some(Color::Red),
            };
            match color {
                Some(color) => queue!(out, SetForegroundColor(color), Print(&line.text), ResetColor)?,
                None => queue!(out, Print(&line.text))?,
            }
            // Raw mode needs an explicit carriage return
            queue!(out, Print("\r\n"))?;
        }
        if let Some(notice) = &self.notice {
            queue!(out, SetForegroundColor(Color::DarkGrey), Print(notice), ResetColor)?;
        }
        out.flush()
    }
}

impl Observer for TerminalView {
    fn render(&mut self, controller: &CaptureController) {
        let view = controller.view();
        let editing = self.editing.load(Ordering::Relaxed);
        let key = (view.clone(), controller.feed().len(), editing);
        if self.last.as_ref() == Some(&key) && self.notice.is_none() {
            return;
        }

        let caption = preview_caption(&view);
        let preview = controller
            .pending_image()
            .map(|image| self.renderer.render_with_caption(&image, &caption));
        let lines = compose(&view, controller.feed(), preview, editing);
        if let Err(e) = self.draw(&lines) {
            tracing::warn!("Failed to draw screen: {}", e);
        }
        self.notice = None;
        self.last = Some(key);
    }

    fn rejected(&mut self, command: &Command, reason: CaptureRejected) {
        tracing::debug!("{:?} rejected: {}", command, reason);
        self.notice = Some(format!("({})", reason));
    }
}

/// Puts the terminal in raw mode for as long as the guard lives.
pub struct RawModeGuard;

impl RawModeGuard {
    pub fn enable() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        execute!(io::stdout(), cursor::Hide)?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = execute!(io::stdout(), cursor::Show);
        let _ = terminal::disable_raw_mode();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ActivityRecord, StatusMessage};
    use chrono::{Local, TimeZone};

    fn view(phase: PhaseKind) -> ControllerView {
        ControllerView {
            camera: CameraState::Ready,
            mode: CaptureMode::Match,
            subject_id: String::new(),
            phase,
            countdown: None,
            captured_at: None,
            message: None,
            can_start_capture: phase == PhaseKind::Idle,
        }
    }

    fn texts(lines: &[Line]) -> Vec<&str> {
        lines.iter().map(|l| l.text.as_str()).collect()
    }

    #[test]
    fn failure_messages_render_as_errors() {
        let mut v = view(PhaseKind::Idle);
        v.message = Some(StatusMessage::failure("Error: service unreachable: refused"));
        let lines = compose(&v, &ActivityFeed::new(), None, false);

        let message = lines.iter().find(|l| l.text.starts_with("Error:")).unwrap();
        assert_eq!(message.tone, Tone::Bad);
        assert!(texts(&lines).contains(&"  No recent activity to display"));
    }

    #[test]
    fn confirmation_shows_preview_and_prompt() {
        let v = view(PhaseKind::AwaitingConfirmation);
        let preview = Some(vec!["@@@@".to_string(), "....".to_string()]);
        let lines = compose(&v, &ActivityFeed::new(), preview, false);
        let texts = texts(&lines);

        assert!(texts.contains(&"@@@@"));
        assert!(texts.contains(&"Use this image to mark your attendance?"));
        assert!(!texts.iter().any(|t| t.starts_with("[space]")));
    }

    #[test]
    fn enroll_mode_shows_subject_field() {
        let mut v = view(PhaseKind::Countdown);
        v.mode = CaptureMode::Enroll;
        v.subject_id = "john.doe".into();
        v.countdown = Some(2);
        let lines = compose(&v, &ActivityFeed::new(), None, true);
        let texts = texts(&lines);

        assert!(texts.contains(&"User ID: john.doe_"));
        assert!(texts.contains(&"        2"));
    }

    #[test]
    fn recent_activity_is_newest_first() {
        let mut feed = ActivityFeed::new();
        feed.append(ActivityRecord::new("john.doe", ActivityStatus::Success));
        feed.append(ActivityRecord::new("unknown", ActivityStatus::Failure));

        let lines = compose(&view(PhaseKind::Idle), &feed, None, false);
        let start = lines.iter().position(|l| l.text == "Recent Activity").unwrap();
        assert!(lines[start + 1].text.contains("unknown"));
        assert_eq!(lines[start + 1].tone, Tone::Bad);
        assert!(lines[start + 2].text.contains("john.doe"));
    }

    #[test]
    fn subject_field_shows_while_editing_in_match_mode() {
        let v = view(PhaseKind::Idle);
        assert!(!texts(&compose(&v, &ActivityFeed::new(), None, false))
            .iter()
            .any(|t| t.starts_with("User ID:")));
        assert!(texts(&compose(&v, &ActivityFeed::new(), None, true)).contains(&"User ID: _"));
    }

    #[test]
    fn preview_caption_shows_capture_time() {
        let mut v = view(PhaseKind::AwaitingConfirmation);
        assert_eq!(preview_caption(&v), "");

        v.captured_at = Some(Local.with_ymd_and_hms(2024, 3, 4, 9, 15, 7).unwrap());
        assert_eq!(preview_caption(&v), " 09:15:07 ");
    }

    #[test]
    fn camera_errors_offer_retry() {
        let mut v = view(PhaseKind::Idle);
        v.camera = CameraState::Errored("Could not access camera".into());
        let lines = compose(&v, &ActivityFeed::new(), None, false);
        assert!(texts(&lines).contains(&"Press c to try again"));
    }
}
