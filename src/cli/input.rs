use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

use crate::core::Command;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Translates key presses into driver commands.
///
/// Pressing `i` switches into a line-edit mode for the user id, where every
/// keystroke updates the subject immediately; Enter or Esc leave it.
pub struct KeyMapper {
    subject_id: String,
    editing: Arc<AtomicBool>,
}

impl KeyMapper {
    pub fn new(subject_id: impl Into<String>, editing: Arc<AtomicBool>) -> Self {
        Self {
            subject_id: subject_id.into(),
            editing,
        }
    }

    pub fn is_editing(&self) -> bool {
        self.editing.load(Ordering::Relaxed)
    }

    pub fn map(&mut self, key: KeyEvent) -> Option<Command> {
        if key.kind == KeyEventKind::Release {
            return None;
        }
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            return Some(Command::Quit);
        }

        if self.is_editing() {
            return self.edit(key.code);
        }

        match key.code {
            KeyCode::Char(' ') | KeyCode::Enter => Some(Command::StartCapture),
            KeyCode::Char('y') | KeyCode::Char('Y') => Some(Command::Confirm),
            KeyCode::Char('r') | KeyCode::Char('R') | KeyCode::Backspace => Some(Command::Cancel),
            KeyCode::Char('m') | KeyCode::Char('M') => Some(Command::ToggleMode),
            KeyCode::Char('c') | KeyCode::Char('C') => Some(Command::StartCamera),
            KeyCode::Char('i') | KeyCode::Char('I') => {
                self.editing.store(true, Ordering::Relaxed);
                Some(Command::SetSubject(self.subject_id.clone()))
            }
            KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => Some(Command::Quit),
            _ => None,
        }
    }

    fn edit(&mut self, code: KeyCode) -> Option<Command> {
        match code {
            KeyCode::Char(ch) => self.subject_id.push(ch),
            KeyCode::Backspace => {
                self.subject_id.pop()?;
            }
            KeyCode::Enter | KeyCode::Esc => self.editing.store(false, Ordering::Relaxed),
            _ => return None,
        }
        Some(Command::SetSubject(self.subject_id.clone()))
    }
}

/// Background thread forwarding terminal key events as commands.
pub struct KeyReader {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl KeyReader {
    pub fn spawn(mut mapper: KeyMapper, commands: UnboundedSender<Command>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();

        let handle = std::thread::spawn(move || {
            while !flag.load(Ordering::Relaxed) {
                match event::poll(POLL_INTERVAL) {
                    Ok(false) => continue,
                    Ok(true) => {}
                    Err(e) => {
                        tracing::warn!("Keyboard input unavailable: {}", e);
                        let _ = commands.send(Command::Quit);
                        break;
                    }
                }

                let command = match event::read() {
                    Ok(Event::Key(key)) => mapper.map(key),
                    Ok(_) => None,
                    Err(e) => {
                        tracing::warn!("Failed to read key event: {}", e);
                        continue;
                    }
                };

                if let Some(command) = command {
                    let quit = command == Command::Quit;
                    if commands.send(command).is_err() || quit {
                        break;
                    }
                }
            }
        });

        Self {
            stop,
            handle: Some(handle),
        }
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for KeyReader {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn press(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn mapper(subject: &str) -> KeyMapper {
        KeyMapper::new(subject, Arc::new(AtomicBool::new(false)))
    }

    #[test]
    fn maps_workflow_keys() {
        let mut keys = mapper("");
        assert_eq!(keys.map(press(KeyCode::Char(' '))), Some(Command::StartCapture));
        assert_eq!(keys.map(press(KeyCode::Char('y'))), Some(Command::Confirm));
        assert_eq!(keys.map(press(KeyCode::Char('r'))), Some(Command::Cancel));
        assert_eq!(keys.map(press(KeyCode::Char('m'))), Some(Command::ToggleMode));
        assert_eq!(keys.map(press(KeyCode::Char('c'))), Some(Command::StartCamera));
        assert_eq!(keys.map(press(KeyCode::Esc)), Some(Command::Quit));
        assert_eq!(keys.map(press(KeyCode::Char('x'))), None);
    }

    #[test]
    fn ctrl_c_quits_even_while_editing() {
        let mut keys = mapper("");
        keys.map(press(KeyCode::Char('i')));
        let ctrl_c = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert_eq!(keys.map(ctrl_c), Some(Command::Quit));
    }

    #[test]
    fn edit_mode_updates_subject_per_keystroke() {
        let mut keys = mapper("jo");
        assert_eq!(keys.map(press(KeyCode::Char('i'))), Some(Command::SetSubject("jo".into())));
        assert!(keys.is_editing());

        assert_eq!(keys.map(press(KeyCode::Char('e'))), Some(Command::SetSubject("joe".into())));
        // 'q' is text while editing
        assert_eq!(keys.map(press(KeyCode::Char('q'))), Some(Command::SetSubject("joeq".into())));
        assert_eq!(keys.map(press(KeyCode::Backspace)), Some(Command::SetSubject("joe".into())));
        assert_eq!(keys.map(press(KeyCode::Enter)), Some(Command::SetSubject("joe".into())));
        assert!(!keys.is_editing());

        assert_eq!(keys.map(press(KeyCode::Char('q'))), Some(Command::Quit));
    }

    #[test]
    fn backspace_on_empty_subject_is_ignored() {
        let mut keys = mapper("");
        keys.map(press(KeyCode::Char('i')));
        assert_eq!(keys.map(press(KeyCode::Backspace)), None);
    }

    #[test]
    fn key_releases_are_ignored() {
        let mut keys = mapper("");
        let mut release = press(KeyCode::Char(' '));
        release.kind = KeyEventKind::Release;
        assert_eq!(keys.map(release), None);
    }
}
