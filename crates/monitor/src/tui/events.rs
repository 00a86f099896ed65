//! TUI event handling
//!
//! Polls terminal events (keyboard, resize) with crossterm in a background
//! task and maps keys to user actions.

use crossterm::event::{self, Event as CrosstermEvent, KeyCode, KeyEvent, KeyModifiers};
use std::time::Duration;
use tokio::sync::mpsc;

/// Terminal event types
#[derive(Debug, Clone)]
pub enum Event {
    /// Keyboard input event
    Key(KeyEvent),
    /// Terminal resize event
    Resize,
    /// Tick event for periodic UI updates
    Tick,
}

/// User actions derived from keyboard input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Quit the application
    Quit,
    /// Start monitoring
    Start,
    /// Stop monitoring
    Stop,
    /// List connected devices
    DeviceInfo,
    /// Clear the log pane
    Clear,
    /// Scroll the log pane up
    ScrollUp,
    /// Scroll the log pane down
    ScrollDown,
    /// Jump to the newest log line
    ScrollEnd,
    /// Show help dialog
    ShowHelp,
    /// Close dialog/popup
    CloseDialog,
    /// No action
    None,
}

impl From<KeyEvent> for Action {
    fn from(key: KeyEvent) -> Self {
        match key.code {
            KeyCode::Char('q') => Action::Quit,
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => Action::Quit,
            KeyCode::Esc => Action::CloseDialog,

            KeyCode::Char('s') => Action::Start,
            KeyCode::Char('x') => Action::Stop,
            KeyCode::Char('i') => Action::DeviceInfo,
            KeyCode::Char('c') => Action::Clear,

            KeyCode::Up | KeyCode::Char('k') => Action::ScrollUp,
            KeyCode::Down | KeyCode::Char('j') => Action::ScrollDown,
            KeyCode::End | KeyCode::Char('G') => Action::ScrollEnd,

            KeyCode::Char('?') => Action::ShowHelp,

            _ => Action::None,
        }
    }
}

/// Event handler that polls terminal events in a background task
pub struct EventHandler {
    rx: mpsc::UnboundedReceiver<Event>,
}

impl EventHandler {
    /// Create a new event handler
    ///
    /// Spawns a blocking task that polls for terminal events and sends them
    /// through the channel. The task ends once the handler is dropped.
    pub fn new(tick_rate: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::task::spawn_blocking(move || {
            let mut last_tick = std::time::Instant::now();

            loop {
                let timeout = tick_rate
                    .checked_sub(last_tick.elapsed())
                    .unwrap_or(Duration::ZERO);

                if event::poll(timeout).unwrap_or(false) {
                    let sent = match event::read() {
                        Ok(CrosstermEvent::Key(key))
                            if key.kind == event::KeyEventKind::Press =>
                        {
                            tx.send(Event::Key(key))
                        }
                        Ok(CrosstermEvent::Resize(_, _)) => tx.send(Event::Resize),
                        Ok(_) => Ok(()),
                        Err(_) => break,
                    };
                    if sent.is_err() {
                        break;
                    }
                }

                if last_tick.elapsed() >= tick_rate {
                    if tx.send(Event::Tick).is_err() {
                        break;
                    }
                    last_tick = std::time::Instant::now();
                }
            }
        });

        Self { rx }
    }

    /// Receive the next event
    ///
    /// Returns None if the event channel is closed.
    pub async fn next(&mut self) -> Option<Event> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn test_action_from_key_quit() {
        assert_eq!(Action::from(key(KeyCode::Char('q'))), Action::Quit);
        let ctrl_c = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert_eq!(Action::from(ctrl_c), Action::Quit);
    }

    #[test]
    fn test_action_from_key_commands() {
        assert_eq!(Action::from(key(KeyCode::Char('s'))), Action::Start);
        assert_eq!(Action::from(key(KeyCode::Char('x'))), Action::Stop);
        assert_eq!(Action::from(key(KeyCode::Char('i'))), Action::DeviceInfo);
        assert_eq!(Action::from(key(KeyCode::Char('c'))), Action::Clear);
    }

    #[test]
    fn test_action_from_key_scrolling() {
        assert_eq!(Action::from(key(KeyCode::Up)), Action::ScrollUp);
        assert_eq!(Action::from(key(KeyCode::Char('k'))), Action::ScrollUp);
        assert_eq!(Action::from(key(KeyCode::Down)), Action::ScrollDown);
        assert_eq!(Action::from(key(KeyCode::End)), Action::ScrollEnd);
    }

    #[test]
    fn test_unmapped_key() {
        assert_eq!(Action::from(key(KeyCode::Char('z'))), Action::None);
    }
}
