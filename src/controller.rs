use std::sync::mpsc::{Receiver, TryRecvError};
use std::time::Duration;
use tracing::{trace, warn};

use crate::api::ApiEvent;
use crate::domain::{Message, RVConfig, RVError};
use ratatui::crossterm::event::{self, Event, KeyCode, KeyModifiers};

pub struct Controller {
    event_poll_time: u64,
    backend_events: Receiver<ApiEvent>,
}

impl Controller {
    pub fn new(cfg: &RVConfig, backend_events: Receiver<ApiEvent>) -> Self {
        Self {
            event_poll_time: cfg.event_poll_time,
            backend_events,
        }
    }

    /// Returns the next message. Finished backend requests are handed out first,
    /// otherwise the terminal is polled for up to `event_poll_time` ms.
    pub fn handle_event(&self, raw_keys: bool) -> Result<Option<Message>, RVError> {
        if let Some(message) = self.next_backend_event() {
            return Ok(Some(message));
        }

        if event::poll(Duration::from_millis(self.event_poll_time))? {
            match event::read()? {
                Event::Key(key) if key.kind == event::KeyEventKind::Press => {
                    if raw_keys {
                        return Ok(Some(Message::RawKey(key)));
                    }
                    return Ok(self.handle_key(key));
                }
                Event::Resize(width, height) => {
                    return Ok(Some(Message::Resize(width as usize, height as usize)));
                }
                _ => (),
            }
        }
        Ok(None)
    }

    fn next_backend_event(&self) -> Option<Message> {
        match self.backend_events.try_recv() {
            Ok(event) => Some(Message::Backend(event)),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                warn!("Backend channel disconnected");
                None
            }
        }
    }

    fn handle_key(&self, key: event::KeyEvent) -> Option<Message> {
        if key.modifiers.contains(KeyModifiers::CONTROL) {
            return match key.code {
                KeyCode::Char('c') => Some(Message::Quit),
                _ => None,
            };
        }
        let message = match key.code {
            KeyCode::Char('q') => Some(Message::Quit),
            KeyCode::Char('?') => Some(Message::Help),
            KeyCode::Up | KeyCode::Char('k') => Some(Message::MoveUp),
            KeyCode::Down | KeyCode::Char('j') => Some(Message::MoveDown),
            KeyCode::Left | KeyCode::Char('h') => Some(Message::MoveLeft),
            KeyCode::Right | KeyCode::Char('l') => Some(Message::MoveRight),
            KeyCode::PageDown | KeyCode::Char('n') => Some(Message::NextPage),
            KeyCode::PageUp | KeyCode::Char('p') => Some(Message::PrevPage),
            KeyCode::Home => Some(Message::FirstPage),
            KeyCode::End => Some(Message::LastPage),
            KeyCode::Char('z') => Some(Message::CyclePageSize),
            KeyCode::Char('/') => Some(Message::Search),
            KeyCode::Char('s') => Some(Message::SortAscending),
            KeyCode::Char('S') => Some(Message::SortDescending),
            KeyCode::Char('u') => Some(Message::ClearSort),
            KeyCode::Char('f') => Some(Message::EnterFilterJson),
            KeyCode::Char('g') => Some(Message::Generate),
            KeyCode::Char('c') => Some(Message::ClearFilters),
            KeyCode::Char('e') => Some(Message::ExportCsv),
            KeyCode::Char('y') => Some(Message::CopyPage),
            KeyCode::Enter => Some(Message::Enter),
            KeyCode::Esc => Some(Message::Exit),
            KeyCode::Tab => Some(Message::ToggleView),
            _ => None,
        };
        trace!("Mapped: {key:?} => {message:?}");
        message
    }
}
