use std::time::Duration;
use tracing::trace;

use crate::domain::{Message, RTVConfig, RTVError};
use crate::model::Model;
use ratatui::crossterm::event::{self, Event, KeyCode, KeyModifiers};

pub struct Controller {
    event_poll_time: u64,
}

impl Controller {
    pub fn new(cfg: &RTVConfig) -> Self {
        Self {
            event_poll_time: cfg.event_poll_time,
        }
    }

    pub fn handle_event(&self, model: &Model) -> Result<Option<Message>, RTVError> {
        if event::poll(Duration::from_millis(self.event_poll_time))? {
            match event::read()? {
                Event::Key(key) if key.kind == event::KeyEventKind::Press => {
                    if model.raw_keyevents() {
                        return Ok(Some(Message::RawKey(key)));
                    }
                    return Ok(self.handle_key(key));
                }
                Event::Resize(width, height) => {
                    return Ok(Some(Message::Resize(width as usize, height as usize)));
                }
                _ => {}
            }
        }
        Ok(None)
    }

    fn handle_key(&self, key: event::KeyEvent) -> Option<Message> {
        let message = match (key.code, key.modifiers) {
            (KeyCode::Char('c'), KeyModifiers::CONTROL) => Some(Message::Quit),
            (KeyCode::Char('q'), _) => Some(Message::Quit),
            (KeyCode::Esc, _) => Some(Message::Exit),
            (KeyCode::Enter, _) => Some(Message::Enter),
            (KeyCode::Char('?'), _) => Some(Message::Help),

            (KeyCode::Up | KeyCode::Char('k'), _) => Some(Message::MoveUp),
            (KeyCode::Down | KeyCode::Char('j'), _) => Some(Message::MoveDown),
            (KeyCode::Left | KeyCode::Char('h'), _) => Some(Message::MoveLeft),
            (KeyCode::Right | KeyCode::Char('l'), _) => Some(Message::MoveRight),
            (KeyCode::PageUp, _) => Some(Message::MovePageUp),
            (KeyCode::PageDown, _) => Some(Message::MovePageDown),
            (KeyCode::Char('0') | KeyCode::Home, _) => Some(Message::MoveToFirstColumn),
            (KeyCode::Char('$') | KeyCode::End, _) => Some(Message::MoveToLastColumn),

            (KeyCode::Char('n'), _) => Some(Message::NextPage),
            (KeyCode::Char('p'), _) => Some(Message::PreviousPage),
            (KeyCode::Char('g'), _) => Some(Message::FirstPage),
            (KeyCode::Char('G'), _) => Some(Message::LastPage),
            (KeyCode::Char('+'), _) => Some(Message::CyclePageSize),

            (KeyCode::Char('s'), _) => Some(Message::Sort),
            (KeyCode::Char('S'), _) => Some(Message::AddSort),
            (KeyCode::Char('f'), _) => Some(Message::Filter),
            (KeyCode::Char('/'), _) => Some(Message::Search),
            (KeyCode::Char('x'), _) => Some(Message::ClearFilter),
            (KeyCode::Char('r'), _) => Some(Message::ResetFilters),
            (KeyCode::Char('F'), _) => Some(Message::FilterPanel),
            (KeyCode::Char('c'), _) => Some(Message::ValueCounts),

            (KeyCode::Char('-'), _) => Some(Message::HideColumn),
            (KeyCode::Char('a'), _) => Some(Message::ShowAllColumns),
            (KeyCode::Char('i'), _) => Some(Message::ToggleIndex),
            (KeyCode::Char('y'), _) => Some(Message::CopyCell),
            (KeyCode::Char('Y'), _) => Some(Message::CopyRow),
            _ => None,
        };
        trace!("Mapped: {key:?} => {message:?}");
        message
    }
}
