//! Chat log entries and the sink the engine appends them to.
//!
//! The engine only ever appends. Retention and presentation belong to the
//! sink; [`ChatHistory`] is the in-memory sink used by the console front-end.

use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Mutex;

use crate::types::PeerId;

/// One line of the chat log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum LogEntry {
    #[serde(rename_all = "camelCase")]
    Chat {
        author_id: PeerId,
        author_name: String,
        text: String,
        at: DateTime<Utc>,
    },
    Joined {
        name: String,
        at: DateTime<Utc>,
    },
    Left {
        name: String,
        at: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    Renamed {
        old_name: String,
        new_name: String,
        at: DateTime<Utc>,
    },
}

impl LogEntry {
    pub fn at(&self) -> DateTime<Utc> {
        match self {
            LogEntry::Chat { at, .. }
            | LogEntry::Joined { at, .. }
            | LogEntry::Left { at, .. }
            | LogEntry::Renamed { at, .. } => *at,
        }
    }

    /// Status lines (joins, leaves, renames) as opposed to chat text.
    pub fn is_notification(&self) -> bool {
        !matches!(self, LogEntry::Chat { .. })
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogEntry::Chat {
                author_name,
                text,
                at,
                ..
            } => {
                let time = at.with_timezone(&Local).format("%H:%M:%S");
                write!(f, "{} ({}):\n{}", author_name, time, text)
            }
            LogEntry::Joined { name, .. } => write!(f, "{} joined the chat", name),
            LogEntry::Left { name, .. } => write!(f, "{} left the chat", name),
            LogEntry::Renamed {
                old_name, new_name, ..
            } => write!(f, "{} is now known as {}", old_name, new_name),
        }
    }
}

/// Append-only destination for chat log entries.
pub trait ChatLogSink: Send + Sync {
    fn append_entry(&self, entry: LogEntry);
}

/// In-memory chat history for one running session.
#[derive(Debug, Default)]
pub struct ChatHistory {
    entries: Mutex<Vec<LogEntry>>,
}

impl ChatHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn latest(&self) -> Option<LogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .last()
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whole history rendered as text, one blank line between entries.
    pub fn chat_text(&self) -> String {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(LogEntry::to_string)
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

impl ChatLogSink for ChatHistory {
    fn append_entry(&self, entry: LogEntry) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(entry);
    }
}
