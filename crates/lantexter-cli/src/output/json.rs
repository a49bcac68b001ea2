//! JSON-formatted output for CLI.

use serde::Serialize;
use serde_json::{json, Value};
use std::path::Path;

use lantexter_core::{Event, LogEntry, Peer, Settings};

use super::OutputFormatter;

pub struct JsonOutput;

impl JsonOutput {
    pub fn new() -> Self {
        Self
    }

    fn to_json<T: Serialize>(value: &T) -> String {
        serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
    }

    /// One line per value, for streams.
    fn to_json_line<T: Serialize>(value: &T) -> String {
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    }
}

impl Default for JsonOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputFormatter for JsonOutput {
    fn format_participants(&self, peers: &[Peer]) -> String {
        let items: Vec<Value> = peers
            .iter()
            .map(|peer| {
                let mut value = serde_json::to_value(peer).unwrap_or(json!({}));
                if let Value::Object(ref mut map) = value {
                    map.insert("color".to_string(), json!(peer.color()));
                }
                value
            })
            .collect();

        Self::to_json(&json!({
            "participants": items,
            "count": peers.len()
        }))
    }

    fn format_entry(&self, entry: &LogEntry, color: Option<&str>) -> String {
        let mut value = serde_json::to_value(entry).unwrap_or(json!({}));
        if let (Value::Object(ref mut map), Some(color)) = (&mut value, color) {
            map.insert("color".to_string(), json!(color));
        }
        Self::to_json_line(&value)
    }

    fn format_event(&self, event: &Event) -> Option<String> {
        match event {
            Event::MessageReceived(_) => None,
            other => Some(Self::to_json_line(other)),
        }
    }

    fn format_settings(&self, settings: &Settings, path: &Path) -> String {
        Self::to_json(&json!({
            "path": path.display().to_string(),
            "settings": settings
        }))
    }

    fn format_message(&self, message: &str) -> String {
        Self::to_json_line(&json!({ "message": message }))
    }

    fn format_error(&self, error: &str) -> String {
        Self::to_json_line(&json!({ "error": error }))
    }
}
