//! Output formatting for CLI results.

pub mod json;
pub mod table;

pub use json::JsonOutput;
pub use table::TableOutput;

use lantexter_core::{Event, LogEntry, Peer, Settings};
use std::path::Path;

/// Output formatter trait
pub trait OutputFormatter {
    /// Format the participant list
    fn format_participants(&self, peers: &[Peer]) -> String;

    /// Format one chat log entry; `color` is the author's palette color
    fn format_entry(&self, entry: &LogEntry, color: Option<&str>) -> String;

    /// Format an engine event that has no log entry
    fn format_event(&self, event: &Event) -> Option<String>;

    /// Format settings together with the file they came from
    fn format_settings(&self, settings: &Settings, path: &Path) -> String;

    /// Format a generic message
    fn format_message(&self, message: &str) -> String;

    /// Format an error
    fn format_error(&self, error: &str) -> String;
}

/// Get the appropriate formatter based on JSON flag
pub fn get_formatter(json: bool) -> Box<dyn OutputFormatter> {
    if json {
        Box::new(JsonOutput::new())
    } else {
        Box::new(TableOutput::new())
    }
}

/// Split a palette color such as `"FF00FF"` into its channels.
pub fn hex_rgb(hex: &str) -> Option<(u8, u8, u8)> {
    if hex.len() != 6 || !hex.is_ascii() {
        return None;
    }
    let channel = |range: std::ops::Range<usize>| u8::from_str_radix(&hex[range], 16).ok();
    Some((channel(0..2)?, channel(2..4)?, channel(4..6)?))
}
