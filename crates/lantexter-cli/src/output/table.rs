//! Table-formatted output for CLI.

use chrono::Local;
use colored::*;
use comfy_table::{Cell, Color, ContentArrangement, Table};
use std::path::Path;

use lantexter_core::{Event, LogEntry, Peer, Settings};

use super::{hex_rgb, OutputFormatter};

pub struct TableOutput;

impl TableOutput {
    pub fn new() -> Self {
        Self
    }

    fn paint(text: &str, color: Option<&str>) -> ColoredString {
        match color.and_then(hex_rgb) {
            Some((r, g, b)) => text.truecolor(r, g, b).bold(),
            None => text.bold(),
        }
    }
}

impl Default for TableOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputFormatter for TableOutput {
    fn format_participants(&self, peers: &[Peer]) -> String {
        if peers.is_empty() {
            return "Nobody is online.".to_string();
        }

        let mut table = Table::new();
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec!["Name", "Address", "Color", "Last Seen"]);

        for peer in peers {
            let name_cell = match hex_rgb(peer.color()) {
                Some((r, g, b)) => Cell::new(&peer.display_name).fg(Color::Rgb { r, g, b }),
                None => Cell::new(&peer.display_name),
            };

            table.add_row(vec![
                name_cell,
                Cell::new(peer.address),
                Cell::new(format!("#{}", peer.color())),
                Cell::new(peer.last_seen.with_timezone(&Local).format("%H:%M:%S")),
            ]);
        }

        format!("{}\n\n{} participant(s) online", table, peers.len())
    }

    fn format_entry(&self, entry: &LogEntry, color: Option<&str>) -> String {
        match entry {
            LogEntry::Chat {
                author_name,
                text,
                at,
                ..
            } => format!(
                "{} {}\n{}",
                Self::paint(author_name, color),
                format!("({})", at.with_timezone(&Local).format("%H:%M:%S")).dimmed(),
                text
            ),
            notice => notice.to_string().italic().dimmed().to_string(),
        }
    }

    fn format_event(&self, event: &Event) -> Option<String> {
        match event {
            Event::ConnectionEstablished => Some(format!("{} Connected", "[OK]".green())),
            Event::ConnectionError(message) => {
                Some(format!("{} {}", "[FAIL]".red(), message))
            }
            Event::ParticipantsChanged | Event::NameChanged | Event::MessageReceived(_) => None,
        }
    }

    fn format_settings(&self, settings: &Settings, path: &Path) -> String {
        let mut table = Table::new();
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec!["Setting", "Value"]);

        table.add_row(vec!["displayName".to_string(), settings.display_name.clone()]);
        table.add_row(vec!["port".to_string(), settings.port.to_string()]);
        table.add_row(vec![
            "heartbeatInterval".to_string(),
            format!("{}s", settings.heartbeat_interval_secs),
        ]);
        table.add_row(vec![
            "staleThreshold".to_string(),
            format!("{}s", settings.stale_threshold_secs),
        ]);

        format!("{}\n\nFile: {}", table, path.display())
    }

    fn format_message(&self, message: &str) -> String {
        message.to_string()
    }

    fn format_error(&self, error: &str) -> String {
        format!("{} {}", "Error:".red().bold(), error)
    }
}
