//! Interactive chat console.

use std::sync::Arc;

use lantexter_core::error::CoreError;
use lantexter_core::{ChatEngine, ChatHistory, Event, LogEntry};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use super::{load_settings, Overrides};
use crate::cli::ChatArgs;
use crate::error::CliError;
use crate::output::{get_formatter, OutputFormatter};

const HELP: &str = "Type a message and press Enter to send it.
Commands: /name NEW  /who  /offline  /online  /quit  (start with // to send a literal slash)";

/// One line typed at the console.
#[derive(Debug, PartialEq, Eq)]
pub enum ConsoleInput {
    Message(String),
    Rename(String),
    Who,
    Offline,
    Online,
    Help,
    Quit,
    Empty,
    Unknown(String),
}

pub fn parse_input(line: &str) -> ConsoleInput {
    let line = line.trim_end_matches(['\r', '\n']);

    if line.trim().is_empty() {
        return ConsoleInput::Empty;
    }
    if let Some(literal) = line.strip_prefix("//") {
        return ConsoleInput::Message(format!("/{}", literal));
    }
    let Some(command) = line.strip_prefix('/') else {
        return ConsoleInput::Message(line.to_string());
    };

    let (verb, rest) = match command.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (command, ""),
    };

    match verb {
        "name" | "nick" if !rest.is_empty() => ConsoleInput::Rename(rest.to_string()),
        "who" => ConsoleInput::Who,
        "offline" => ConsoleInput::Offline,
        "online" => ConsoleInput::Online,
        "help" | "?" => ConsoleInput::Help,
        "quit" | "exit" => ConsoleInput::Quit,
        _ => ConsoleInput::Unknown(line.to_string()),
    }
}

/// Run the chat command
pub async fn run_chat(args: ChatArgs, overrides: Overrides, json: bool) -> Result<(), CliError> {
    let formatter = get_formatter(json);
    let settings = load_settings(&overrides).await?;

    let engine = ChatEngine::new(&settings, Arc::new(ChatHistory::new()))?;
    let (tx, mut events) = mpsc::unbounded_channel();
    engine.subscribe(move |event| {
        let _ = tx.send(event.clone());
    });

    engine.go_online().await?;
    if !json {
        println!(
            "Chatting as {} on port {}.\n{}\n",
            settings.display_name, settings.port, HELP
        );
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if !handle_input(&engine, formatter.as_ref(), parse_input(&line)).await? {
                    break;
                }
            }
            Some(event) = events.recv() => {
                print_event(&engine, formatter.as_ref(), &event, args.quiet);
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    engine.go_offline().await?;
    Ok(())
}

/// Returns `false` when the user asked to quit.
async fn handle_input(
    engine: &ChatEngine,
    formatter: &dyn OutputFormatter,
    input: ConsoleInput,
) -> Result<bool, CliError> {
    match input {
        ConsoleInput::Message(text) => match engine.send_chat_message(&text).await {
            Ok(_) => {}
            Err(CoreError::NotOnline) => {
                println!(
                    "{}",
                    formatter.format_error("You are offline. Type /online to reconnect.")
                );
            }
            Err(e) => return Err(e.into()),
        },
        ConsoleInput::Rename(name) => {
            engine.change_my_name(&name).await?;
            if !engine.is_online() {
                println!(
                    "{}",
                    formatter.format_message(&format!("You are now known as {}", name))
                );
            }
        }
        ConsoleInput::Who => {
            println!("{}", formatter.format_participants(&engine.online_peers()));
        }
        ConsoleInput::Offline => {
            engine.go_offline().await?;
            println!("{}", formatter.format_message("You are offline."));
        }
        ConsoleInput::Online => {
            // A bind failure is already reported through the event stream.
            if let Err(e) = engine.go_online().await {
                log::debug!("Going online failed: {}", e);
            }
        }
        ConsoleInput::Help => println!("{}", formatter.format_message(HELP)),
        ConsoleInput::Quit => return Ok(false),
        ConsoleInput::Empty => {}
        ConsoleInput::Unknown(line) => {
            println!(
                "{}",
                formatter.format_error(&format!("Unknown command '{}'. Type /help.", line))
            );
        }
    }

    Ok(true)
}

fn print_event(engine: &ChatEngine, formatter: &dyn OutputFormatter, event: &Event, quiet: bool) {
    match event {
        Event::MessageReceived(entry) => {
            if quiet && entry.is_notification() {
                return;
            }
            let color = match entry {
                LogEntry::Chat { author_id, .. } => engine.peer(author_id).map(|peer| peer.color()),
                _ => None,
            };
            println!("{}", formatter.format_entry(entry, color));
        }
        other => {
            if let Some(line) = formatter.format_event(other) {
                println!("{}", line);
            }
        }
    }
}
