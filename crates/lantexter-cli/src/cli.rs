//! CLI argument definitions using clap.

use clap::{Args, Parser, Subcommand};

/// LAN Texter - serverless chat for the local network
#[derive(Parser, Debug)]
#[command(name = "lantexter")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Verbose output (debug logging)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Display name for this run (overrides the settings file)
    #[arg(long, global = true, env = "LANTEXTER_NAME")]
    pub name: Option<String>,

    /// UDP port for this run (overrides the settings file)
    #[arg(long, global = true, env = "LANTEXTER_PORT")]
    pub port: Option<u16>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Join the chat and talk from the terminal
    Chat(ChatArgs),

    /// List who is online
    Who(WhoArgs),

    /// Local settings management
    Config(ConfigArgs),
}

// ==================== Chat ====================

#[derive(Args, Debug)]
pub struct ChatArgs {
    /// Hide join, leave and rename notices
    #[arg(short, long)]
    pub quiet: bool,
}

// ==================== Who ====================

#[derive(Args, Debug)]
pub struct WhoArgs {
    /// Seconds to listen for answers before printing
    #[arg(short, long, default_value = "3")]
    pub duration: u64,
}

// ==================== Config ====================

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Show the saved settings
    Show,

    /// Change one setting
    Set(ConfigSetArgs),

    /// Restore the defaults
    Reset,

    /// Print the settings file location
    Path,
}

#[derive(Args, Debug)]
pub struct ConfigSetArgs {
    /// Setting key (displayName, port, heartbeatInterval, staleThreshold)
    pub key: String,

    /// New value
    pub value: String,
}
