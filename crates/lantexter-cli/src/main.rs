//! LAN Texter CLI - chat with everyone on the local network from a terminal.
//!
//! There is no server: every running instance finds the others by UDP
//! broadcast and talks to them directly.

mod cli;
mod commands;
mod error;
mod output;

use clap::Parser;
use std::io::Write;

use cli::{Cli, Commands};
use commands::Overrides;
use error::{exit_codes, CliError};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let json = cli.json;
    let result = run(cli).await;

    match result {
        Ok(()) => std::process::exit(exit_codes::SUCCESS),
        Err(e) => {
            let formatter = output::get_formatter(json);
            eprintln!("{}", formatter.format_error(&e.to_string()));
            std::process::exit(e.exit_code());
        }
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] {} - {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let overrides = Overrides {
        name: cli.name,
        port: cli.port,
    };

    match cli.command {
        Commands::Chat(args) => commands::run_chat(args, overrides, cli.json).await,
        Commands::Who(args) => commands::run_who(args, overrides, cli.json).await,
        Commands::Config(args) => commands::run_config(args, cli.json).await,
    }
}
