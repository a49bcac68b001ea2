//! Settings commands.

use lantexter_core::SettingsStore;

use crate::cli::{ConfigArgs, ConfigCommands};
use crate::error::CliError;
use crate::output::get_formatter;

/// Run a config subcommand
pub async fn run_config(args: ConfigArgs, json: bool) -> Result<(), CliError> {
    let formatter = get_formatter(json);
    let store = SettingsStore::open_default()?;

    match args.command {
        ConfigCommands::Show => {
            let settings = store.load().await;
            println!("{}", formatter.format_settings(&settings, store.path()));
        }
        ConfigCommands::Set(set) => {
            let mut settings = store.load().await;
            settings.set(&set.key, &set.value)?;
            store.save(&settings).await?;
            println!("{}", formatter.format_settings(&settings, store.path()));
        }
        ConfigCommands::Reset => {
            let settings = store.reset().await?;
            println!(
                "{}",
                formatter.format_message("Settings restored to defaults")
            );
            println!("{}", formatter.format_settings(&settings, store.path()));
        }
        ConfigCommands::Path => {
            println!("{}", formatter.format_message(&store.path().display().to_string()));
        }
    }

    Ok(())
}
