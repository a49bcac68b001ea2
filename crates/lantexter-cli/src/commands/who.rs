//! Who command implementation.

use std::sync::Arc;
use std::time::Duration;

use lantexter_core::{ChatEngine, ChatHistory};

use super::{load_settings, Overrides};
use crate::cli::WhoArgs;
use crate::error::CliError;
use crate::output::get_formatter;

/// Run the who command
pub async fn run_who(args: WhoArgs, overrides: Overrides, json: bool) -> Result<(), CliError> {
    let formatter = get_formatter(json);
    let settings = load_settings(&overrides).await?;

    let engine = ChatEngine::new(&settings, Arc::new(ChatHistory::new()))?;
    engine.go_online().await?;

    if !json {
        println!(
            "Listening on port {} for {} seconds...",
            settings.port, args.duration
        );
    }
    tokio::time::sleep(Duration::from_secs(args.duration)).await;

    let peers = engine.online_peers();
    engine.go_offline().await?;

    println!("{}", formatter.format_participants(&peers));
    Ok(())
}
