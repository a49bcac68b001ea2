//! Command implementations.

pub mod chat;
pub mod config;
pub mod who;

pub use chat::run_chat;
pub use config::run_config;
pub use who::run_who;

use lantexter_core::error::SettingsError;
use lantexter_core::{Settings, SettingsStore};

/// Per-run overrides from flags or environment.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub name: Option<String>,
    pub port: Option<u16>,
}

impl Overrides {
    /// Apply on top of the saved settings. The file is not touched.
    pub fn apply(&self, mut settings: Settings) -> Result<Settings, SettingsError> {
        if let Some(ref name) = self.name {
            settings.display_name = name.trim().to_string();
        }
        if let Some(port) = self.port {
            settings.port = port;
        }
        settings.validate()?;
        Ok(settings)
    }
}

/// Saved settings with this run's overrides applied.
pub async fn load_settings(overrides: &Overrides) -> Result<Settings, SettingsError> {
    let store = SettingsStore::open_default()?;
    let settings = store.load().await;
    log::debug!("Loaded settings from {}", store.path().display());
    overrides.apply(settings)
}
