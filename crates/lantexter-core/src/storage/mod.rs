//! Settings persistence.

pub mod settings;

pub use settings::{Settings, SettingsStore};

/// Get the default data directory for LAN Texter.
///
/// Uses the `directories` crate to find the appropriate platform-specific
/// data directory.
pub fn default_data_dir() -> Option<std::path::PathBuf> {
    directories::ProjectDirs::from("", "lantexter", "lantexter")
        .map(|dirs| dirs.data_dir().to_path_buf())
}
