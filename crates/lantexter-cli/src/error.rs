//! Error types for the LAN Texter CLI.
//!
//! CliError wraps CoreError from the shared library and console I/O errors.

use lantexter_core::error::{ConnectionError, CoreError, SettingsError};
use thiserror::Error;

/// Exit codes for the CLI
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL_ERROR: i32 = 1;
    pub const NETWORK_ERROR: i32 = 2;
    pub const INVALID_ARGS: i32 = 4;
}

/// Main error type for the CLI
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Core(e) => match e {
                CoreError::Connection(_) | CoreError::NotOnline => exit_codes::NETWORK_ERROR,
                CoreError::Settings(SettingsError::InvalidValue { .. }) => exit_codes::INVALID_ARGS,
                CoreError::Settings(_)
                | CoreError::Malformed(_)
                | CoreError::ReentrantCall
                | CoreError::Io(_) => exit_codes::GENERAL_ERROR,
            },
            CliError::Io(_) => exit_codes::GENERAL_ERROR,
        }
    }
}

impl From<SettingsError> for CliError {
    fn from(e: SettingsError) -> Self {
        CliError::Core(CoreError::Settings(e))
    }
}

impl From<ConnectionError> for CliError {
    fn from(e: ConnectionError) -> Self {
        CliError::Core(CoreError::Connection(e))
    }
}
