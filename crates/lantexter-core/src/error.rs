//! Error types for the LAN Texter core.

use thiserror::Error;

/// Core error type for shared operations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Malformed message: {0}")]
    Malformed(#[from] MalformedMessage),

    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    #[error("Not online")]
    NotOnline,

    #[error("Engine called from inside an event callback")]
    ReentrantCall,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Session-level transport failures.
///
/// Every variant is recoverable: the session is torn down and the caller
/// may go online again.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Failed to bind UDP port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("Broadcast not permitted: {0}")]
    Broadcast(#[source] std::io::Error),

    #[error("Receive failed: {0}")]
    Receive(#[source] std::io::Error),
}

/// Decode failures for inbound datagrams.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MalformedMessage {
    #[error("payload is not valid JSON: {0}")]
    NotJson(String),

    #[error("payload is not a JSON object")]
    NotAnObject,

    #[error("missing or non-integer `code` field")]
    MissingCode,

    #[error("unknown message code {0}")]
    UnknownCode(i64),

    #[error("missing string field `{0}`")]
    MissingField(&'static str),
}

/// Settings file errors
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Could not determine app data directory")]
    NoDataDirectory,

    #[error("Invalid setting {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, CoreError>;
