//! LAN Texter core library.
//!
//! Serverless LAN chat: peers find each other with UDP broadcast queries,
//! keep presence with periodic heartbeats and exchange chat text over
//! unicast datagrams. Shared by every front-end.

pub mod chat_log;
pub mod engine;
pub mod error;
pub mod presence;
pub mod protocol;
pub mod storage;
pub mod transport;
pub mod types;

pub use chat_log::{ChatHistory, ChatLogSink, LogEntry};
pub use engine::{ChatEngine, EngineState, Event, SubscriptionId};
pub use error::{ConnectionError, CoreError, MalformedMessage, Result, SettingsError};
pub use protocol::{WireMessage, DEFAULT_PORT};
pub use storage::{Settings, SettingsStore};
pub use types::{Peer, PeerId, PALETTE};
