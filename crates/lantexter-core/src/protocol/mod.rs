//! LAN Texter wire protocol.

pub mod message;

pub use message::{codes, WireMessage};

/// Default UDP port shared for sending and receiving.
pub const DEFAULT_PORT: u16 = 12345;

/// Size of the fixed receive buffer. Longer datagrams are truncated.
pub const RECEIVE_BUFFER_SIZE: usize = 1024;
