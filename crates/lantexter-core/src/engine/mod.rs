//! Protocol engine: session lifecycle, inbound dispatch and notifications.

pub mod events;
pub mod heartbeat;
pub mod service;

pub use events::{Event, EventBus, SubscriptionId};
pub use heartbeat::Heartbeat;
pub use service::{ChatEngine, EngineState};
