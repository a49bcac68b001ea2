//! Participant liveness tracking.

pub mod table;

pub use table::{PresenceTable, UpsertOutcome};
