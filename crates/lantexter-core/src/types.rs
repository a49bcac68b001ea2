//! Shared domain types.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// Text colors handed out to participants in join order.
pub const PALETTE: [&str; 6] = ["0000FF", "FF0000", "00FF00", "FF00FF", "00FFFF", "FFFF00"];

/// Identity of a remote participant, derived from its source address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<IpAddr> for PeerId {
    fn from(addr: IpAddr) -> Self {
        PeerId(addr.to_string())
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A chat participant as tracked by the presence table.
///
/// There is no stored online flag: liveness is a function of `last_seen`
/// and the stale threshold at the moment of the query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Peer {
    pub id: PeerId,
    pub display_name: String,
    pub address: IpAddr,
    pub last_seen: DateTime<Utc>,
    pub color_index: usize,
}

impl Peer {
    /// Whether the peer counts as online at `now`.
    pub fn is_online_at(&self, now: DateTime<Utc>, stale_threshold: Duration) -> bool {
        now.signed_duration_since(self.last_seen) < stale_threshold
    }

    /// Hex text color for this peer.
    pub fn color(&self) -> &'static str {
        PALETTE[self.color_index % PALETTE.len()]
    }
}
