//! Presence table: every peer ever heard from, keyed by source address.
//!
//! Peers are never removed. Going offline is a timestamp moved into the
//! past, so liveness stays a pure function of elapsed time and a peer that
//! never says goodbye still ages out once the stale threshold passes.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::types::{Peer, PeerId, PALETTE};

/// Result of recording a sign of life from a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    /// The peer was unknown or counted as offline before this message.
    pub is_new_or_reappeared: bool,
    pub color_index: usize,
}

/// Owner of all [`Peer`] records. Readers only ever get copies.
pub struct PresenceTable {
    stale_threshold: Duration,
    inner: RwLock<TableInner>,
}

#[derive(Default)]
struct TableInner {
    peers: HashMap<PeerId, Peer>,
    join_order: Vec<PeerId>,
}

impl TableInner {
    fn in_join_order(&self) -> impl Iterator<Item = &Peer> {
        self.join_order.iter().filter_map(|id| self.peers.get(id))
    }
}

impl PresenceTable {
    pub fn new(stale_threshold: std::time::Duration) -> Self {
        Self {
            stale_threshold: Duration::from_std(stale_threshold).unwrap_or(Duration::MAX),
            inner: RwLock::new(TableInner::default()),
        }
    }

    pub fn stale_threshold(&self) -> Duration {
        self.stale_threshold
    }

    fn read(&self) -> RwLockReadGuard<'_, TableInner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, TableInner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Record a sign of life from `id`.
    pub fn upsert_online(&self, id: &PeerId, name: &str, address: IpAddr) -> UpsertOutcome {
        self.upsert_online_at(id, name, address, Utc::now())
    }

    /// Record a sign of life from `id` observed at `now`.
    ///
    /// A new peer takes the next palette slot in join order. A known peer
    /// only gets its timestamp refreshed; its name changes via [`rename`](Self::rename).
    pub fn upsert_online_at(
        &self,
        id: &PeerId,
        name: &str,
        address: IpAddr,
        now: DateTime<Utc>,
    ) -> UpsertOutcome {
        let mut inner = self.write();

        if let Some(peer) = inner.peers.get_mut(id) {
            let was_online = peer.is_online_at(now, self.stale_threshold);
            peer.last_seen = now;
            return UpsertOutcome {
                is_new_or_reappeared: !was_online,
                color_index: peer.color_index,
            };
        }

        // Collisions past six peers are accepted.
        let color_index = inner.join_order.len() % PALETTE.len();
        inner.join_order.push(id.clone());
        inner.peers.insert(
            id.clone(),
            Peer {
                id: id.clone(),
                display_name: name.to_string(),
                address,
                last_seen: now,
                color_index,
            },
        );

        UpsertOutcome {
            is_new_or_reappeared: true,
            color_index,
        }
    }

    /// Mark `id` offline. Returns `false` for an unknown peer.
    pub fn mark_offline(&self, id: &PeerId) -> bool {
        self.mark_offline_at(id, Utc::now())
    }

    pub fn mark_offline_at(&self, id: &PeerId, now: DateTime<Utc>) -> bool {
        let stale = self.stale_timestamp(now);
        match self.write().peers.get_mut(id) {
            Some(peer) => {
                peer.last_seen = stale;
                true
            }
            None => false,
        }
    }

    /// Mark every known peer offline.
    pub fn mark_all_offline(&self) {
        let stale = self.stale_timestamp(Utc::now());
        for peer in self.write().peers.values_mut() {
            peer.last_seen = stale;
        }
    }

    /// Two thresholds before `now`.
    fn stale_timestamp(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(self.stale_threshold)
            .and_then(|t| t.checked_sub_signed(self.stale_threshold))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Change the name of `id`, returning the previous name.
    pub fn rename(&self, id: &PeerId, new_name: &str) -> Option<String> {
        self.write()
            .peers
            .get_mut(id)
            .map(|peer| std::mem::replace(&mut peer.display_name, new_name.to_string()))
    }

    /// Peers online right now, in join order.
    pub fn online_peers(&self) -> Vec<Peer> {
        self.online_peers_at(Utc::now())
    }

    pub fn online_peers_at(&self, now: DateTime<Utc>) -> Vec<Peer> {
        self.read()
            .in_join_order()
            .filter(|peer| peer.is_online_at(now, self.stale_threshold))
            .cloned()
            .collect()
    }

    /// Names of the peers online right now, in join order.
    pub fn online_names(&self) -> Vec<String> {
        self.online_peers()
            .into_iter()
            .map(|peer| peer.display_name)
            .collect()
    }

    /// Every peer ever seen, in join order.
    pub fn all_peers(&self) -> Vec<Peer> {
        self.read().in_join_order().cloned().collect()
    }

    pub fn get(&self, id: &PeerId) -> Option<Peer> {
        self.read().peers.get(id).cloned()
    }

    pub fn name_of(&self, id: &PeerId) -> Option<String> {
        self.read().peers.get(id).map(|peer| peer.display_name.clone())
    }

    pub fn color_of(&self, id: &PeerId) -> Option<&'static str> {
        self.read().peers.get(id).map(Peer::color)
    }

    pub fn is_online(&self, id: &PeerId) -> bool {
        self.is_online_at(id, Utc::now())
    }

    pub fn is_online_at(&self, id: &PeerId, now: DateTime<Utc>) -> bool {
        self.read()
            .peers
            .get(id)
            .is_some_and(|peer| peer.is_online_at(now, self.stale_threshold))
    }

    /// Number of peers ever seen.
    pub fn len(&self) -> usize {
        self.read().peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().peers.is_empty()
    }
}
