//! Room-scoped registry of peer connections.

use std::collections::HashMap;

use crate::proto::SafeKey;

use super::ConnectionManager;

/// Registry of all active [`ConnectionManager`]s of one room, keyed by
/// the remote participant's relay-safe key.
///
/// Single-writer discipline: only the room's lifecycle coordinator
/// creates and destroys entries, and only the owning manager mutates its
/// entry's internal state. The registry guarantees at most one manager
/// per remote participant.
#[derive(Default)]
pub struct PeerRepository {
    peers: HashMap<SafeKey, ConnectionManager>,
}

impl PeerRepository {
    /// Creates an empty [`PeerRepository`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a manager for `key`, returning the displaced one, if any.
    pub fn insert(
        &mut self,
        key: SafeKey,
        manager: ConnectionManager,
    ) -> Option<ConnectionManager> {
        self.peers.insert(key, manager)
    }

    /// Returns a mutable reference to the manager of `key`.
    #[inline]
    pub fn get_mut(&mut self, key: &SafeKey) -> Option<&mut ConnectionManager> {
        self.peers.get_mut(key)
    }

    /// Indicates whether a manager for `key` exists.
    #[inline]
    pub fn contains(&self, key: &SafeKey) -> bool {
        self.peers.contains_key(key)
    }

    /// Removes and returns the manager of `key`.
    pub fn remove(&mut self, key: &SafeKey) -> Option<ConnectionManager> {
        self.peers.remove(key)
    }

    /// Iterates over all managers.
    pub fn iter(&self) -> impl Iterator<Item = (&SafeKey, &ConnectionManager)> {
        self.peers.iter()
    }

    /// Returns keys of all registered peers.
    pub fn keys(&self) -> impl Iterator<Item = &SafeKey> {
        self.peers.keys()
    }

    /// Drains all managers out of the registry.
    pub fn drain(
        &mut self,
    ) -> impl Iterator<Item = (SafeKey, ConnectionManager)> + '_ {
        self.peers.drain()
    }
}
