//! Hierarchical relay key schema.
//!
//! All keys of a session are scoped under its room:
//!
//! ```text
//! {room}/participants/{safeKey}                             presence
//! {room}/signals/{toSafeKey}/from_{fromSafeKey}/offer       last offer
//! {room}/signals/{toSafeKey}/from_{fromSafeKey}/answer      last answer
//! {room}/signals/{toSafeKey}/from_{fromSafeKey}/candidates  candidate list
//! ```
//!
//! The directional pairwise namespacing is what lets two participants
//! signal each other simultaneously without collision: A→B and B→A occupy
//! disjoint key spaces.

use derive_more::Display;

use crate::proto::{RoomId, SafeKey};

/// Hierarchical key addressing a single value, list or subtree in the
/// relay store.
///
/// Room IDs are used in keys verbatim and are assumed to be key-safe;
/// participant identifiers go through the [`SafeKey`] mapping.
#[derive(Clone, Debug, Display, Eq, Hash, PartialEq)]
pub struct Key(String);

impl Key {
    /// Returns key of the presence subtree of `room`.
    pub fn participants(room: &RoomId) -> Self {
        Self(format!("{}/participants", room))
    }

    /// Returns key of the presence record of participant `who` in `room`.
    pub fn presence(room: &RoomId, who: &SafeKey) -> Self {
        Self(format!("{}/participants/{}", room, who))
    }

    /// Returns key of the last offer sent `from` → `to` in `room`.
    pub fn offer(room: &RoomId, to: &SafeKey, from: &SafeKey) -> Self {
        Self(format!("{}/signals/{}/from_{}/offer", room, to, from))
    }

    /// Returns key of the last answer sent `from` → `to` in `room`.
    pub fn answer(room: &RoomId, to: &SafeKey, from: &SafeKey) -> Self {
        Self(format!("{}/signals/{}/from_{}/answer", room, to, from))
    }

    /// Returns key of the candidate list sent `from` → `to` in `room`.
    pub fn candidates(room: &RoomId, to: &SafeKey, from: &SafeKey) -> Self {
        Self(format!("{}/signals/{}/from_{}/candidates", room, to, from))
    }

    /// Returns string slice of this key.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}
