//! Records exchanged between participants through the relay store.
//!
//! Everything in this module crosses a process boundary: presence records
//! are mirrored to every participant of a room, and [`Signal`]s carry the
//! offer/answer/candidate exchange for a single peer pair.

use derive_more::{Display, From};
use serde::{Deserialize, Serialize};

/// ID of a room.
///
/// Purely a namespace: all presence and signaling keys of a session are
/// scoped under it, and it has no lifecycle of its own.
#[derive(Clone, Debug, Display, Eq, From, Hash, PartialEq)]
pub struct RoomId(pub String);

impl From<&str> for RoomId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

/// Raw ID of a room participant.
///
/// May contain characters that are illegal in relay keys, so it is never
/// used as a key directly. See [`SafeKey`] for the key-safe form.
#[derive(
    Clone,
    Debug,
    Deserialize,
    Display,
    Eq,
    From,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub struct ParticipantId(pub String);

impl ParticipantId {
    /// Returns string slice of this ID.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ParticipantId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

/// Relay-safe form of a [`ParticipantId`].
///
/// Derivation is deterministic and injective: ASCII alphanumerics and `-`
/// pass through unchanged, `_` is escaped as `__`, and every other byte is
/// replaced with `_xx` (two lowercase hex digits). The raw ID is kept
/// alongside for display and application-level identity.
#[derive(Clone, Debug, Display, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SafeKey(String);

impl SafeKey {
    /// Returns string slice of this key.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&ParticipantId> for SafeKey {
    fn from(id: &ParticipantId) -> Self {
        let mut out = String::with_capacity(id.0.len());
        for b in id.0.bytes() {
            match b {
                b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' => {
                    out.push(b as char);
                }
                b'_' => out.push_str("__"),
                _ => {
                    out.push('_');
                    out.push_str(&format!("{:02x}", b));
                }
            }
        }
        Self(out)
    }
}

/// Presence record of a single room participant.
///
/// The local participant's record is owned and written exclusively by the
/// local process; remote records are read-only mirrors observed via the
/// presence subscription.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Participant {
    /// Raw ID of this participant.
    pub id: ParticipantId,

    /// Name shown to other participants.
    pub display_name: String,

    /// Indicator whether this participant's audio is muted.
    pub is_muted: bool,
}

impl Participant {
    /// Creates a new unmuted [`Participant`] record.
    pub fn new<I: Into<ParticipantId>, N: Into<String>>(
        id: I,
        display_name: N,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            is_muted: false,
        }
    }

    /// Returns the relay-safe key of this participant.
    #[inline]
    pub fn safe_key(&self) -> SafeKey {
        SafeKey::from(&self.id)
    }
}

/// [ICE] candidate proposed by one side of a peer pair.
///
/// [ICE]: https://webrtcglossary.com/ice
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct IceCandidate {
    /// [`candidate-attribute`][1] of this candidate.
    ///
    /// [1]: https://w3.org/TR/webrtc#dfn-candidate-attribute
    pub candidate: String,

    /// Index of the media description this candidate is associated with.
    pub sdp_m_line_index: Option<u16>,

    /// Media stream identification tag of this candidate.
    pub sdp_mid: Option<String>,
}

/// Signaling message addressed to a single `(from, to)` peer pair.
///
/// Signals are append-only facts: an offer or answer supersedes the
/// previous one at the same relay key, and candidates accumulate as an
/// ordered list.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Signal {
    /// SDP offer created by the pair's initiator.
    Offer {
        /// SDP of the offer.
        sdp: String,
    },

    /// SDP answer created by the pair's responder.
    Answer {
        /// SDP of the answer.
        sdp: String,
    },

    /// Discovered [`IceCandidate`] of either side.
    Candidate {
        /// The discovered candidate.
        candidate: IceCandidate,
    },
}
