//! Deterministic initiator election for a peer pair.
//!
//! Both sides of a pair compute the same answer from the same two
//! identifiers, so exactly one side creates the offer and the [glare]
//! race cannot occur, without any negotiation round-trip.
//!
//! [glare]: https://webrtcglossary.com/glare

use crate::proto::ParticipantId;

/// Role of the local side for a single peer pair.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Role {
    /// Local side creates the native connection first and publishes the
    /// offer.
    Initiator,

    /// Local side awaits the remote offer and publishes the answer.
    Responder,
}

/// Decides which side of the `(local, remote)` pair acts as the
/// connection initiator, by lexicographic comparison of the raw
/// identifiers.
///
/// Total and stable: for any unordered pair of distinct IDs exactly one
/// side is elected [`Role::Initiator`], and repeated evaluations on either
/// side agree. Correct only while identifiers are unique and stable for
/// the session duration, which the rest of this crate assumes.
pub fn elect(local: &ParticipantId, remote: &ParticipantId) -> Role {
    if local.as_str() < remote.as_str() {
        Role::Initiator
    } else {
        Role::Responder
    }
}
