//! Routing of offer/answer/candidate signals through the relay.

use std::sync::Arc;

use futures::{stream, stream::BoxStream, StreamExt as _};
use serde_json::Value;

use crate::{
    log::prelude::*,
    proto::{IceCandidate, RoomId, SafeKey, Signal},
    relay::{Key, RelayChannel, RelayError},
};

/// Sender/receiver of [`Signal`]s for the local participant of one room.
///
/// Every signal is addressed by the ordered `(from, to)` pair: A→B and
/// B→A live under disjoint keys, so two participants signaling each other
/// simultaneously never collide. Offers and answers are last-write-wins
/// at their key; candidates accumulate as an append-only list and are
/// delivered at most once per subscription by the relay's new-items-only
/// list notification semantics.
///
/// The channel performs no validation of SDP content: malformed payloads
/// that fail to decode are logged and skipped, everything else is passed
/// through and any resulting native-connection error is handled by the
/// connection manager.
pub struct SignalingChannel {
    relay: Arc<dyn RelayChannel>,
    room: RoomId,
    local: SafeKey,
}

impl SignalingChannel {
    /// Creates a new [`SignalingChannel`] for the provided room, sending
    /// on behalf of `local`.
    pub fn new(
        relay: Arc<dyn RelayChannel>,
        room: RoomId,
        local: SafeKey,
    ) -> Self {
        Self { relay, room, local }
    }

    /// Publishes an offer addressed to `to`, superseding any previous
    /// offer for this pair.
    pub async fn send_offer(
        &self,
        to: &SafeKey,
        sdp: String,
    ) -> Result<(), RelayError> {
        let key = Key::offer(&self.room, to, &self.local);
        let signal = serde_json::to_value(&Signal::Offer { sdp })
            .unwrap_or_default();
        self.relay.put(&key, signal).await
    }

    /// Publishes an answer addressed to `to`, superseding any previous
    /// answer for this pair.
    pub async fn send_answer(
        &self,
        to: &SafeKey,
        sdp: String,
    ) -> Result<(), RelayError> {
        let key = Key::answer(&self.room, to, &self.local);
        let signal = serde_json::to_value(&Signal::Answer { sdp })
            .unwrap_or_default();
        self.relay.put(&key, signal).await
    }

    /// Appends a discovered candidate to the list addressed to `to`.
    pub async fn send_candidate(
        &self,
        to: &SafeKey,
        candidate: IceCandidate,
    ) -> Result<(), RelayError> {
        let key = Key::candidates(&self.room, to, &self.local);
        let signal = serde_json::to_value(&Signal::Candidate { candidate })
            .unwrap_or_default();
        self.relay.append(&key, signal).await
    }

    /// Subscribes to all signals addressed to the local participant by
    /// `from`: the offer and answer values plus the candidate list,
    /// merged into a single stream.
    pub fn signals_from(&self, from: &SafeKey) -> BoxStream<'static, Signal> {
        let offers = self
            .relay
            .watch(&Key::offer(&self.room, &self.local, from))
            .filter_map(decode_present)
            .boxed();
        let answers = self
            .relay
            .watch(&Key::answer(&self.room, &self.local, from))
            .filter_map(decode_present)
            .boxed();
        let candidates = self
            .relay
            .watch_list(&Key::candidates(&self.room, &self.local, from))
            .filter_map(|item| decode_present(Some(item)))
            .boxed();

        stream::select_all(vec![offers, answers, candidates]).boxed()
    }

    /// Deletes all signals authored by the local participant towards
    /// `remote`: its offer, answer and candidate list.
    ///
    /// Invoked before a reconnection attempt (so stale descriptions and
    /// candidates of the discarded native handle cannot leak into the new
    /// one) and on teardown (so the next session starts from a clean key
    /// space). Only locally authored keys are touched: the remote side's
    /// fresh signals are never deleted by this call.
    pub async fn clear_authored(
        &self,
        remote: &SafeKey,
    ) -> Result<(), RelayError> {
        self.relay
            .remove(&Key::offer(&self.room, remote, &self.local))
            .await?;
        self.relay
            .remove(&Key::answer(&self.room, remote, &self.local))
            .await?;
        self.relay
            .remove(&Key::candidates(&self.room, remote, &self.local))
            .await
    }
}

/// Decodes a relay payload into a [`Signal`], dropping removals and
/// logging malformed payloads.
fn decode_present(
    value: Option<Value>,
) -> futures::future::Ready<Option<Signal>> {
    let signal = value.and_then(|v| match serde_json::from_value(v) {
        Ok(signal) => Some(signal),
        Err(e) => {
            warn!("Dropping malformed signal: {}", e);
            None
        }
    });
    futures::future::ready(signal)
}
