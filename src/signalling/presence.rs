//! Publishing and observing room presence.

use std::{collections::HashMap, sync::Arc};

use futures::{stream::BoxStream, StreamExt as _};

use crate::{
    log::prelude::*,
    proto::{Participant, RoomId, SafeKey},
    relay::{Key, RelayChannel, RelayError},
};

/// Publisher of the local participant's presence and source of the remote
/// peer roster.
///
/// The local record is owned and written exclusively by this service;
/// remote records are read-only mirrors. If the process dies without
/// [`PresenceService::close()`] being invoked, other participants keep
/// observing a stale record: there is no heartbeat or TTL mechanism.
pub struct PresenceService {
    relay: Arc<dyn RelayChannel>,
    room: RoomId,
    local: Participant,
    local_key: SafeKey,
}

impl PresenceService {
    /// Creates a new [`PresenceService`] for the provided room and local
    /// participant.
    pub fn new(
        relay: Arc<dyn RelayChannel>,
        room: RoomId,
        local: Participant,
    ) -> Self {
        let local_key = local.safe_key();
        Self {
            relay,
            room,
            local,
            local_key,
        }
    }

    /// Publishes (or republishes) the local participant's presence record.
    ///
    /// Idempotent: repeated calls overwrite the same key and never produce
    /// duplicate entries.
    pub async fn publish(&self) -> Result<(), RelayError> {
        let key = Key::presence(&self.room, &self.local_key);
        let record = serde_json::to_value(&self.local).unwrap_or_default();
        self.relay.put(&key, record).await
    }

    /// Updates the local mute flag and republishes the presence record,
    /// so remote observers see the change without a new signaling round.
    pub async fn publish_muted(
        &mut self,
        is_muted: bool,
    ) -> Result<(), RelayError> {
        self.local.is_muted = is_muted;
        self.publish().await
    }

    /// Subscribes to the roster of remote participants in the room.
    ///
    /// Each yielded map is a snapshot of all present participants, with
    /// the local record filtered out by safe-key comparison, so the
    /// caller never attempts to connect to itself.
    pub fn subscribe(
        &self,
    ) -> BoxStream<'static, HashMap<SafeKey, Participant>> {
        let prefix = Key::participants(&self.room);
        let local_key = self.local_key.clone();
        self.relay
            .watch_children(&prefix)
            .map(move |children| {
                children
                    .into_iter()
                    .filter_map(|(child, record)| {
                        let participant = match serde_json::from_value::<
                            Participant,
                        >(record)
                        {
                            Ok(p) => p,
                            Err(e) => {
                                warn!(
                                    "Dropping malformed presence record \
                                     [key = {}]: {}",
                                    child, e,
                                );
                                return None;
                            }
                        };
                        let key = participant.safe_key();
                        if key == local_key {
                            None
                        } else {
                            Some((key, participant))
                        }
                    })
                    .collect()
            })
            .boxed()
    }

    /// Removes the local presence record from the relay.
    pub async fn close(&self) -> Result<(), RelayError> {
        let key = Key::presence(&self.room, &self.local_key);
        self.relay.remove(&key).await
    }
}
