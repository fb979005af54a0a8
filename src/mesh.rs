//! General library interface.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::{
    conf::Conf,
    log::prelude::*,
    platform::{MediaDevices, TransportFactory},
    proto::{Participant, RoomId},
    relay::RelayChannel,
    signalling::{Room, RoomError, RoomHandle},
};

/// General library interface.
///
/// Owns the backend capabilities (relay channel, capture devices,
/// transport factory) shared by every room, and guarantees that at most
/// one room is joined at a time: joining a new room tears the previous
/// one down completely first.
pub struct Mesh {
    relay: Arc<dyn RelayChannel>,
    devices: Arc<dyn MediaDevices>,
    factory: Arc<dyn TransportFactory>,
    conf: Conf,

    /// Handle of the currently joined room, if any.
    current: Mutex<Option<RoomHandle>>,
}

impl Mesh {
    /// Instantiates a new [`Mesh`] interface on top of the provided
    /// backend capabilities.
    #[must_use]
    pub fn new(
        relay: Arc<dyn RelayChannel>,
        devices: Arc<dyn MediaDevices>,
        factory: Arc<dyn TransportFactory>,
        conf: Conf,
    ) -> Self {
        Self {
            relay,
            devices,
            factory,
            conf,
            current: Mutex::new(None),
        }
    }

    /// Joins the provided room as `local`, returning a [`RoomHandle`] to
    /// operate it.
    ///
    /// If another room is currently joined it is closed first: its peer
    /// connections, presence record and local media are all released
    /// before the new room's event loop starts.
    pub async fn join_room(
        &self,
        id: RoomId,
        local: Participant,
    ) -> Result<RoomHandle, RoomError> {
        let mut current = self.current.lock().await;
        if let Some(previous) = current.take() {
            info!("Leaving current room before joining [next = {}]", id);
            // Detached means its loop is already gone, which is fine.
            let _ = previous.close().await;
        }
        let (room, handle) = Room::new(
            id,
            local,
            Arc::clone(&self.relay),
            Arc::clone(&self.devices),
            Arc::clone(&self.factory),
            self.conf.clone(),
        );
        tokio::spawn(room.run());
        *current = Some(handle.clone());
        Ok(handle)
    }

    /// Leaves the currently joined room, if any, tearing it down
    /// completely.
    pub async fn leave_room(&self) {
        if let Some(handle) = self.current.lock().await.take() {
            let _ = handle.close().await;
        }
    }

    /// Returns a handle to the currently joined room, if any.
    pub async fn current_room(&self) -> Option<RoomHandle> {
        self.current.lock().await.clone()
    }
}
