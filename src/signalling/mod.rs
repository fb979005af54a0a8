//! Presence, signaling and room lifecycle coordination.

mod channel;
mod election;
mod presence;
mod room;

#[doc(inline)]
pub use self::{
    channel::SignalingChannel,
    election::{elect, Role},
    presence::PresenceService,
    room::{PeerInfo, Room, RoomError, RoomHandle, RoomSnapshot},
};
