//! Argo peer-to-peer voice and video mesh client.
//!
//! Argo manages the lifecycle of a full-mesh WebRTC session: presence
//! discovery through a shared relay store, offer/answer and ICE candidate
//! signaling, deterministic initiator election, bounded reconnection with
//! fixed backoff, and local capture device control.
//!
//! The backend is abstracted behind three capability traits, so the
//! library itself is runtime-host agnostic:
//!
//! - [`relay::RelayChannel`] is the shared real-time key-value store
//!   used for presence and signaling;
//! - [`platform::MediaDevices`] acquires local capture tracks;
//! - [`platform::TransportFactory`] creates per-peer WebRTC transports.
//!
//! Entry point is [`Mesh`]: join a room, then drive it through the
//! returned [`signalling::RoomHandle`].

#![allow(clippy::module_name_repetitions)]

pub mod conf;
pub mod log;
pub mod media;
pub mod mesh;
pub mod peer;
pub mod platform;
pub mod proto;
pub mod relay;
pub mod signalling;

pub use crate::{conf::Conf, mesh::Mesh};
