//! Capability interfaces consumed from the platform.
//!
//! This crate never touches media devices or native peer connections
//! directly: both are reached through the traits defined here, implemented
//! by the embedding application (browser bindings, native WebRTC stack, or
//! test doubles).

use std::sync::Arc;

use async_trait::async_trait;
use derive_more::Display;
use failure::Fail;
use futures::channel::mpsc;

use crate::{
    conf::IceServer,
    media::{MediaConstraints, MediaTrack, RemoteStream},
    proto::{IceCandidate, ParticipantId},
};

/// Error of acquiring a local capture device.
///
/// Never retried by this crate: the user must act (grant permission,
/// change device).
#[derive(Clone, Debug, Display, Fail)]
pub enum DeviceError {
    /// The user denied the capture permission request.
    #[display(fmt = "capture permission denied")]
    PermissionDenied,

    /// No capture device satisfying the constraints exists.
    #[display(fmt = "no capture device available")]
    NoDevice,

    /// The device failed while being acquired.
    #[display(fmt = "capture device failed: {}", _0)]
    DeviceFailed(String),
}

/// Error reported by the native transport layer.
#[derive(Clone, Debug, Display, Fail)]
pub enum TransportError {
    /// Native peer connection object could not be created.
    #[display(fmt = "failed to create peer connection: {}", _0)]
    CreateFailed(String),

    /// Offer or answer generation failed.
    #[display(fmt = "failed to create SDP: {}", _0)]
    CreateSdpFailed(String),

    /// Local or remote description could not be applied.
    #[display(fmt = "failed to set description: {}", _0)]
    SetDescriptionFailed(String),

    /// Candidate could not be applied to the native connection.
    #[display(fmt = "failed to add ICE candidate: {}", _0)]
    AddCandidateFailed(String),
}

/// State of the underlying media transport, as reported by the native
/// layer.
///
/// This crate only reacts to these reports; it never asserts a media path
/// on its own.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransportState {
    /// Transport negotiation is in progress.
    Connecting,

    /// A media path is established.
    Connected,

    /// The established media path broke down.
    Disconnected,

    /// Transport negotiation failed permanently for this native handle.
    Failed,
}

/// Event emitted by a native [`PeerTransport`].
#[derive(Debug)]
pub enum TransportEvent {
    /// Transport discovered a new local [`IceCandidate`].
    IceCandidateDiscovered(IceCandidate),

    /// Transport received the remote side's media stream.
    NewRemoteStream(Arc<dyn RemoteStream>),

    /// Native layer reported a transport state change.
    ConnectionStateChanged(TransportState),
}

/// Session description applied to a [`PeerTransport`] as the remote
/// description.
#[derive(Clone, Debug)]
pub enum Sdp {
    /// SDP offer.
    Offer(String),

    /// SDP answer.
    Answer(String),
}

/// Media capture capability of the platform.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Acquires local capture tracks satisfying the provided constraints.
    async fn acquire(
        &self,
        constraints: MediaConstraints,
    ) -> Result<Vec<Arc<dyn MediaTrack>>, DeviceError>;
}

/// Native peer connection object.
///
/// Implementations must stop emitting [`TransportEvent`]s once
/// [`PeerTransport::close()`] has been invoked, so a closed handle cannot
/// misfire callbacks into a newer connection's state.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Attaches a local media track to this connection.
    fn add_track(&self, track: Arc<dyn MediaTrack>);

    /// Generates an SDP offer and sets it as the local description.
    async fn create_and_set_offer(&self) -> Result<String, TransportError>;

    /// Generates an SDP answer and sets it as the local description.
    ///
    /// Must be called only after a remote offer has been applied.
    async fn create_and_set_answer(&self) -> Result<String, TransportError>;

    /// Applies the remote side's session description.
    async fn set_remote_description(
        &self,
        sdp: Sdp,
    ) -> Result<(), TransportError>;

    /// Applies a remote [`IceCandidate`] to this connection.
    async fn add_ice_candidate(
        &self,
        candidate: &IceCandidate,
    ) -> Result<(), TransportError>;

    /// Synchronously releases the native handle.
    ///
    /// Safe to call multiple times.
    fn close(&self);
}

/// Factory of native [`PeerTransport`]s.
pub trait TransportFactory: Send + Sync {
    /// Creates a native peer connection towards `remote`, configured with
    /// the provided ICE servers.
    ///
    /// All events of the created transport are delivered through the
    /// provided `events` sender.
    fn create(
        &self,
        remote: &ParticipantId,
        ice_servers: &[IceServer],
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Arc<dyn PeerTransport>, TransportError>;
}
