//! Handles to platform media tracks and streams.

use std::fmt;

/// Kind of a media track.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MediaKind {
    /// Audio track.
    Audio,

    /// Video track.
    Video,
}

/// Handle to a local capture track, owned by the platform.
///
/// Enabling/disabling a track is a cheap toggle and never re-acquires the
/// device; [`MediaTrack::stop()`] releases the underlying device resource
/// irrevocably.
pub trait MediaTrack: Send + Sync {
    /// Returns [`MediaKind`] of this track.
    fn kind(&self) -> MediaKind;

    /// Enables or disables this track without releasing the device.
    fn set_enabled(&self, enabled: bool);

    /// Indicates whether this track is currently enabled.
    fn is_enabled(&self) -> bool;

    /// Stops this track, releasing its device resource.
    fn stop(&self);
}

/// Handle to a remote participant's media stream, produced by the native
/// transport when a media path is established.
pub trait RemoteStream: fmt::Debug + Send + Sync {
    /// Returns platform-assigned ID of this stream.
    fn id(&self) -> String;
}
