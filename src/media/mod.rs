//! Local media acquisition and track handling.

mod manager;
mod track;

#[doc(inline)]
pub use self::{
    manager::{MediaManager, MediaManagerError},
    track::{MediaKind, MediaTrack, RemoteStream},
};

/// Constraints applied when acquiring local capture tracks.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MediaConstraints {
    /// Indicator whether an audio track is required.
    pub audio: bool,

    /// Indicator whether a video track is required.
    pub video: bool,
}

impl MediaConstraints {
    /// Constraints of a voice-only session.
    #[inline]
    pub fn voice() -> Self {
        Self {
            audio: true,
            video: false,
        }
    }

    /// Constraints of a voice and video session.
    #[inline]
    pub fn video() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}
