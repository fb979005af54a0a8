//! Acquiring and releasing the local capture device.

use std::sync::Arc;

use derive_more::{Display, From};
use failure::Fail;

use crate::{
    log::prelude::*,
    platform::{DeviceError, MediaDevices},
};

use super::{MediaConstraints, MediaKind, MediaTrack};

/// Error of [`MediaManager`] operations.
#[derive(Debug, Display, Fail, From)]
pub enum MediaManagerError {
    /// Local capture device could not be acquired.
    ///
    /// Surfaced to the caller synchronously from [`MediaManager::start()`]
    /// and never retried.
    #[display(fmt = "local capture device unavailable: {}", _0)]
    DeviceUnavailable(DeviceError),
}

/// Owner of the local capture state.
///
/// Acquires and releases capture tracks through the platform
/// [`MediaDevices`] capability and exposes mute/video toggles. Toggles
/// only flip track enablement and never re-acquire the device.
pub struct MediaManager {
    /// Platform media capture capability.
    devices: Arc<dyn MediaDevices>,

    /// Currently held local capture tracks, empty while inactive.
    tracks: Vec<Arc<dyn MediaTrack>>,

    /// Indicator whether local audio tracks are muted.
    muted: bool,

    /// Indicator whether local video tracks are enabled.
    video_enabled: bool,
}

impl MediaManager {
    /// Creates a new inactive [`MediaManager`].
    pub fn new(devices: Arc<dyn MediaDevices>) -> Self {
        Self {
            devices,
            tracks: Vec::new(),
            muted: false,
            video_enabled: false,
        }
    }

    /// Acquires local capture tracks satisfying the provided constraints.
    ///
    /// No-op if capture is already active: the already held tracks are
    /// kept and the device is not re-acquired.
    pub async fn start(
        &mut self,
        constraints: MediaConstraints,
    ) -> Result<(), MediaManagerError> {
        if self.is_active() {
            return Ok(());
        }
        let tracks = self.devices.acquire(constraints).await?;
        info!(
            "Acquired local capture [audio = {}, video = {}, tracks = {}]",
            constraints.audio,
            constraints.video,
            tracks.len(),
        );
        self.video_enabled =
            tracks.iter().any(|t| t.kind() == MediaKind::Video);
        self.muted = false;
        self.tracks = tracks;
        Ok(())
    }

    /// Stops all held tracks and releases the capture device.
    ///
    /// Safe to call even if capture was never started.
    pub fn stop(&mut self) {
        if self.tracks.is_empty() {
            return;
        }
        for track in self.tracks.drain(..) {
            track.stop();
        }
        self.muted = false;
        self.video_enabled = false;
        info!("Released local capture device");
    }

    /// Flips the muted state of local audio tracks, returning the new
    /// state.
    ///
    /// Only toggles enablement of already held tracks.
    pub fn toggle_mute(&mut self) -> bool {
        self.muted = !self.muted;
        for track in self.audio_tracks() {
            track.set_enabled(!self.muted);
        }
        self.muted
    }

    /// Flips the enabled state of local video tracks, returning the new
    /// state.
    ///
    /// Returns `false` if no video track is held.
    pub fn toggle_video(&mut self) -> bool {
        if !self.tracks.iter().any(|t| t.kind() == MediaKind::Video) {
            return false;
        }
        self.video_enabled = !self.video_enabled;
        for track in
            self.tracks.iter().filter(|t| t.kind() == MediaKind::Video)
        {
            track.set_enabled(self.video_enabled);
        }
        self.video_enabled
    }

    /// Indicates whether local capture is currently active.
    #[inline]
    pub fn is_active(&self) -> bool {
        !self.tracks.is_empty()
    }

    /// Indicates whether local audio is muted.
    #[inline]
    pub fn is_muted(&self) -> bool {
        self.muted
    }

    /// Returns handles to all currently held local tracks.
    pub fn local_tracks(&self) -> Vec<Arc<dyn MediaTrack>> {
        self.tracks.clone()
    }

    fn audio_tracks(&self) -> impl Iterator<Item = &Arc<dyn MediaTrack>> {
        self.tracks.iter().filter(|t| t.kind() == MediaKind::Audio)
    }
}
