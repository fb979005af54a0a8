//! Per-peer connection retry settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

/// Per-peer connection retry settings.
///
/// A fixed delay and a hard attempt cap are used instead of exponential
/// backoff, keeping the total worst-case connection-setup time bounded in
/// a small-room setting.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, SmartDefault)]
#[serde(default)]
pub struct Retry {
    /// Number of consecutive transport failures after which a peer
    /// connection is left in its terminal state. Defaults to `3`.
    #[default(3)]
    pub max_retries: u32,

    /// Minimum delay between two consecutive reconnection attempts for
    /// the same peer. Defaults to `2s`.
    #[default(Duration::from_secs(2))]
    #[serde(with = "humantime_serde")]
    pub delay: Duration,
}
