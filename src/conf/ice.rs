//! [ICE] servers settings.
//!
//! [ICE]: https://webrtcglossary.com/ice

use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

/// [ICE] servers settings.
///
/// [ICE]: https://webrtcglossary.com/ice
#[derive(Clone, Debug, Deserialize, Serialize, SmartDefault)]
#[serde(default)]
pub struct Ice {
    /// List of static unmanaged [STUN]/[TURN] servers handed to every
    /// created peer connection.
    ///
    /// Defaults to a single public [STUN] server.
    ///
    /// [STUN]: https://webrtcglossary.com/stun
    /// [TURN]: https://webrtcglossary.com/turn
    #[default(vec![IceServer::stun("stun:stun.l.google.com:19302")])]
    pub servers: Vec<IceServer>,
}

/// Single [STUN]/[TURN] server endpoint.
///
/// [STUN]: https://webrtcglossary.com/stun
/// [TURN]: https://webrtcglossary.com/turn
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct IceServer {
    /// URLs of this server.
    pub urls: Vec<String>,

    /// Username for authentication on this server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Credential for authentication on this server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    /// Creates a credential-less [STUN] server entry.
    ///
    /// [STUN]: https://webrtcglossary.com/stun
    pub fn stun<S: Into<String>>(url: S) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }
}
