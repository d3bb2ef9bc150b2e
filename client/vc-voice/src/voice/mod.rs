//! Voice Chat Session
//!
//! [`VoiceChatCoordinator`] owns group membership and the peer mesh.
//! [`VoiceSession`] runs one coordinator on its own task and hands out a
//! cloneable [`VoiceSessionHandle`].

mod coordinator;
mod events;
mod session;

use serde::Serialize;
use thiserror::Error;
use vc_signaling::GroupId;

use crate::audio::AudioError;
use crate::network::TransportError;
use crate::peer::WebRtcError;

pub use coordinator::{VoiceChatCoordinator, VoiceSnapshot};
pub use events::VoiceEvent;
pub use session::{VoiceSession, VoiceSessionHandle};

/// Errors returned by `join` and unmute.
#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("Signaling failed: {0}")]
    Transport(#[from] TransportError),
    #[error("Microphone unavailable: {0}")]
    Media(#[from] AudioError),
    #[error("WebRTC error: {0}")]
    WebRtc(WebRtcError),
    #[error("Already in voice chat for group {current}")]
    AlreadyInGroup { current: GroupId },
    #[error("Voice session closed")]
    SessionClosed,
}

impl From<WebRtcError> for VoiceError {
    fn from(err: WebRtcError) -> Self {
        match err {
            WebRtcError::Capture(e) => Self::Media(e),
            other => Self::WebRtc(other),
        }
    }
}

/// Membership state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Joining,
    Active,
    Leaving,
}
