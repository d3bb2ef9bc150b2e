//! `VoiceChat` Mesh Client Library
//!
//! Peer-to-peer voice chat for synchronized playback groups. Every member
//! holds a direct WebRTC connection to every other member; a signaling relay
//! only carries roster updates, SDP and ICE candidates.

pub mod audio;
pub mod config;
pub mod network;
pub mod peer;
pub mod voice;

pub use config::VoiceConfig;
pub use network::{
    HttpSignalingTransport, LoopbackHub, LoopbackTransport, SignalingTransport, TransportError,
};
pub use peer::{PeerConnectionManager, RtcPeerLinkFactory, WebRtcError};
pub use voice::{
    SessionState, VoiceChatCoordinator, VoiceError, VoiceEvent, VoiceSession, VoiceSessionHandle,
    VoiceSnapshot,
};

/// Install the fmt subscriber, honoring `RUST_LOG`.
///
/// Does nothing if a global subscriber is already set.
pub fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "vc_voice=debug,vc_voice_sim=debug".into());

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if result.is_ok() {
        tracing::debug!("Tracing initialized");
    }
}
