//! Contract Types

mod ice;
mod participant;
mod sdp;

pub use ice::{IceServer, VoiceChatConfiguration};
pub use participant::{GroupId, JoinResponse, Participant, SessionId};
pub use sdp::{IceCandidate, SdpKind, SessionDescription};
