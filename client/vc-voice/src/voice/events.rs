//! Voice Events
//!
//! Lifecycle notifications for UI listeners, delivered over a broadcast
//! channel.

use serde::Serialize;
use vc_signaling::{GroupId, Participant, SessionId};

/// Event emitted by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum VoiceEvent {
    /// Local user joined; `participants` is the roster returned by the relay.
    Joined {
        group_id: GroupId,
        participants: Vec<Participant>,
    },
    Left {
        group_id: GroupId,
    },
    UserJoined {
        participant: Participant,
    },
    UserLeft {
        participant: Participant,
    },
    /// A remote participant announced a mute change.
    MuteChanged {
        participant: Participant,
    },
    LocalMute {
        is_muted: bool,
    },
    /// Audio from `session_id` started playing.
    RemoteStream {
        session_id: SessionId,
    },
}
