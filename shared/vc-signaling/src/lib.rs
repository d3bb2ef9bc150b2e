//! `VoiceChat` Signaling Contract
//!
//! Wire types exchanged between mesh clients and the signaling relay: group
//! membership, roster updates, and the SDP/ICE payloads relayed between peers.

pub mod error;
pub mod protocol;
pub mod types;

pub use error::{Error, Result};
pub use protocol::{InboundSignal, PeerMessage, Signal, SignalRequest, SignalType};
pub use types::*;
