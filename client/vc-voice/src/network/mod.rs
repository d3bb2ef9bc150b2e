//! Signaling Transports
//!
//! The voice chat never talks to peers directly for signaling; everything
//! goes through a relay reached by a [`SignalingTransport`].

mod http;
mod loopback;

use async_trait::async_trait;
use thiserror::Error;
use vc_signaling::{GroupId, JoinResponse, SignalRequest, VoiceChatConfiguration};

pub use http::HttpSignalingTransport;
pub use loopback::{LoopbackHub, LoopbackTransport};

/// Signaling RPC errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{endpoint} returned status {status}")]
    Status { endpoint: &'static str, status: u16 },
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("Server URL cannot carry a path")]
    InvalidBaseUrl,
    #[error("{0} is not configured")]
    NotConfigured(&'static str),
    #[error("Not a member of group {0}")]
    NotJoined(GroupId),
    #[error("Signaling transport closed")]
    Closed,
}

/// Client side of the signaling relay.
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    /// Enter the group's voice chat; returns the roster and the caller's
    /// session id.
    async fn join(&self, group_id: &GroupId) -> Result<JoinResponse, TransportError>;

    async fn leave(&self, group_id: &GroupId) -> Result<(), TransportError>;

    /// Relay a signal to one peer or to the whole group.
    async fn send_signal(&self, signal: &SignalRequest) -> Result<(), TransportError>;

    async fn get_configuration(&self) -> Result<VoiceChatConfiguration, TransportError>;

    async fn update_mute_status(
        &self,
        group_id: &GroupId,
        is_muted: bool,
    ) -> Result<(), TransportError>;
}
