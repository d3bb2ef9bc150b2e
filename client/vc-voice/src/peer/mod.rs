//! Peer Connections
//!
//! One WebRTC connection per remote participant. [`PeerLink`] separates the
//! negotiation rules in [`PeerConnectionManager`] from the webrtc-rs
//! connection built by [`RtcPeerLinkFactory`].

mod manager;
mod rtc;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use vc_signaling::{IceCandidate, IceServer, PeerMessage, SessionDescription, SessionId};
use webrtc::track::track_local::TrackLocal;

use crate::audio::{AudioError, RemoteAudioSource};

pub use manager::PeerConnectionManager;
pub use rtc::RtcPeerLinkFactory;

/// Outgoing audio track as webrtc-rs consumes it.
pub type LocalTrack = Arc<dyn TrackLocal + Send + Sync>;

/// Generation number of a connection; a peer gets a new one whenever its
/// connection is replaced.
pub type LinkId = u64;

/// WebRTC errors
#[derive(Error, Debug)]
pub enum WebRtcError {
    #[error("WebRTC API error: {0}")]
    ApiError(String),
    #[error("Peer connection error: {0}")]
    PeerConnectionError(String),
    #[error("SDP error: {0}")]
    SdpError(String),
    #[error("ICE error: {0}")]
    IceError(String),
    #[error("Track error: {0}")]
    TrackError(String),
    #[error("Peer connection manager not initialized")]
    NotInitialized,
    #[error("ICE servers cannot change during a session")]
    IceServersChanged,
    #[error("No connection for peer {0}")]
    PeerNotFound(SessionId),
    #[error("Capture error: {0}")]
    Capture(#[from] AudioError),
}

/// Offer/answer state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    Closed,
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    /// States after which the connection is discarded.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed | Self::Closed)
    }
}

/// Signal the local side wants relayed to a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundSignal {
    pub to: SessionId,
    pub link_id: LinkId,
    pub message: PeerMessage,
}

/// Event produced by a connection or by the manager itself.
pub enum PeerEvent {
    Signal(OutboundSignal),
    ConnectionState {
        peer: SessionId,
        link_id: LinkId,
        state: ConnectionState,
    },
    RemoteTrack {
        peer: SessionId,
        link_id: LinkId,
        source: Arc<dyn RemoteAudioSource>,
    },
}

impl fmt::Debug for PeerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Signal(signal) => f.debug_tuple("Signal").field(signal).finish(),
            Self::ConnectionState {
                peer,
                link_id,
                state,
            } => f
                .debug_struct("ConnectionState")
                .field("peer", peer)
                .field("link_id", link_id)
                .field("state", state)
                .finish(),
            Self::RemoteTrack { peer, link_id, .. } => f
                .debug_struct("RemoteTrack")
                .field("peer", peer)
                .field("link_id", link_id)
                .finish_non_exhaustive(),
        }
    }
}

/// Event sink bound to one connection, handed to [`PeerLinkFactory`].
#[derive(Clone)]
pub struct PeerEventSender {
    peer: SessionId,
    link_id: LinkId,
    tx: mpsc::UnboundedSender<PeerEvent>,
}

impl PeerEventSender {
    pub(crate) fn new(peer: SessionId, link_id: LinkId, tx: mpsc::UnboundedSender<PeerEvent>) -> Self {
        Self { peer, link_id, tx }
    }

    pub fn peer(&self) -> &SessionId {
        &self.peer
    }

    pub fn link_id(&self) -> LinkId {
        self.link_id
    }

    /// A local candidate was gathered and must be trickled to the peer.
    pub fn ice_candidate(&self, candidate: IceCandidate) {
        self.send(PeerEvent::Signal(OutboundSignal {
            to: self.peer.clone(),
            link_id: self.link_id,
            message: PeerMessage::IceCandidate(candidate),
        }));
    }

    pub fn connection_state(&self, state: ConnectionState) {
        self.send(PeerEvent::ConnectionState {
            peer: self.peer.clone(),
            link_id: self.link_id,
            state,
        });
    }

    pub fn remote_track(&self, source: Arc<dyn RemoteAudioSource>) {
        self.send(PeerEvent::RemoteTrack {
            peer: self.peer.clone(),
            link_id: self.link_id,
            source,
        });
    }

    fn send(&self, event: PeerEvent) {
        // The receiver only goes away with the manager itself.
        let _ = self.tx.send(event);
    }
}

/// A connection to one remote participant.
#[async_trait]
pub trait PeerLink: Send + Sync {
    fn signaling_state(&self) -> SignalingState;

    async fn create_offer(&self) -> Result<SessionDescription, WebRtcError>;

    async fn create_answer(&self) -> Result<SessionDescription, WebRtcError>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), WebRtcError>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), WebRtcError>;

    async fn has_remote_description(&self) -> bool;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), WebRtcError>;

    /// Attach `track` through a new audio sender. Changes the negotiated
    /// media, so a renegotiation must follow.
    async fn add_audio_track(&self, track: LocalTrack) -> Result<(), WebRtcError>;

    /// Swap the track of the existing audio sender in place; `None` stops
    /// sending without renegotiation.
    async fn replace_audio_track(&self, track: Option<LocalTrack>) -> Result<(), WebRtcError>;

    /// Whether the audio sender currently has a track attached.
    async fn sender_track_attached(&self) -> bool;

    async fn close(&self) -> Result<(), WebRtcError>;
}

/// Builds connections wired to the manager's event channel.
#[async_trait]
pub trait PeerLinkFactory: Send + Sync {
    async fn create_link(
        &self,
        ice_servers: &[IceServer],
        events: PeerEventSender,
    ) -> Result<Arc<dyn PeerLink>, WebRtcError>;
}
