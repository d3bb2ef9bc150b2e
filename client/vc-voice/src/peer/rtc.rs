//! webrtc-rs Peer Links

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use vc_signaling::{IceCandidate, IceServer, SdpKind, SessionDescription};
use webrtc::{
    api::{
        interceptor_registry::register_default_interceptors, media_engine::MediaEngine, APIBuilder,
        API,
    },
    ice_transport::{
        ice_candidate::{RTCIceCandidate, RTCIceCandidateInit},
        ice_server::RTCIceServer,
    },
    interceptor::registry::Registry,
    peer_connection::{
        configuration::RTCConfiguration,
        peer_connection_state::RTCPeerConnectionState,
        sdp::{sdp_type::RTCSdpType, session_description::RTCSessionDescription},
        signaling_state::RTCSignalingState,
        RTCPeerConnection,
    },
    rtp_transceiver::{
        rtp_codec::{RTCRtpCodecParameters, RTPCodecType},
        rtp_sender::RTCRtpSender,
    },
    track::track_remote::TrackRemote,
};

use super::{
    ConnectionState, LocalTrack, PeerEventSender, PeerLink, PeerLinkFactory, SignalingState,
    WebRtcError,
};
use crate::audio::{opus_capability, RemoteAudioSource};

/// Dynamic payload type used for Opus.
const OPUS_PAYLOAD_TYPE: u8 = 111;

/// Builds [`RtcPeerLink`]s from a shared webrtc-rs API instance.
pub struct RtcPeerLinkFactory {
    api: Arc<API>,
}

impl RtcPeerLinkFactory {
    pub fn new() -> Result<Self, WebRtcError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_codec(
                RTCRtpCodecParameters {
                    capability: opus_capability(),
                    payload_type: OPUS_PAYLOAD_TYPE,
                    ..Default::default()
                },
                RTPCodecType::Audio,
            )
            .map_err(|e| WebRtcError::ApiError(e.to_string()))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| WebRtcError::ApiError(e.to_string()))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        info!("WebRTC API initialized");

        Ok(Self { api: Arc::new(api) })
    }

    fn create_rtc_config(ice_servers: &[IceServer]) -> RTCConfiguration {
        let ice_servers: Vec<RTCIceServer> = ice_servers
            .iter()
            .map(|s| RTCIceServer {
                urls: s.urls.clone(),
                username: s.username.clone().unwrap_or_default(),
                credential: s.credential.clone().unwrap_or_default(),
                ..Default::default()
            })
            .collect();

        RTCConfiguration {
            ice_servers,
            ..Default::default()
        }
    }

    fn install_handlers(pc: &RTCPeerConnection, events: &PeerEventSender) {
        let ice_events = events.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let events = ice_events.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => events.ice_candidate(IceCandidate {
                        candidate: init.candidate,
                        sdp_mid: init.sdp_mid,
                        sdp_mline_index: init.sdp_mline_index,
                        username_fragment: init.username_fragment,
                    }),
                    Err(e) => warn!(peer = %events.peer(), "Failed to encode ICE candidate: {}", e),
                }
            })
        }));

        let state_events = events.clone();
        pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
            let events = state_events.clone();
            Box::pin(async move {
                let state = match s {
                    RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
                    RTCPeerConnectionState::Connected => ConnectionState::Connected,
                    RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
                    RTCPeerConnectionState::Failed => ConnectionState::Failed,
                    RTCPeerConnectionState::Closed => ConnectionState::Closed,
                    _ => ConnectionState::New,
                };
                debug!(peer = %events.peer(), link = events.link_id(), "Peer connection state changed: {:?}", s);
                events.connection_state(state);
            })
        }));

        let track_events = events.clone();
        pc.on_track(Box::new(
            move |track: Arc<TrackRemote>, _receiver, _transceiver| {
                let events = track_events.clone();
                Box::pin(async move {
                    info!(
                        peer = %events.peer(),
                        "Remote track received: {} ({})",
                        track.kind(),
                        track.codec().capability.mime_type
                    );
                    if track.kind() == RTPCodecType::Audio {
                        events.remote_track(track as Arc<dyn RemoteAudioSource>);
                    }
                })
            },
        ));
    }
}

#[async_trait]
impl PeerLinkFactory for RtcPeerLinkFactory {
    async fn create_link(
        &self,
        ice_servers: &[IceServer],
        events: PeerEventSender,
    ) -> Result<Arc<dyn PeerLink>, WebRtcError> {
        let config = Self::create_rtc_config(ice_servers);
        let pc = self
            .api
            .new_peer_connection(config)
            .await
            .map_err(|e| WebRtcError::PeerConnectionError(e.to_string()))?;

        Self::install_handlers(&pc, &events);
        debug!(peer = %events.peer(), link = events.link_id(), "Peer connection created");

        Ok(Arc::new(RtcPeerLink {
            pc: Arc::new(pc),
            audio_sender: RwLock::new(None),
        }))
    }
}

/// A live `RTCPeerConnection` with at most one outgoing audio sender.
pub struct RtcPeerLink {
    pc: Arc<RTCPeerConnection>,
    audio_sender: RwLock<Option<Arc<RTCRtpSender>>>,
}

impl RtcPeerLink {
    async fn sender(&self) -> Result<Arc<RTCRtpSender>, WebRtcError> {
        self.audio_sender
            .read()
            .await
            .clone()
            .ok_or_else(|| WebRtcError::TrackError("no audio sender".to_string()))
    }
}

fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription, WebRtcError> {
    match desc.kind {
        SdpKind::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpKind::Answer => RTCSessionDescription::answer(desc.sdp),
    }
    .map_err(|e| WebRtcError::SdpError(e.to_string()))
}

fn from_rtc(desc: RTCSessionDescription) -> Result<SessionDescription, WebRtcError> {
    match desc.sdp_type {
        RTCSdpType::Offer => Ok(SessionDescription::offer(desc.sdp)),
        RTCSdpType::Answer => Ok(SessionDescription::answer(desc.sdp)),
        other => Err(WebRtcError::SdpError(format!(
            "unexpected description type {other}"
        ))),
    }
}

#[async_trait]
impl PeerLink for RtcPeerLink {
    fn signaling_state(&self) -> SignalingState {
        match self.pc.signaling_state() {
            RTCSignalingState::HaveLocalOffer | RTCSignalingState::HaveLocalPranswer => {
                SignalingState::HaveLocalOffer
            }
            RTCSignalingState::HaveRemoteOffer | RTCSignalingState::HaveRemotePranswer => {
                SignalingState::HaveRemoteOffer
            }
            RTCSignalingState::Closed => SignalingState::Closed,
            _ => SignalingState::Stable,
        }
    }

    async fn create_offer(&self) -> Result<SessionDescription, WebRtcError> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| WebRtcError::SdpError(e.to_string()))?;
        from_rtc(offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription, WebRtcError> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| WebRtcError::SdpError(e.to_string()))?;
        from_rtc(answer)
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), WebRtcError> {
        self.pc
            .set_local_description(to_rtc(desc)?)
            .await
            .map_err(|e| WebRtcError::SdpError(e.to_string()))?;
        debug!("Local description set");
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), WebRtcError> {
        self.pc
            .set_remote_description(to_rtc(desc)?)
            .await
            .map_err(|e| WebRtcError::SdpError(e.to_string()))?;
        debug!("Remote description set");
        Ok(())
    }

    async fn has_remote_description(&self) -> bool {
        self.pc.remote_description().await.is_some()
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), WebRtcError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| WebRtcError::IceError(e.to_string()))?;
        debug!("ICE candidate added");
        Ok(())
    }

    async fn add_audio_track(&self, track: LocalTrack) -> Result<(), WebRtcError> {
        let mut slot = self.audio_sender.write().await;
        if let Some(sender) = slot.as_ref() {
            return sender
                .replace_track(Some(track))
                .await
                .map_err(|e| WebRtcError::TrackError(e.to_string()));
        }

        let sender = self
            .pc
            .add_track(track)
            .await
            .map_err(|e| WebRtcError::TrackError(e.to_string()))?;

        // Incoming RTCP must be drained for the interceptors to run.
        let rtcp_sender = sender.clone();
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while rtcp_sender.read(&mut rtcp_buf).await.is_ok() {}
        });

        *slot = Some(sender);
        Ok(())
    }

    async fn replace_audio_track(&self, track: Option<LocalTrack>) -> Result<(), WebRtcError> {
        self.sender()
            .await?
            .replace_track(track)
            .await
            .map_err(|e| WebRtcError::TrackError(e.to_string()))
    }

    async fn sender_track_attached(&self) -> bool {
        match self.sender().await {
            Ok(sender) => sender.track().await.is_some(),
            Err(_) => false,
        }
    }

    async fn close(&self) -> Result<(), WebRtcError> {
        self.pc
            .close()
            .await
            .map_err(|e| WebRtcError::PeerConnectionError(e.to_string()))
    }
}
