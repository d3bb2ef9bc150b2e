//! Voice Chat Coordinator
//!
//! Session-level state machine: `Idle -> Joining -> Active -> Leaving -> Idle`.
//! Roster signals are handled here, peer signals are handed to the
//! [`PeerConnectionManager`], and everything the manager produces is relayed
//! back out through the [`SignalingTransport`].

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use vc_signaling::{
    GroupId, InboundSignal, Participant, PeerMessage, SessionId, Signal, SignalRequest,
    VoiceChatConfiguration,
};

use super::{SessionState, VoiceError, VoiceEvent};
use crate::audio::{GainControls, NoopPlatformAudio, PlatformAudio, PlaybackFrame, RemoteSink};
use crate::config::VoiceConfig;
use crate::network::SignalingTransport;
use crate::peer::{PeerConnectionManager, PeerEvent};

/// Frames buffered between remote sinks and the audio output.
const PLAYBACK_CAPACITY: usize = 256;

struct Membership {
    group_id: GroupId,
    self_id: SessionId,
    participants: Vec<Participant>,
}

/// Point-in-time view of the session for UI and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceSnapshot {
    pub state: SessionState,
    pub group_id: Option<GroupId>,
    pub self_id: Option<SessionId>,
    pub participants: Vec<Participant>,
    pub is_muted: bool,
    pub remote_streams: usize,
    pub connections: usize,
}

/// Voice chat for one local user.
pub struct VoiceChatCoordinator {
    transport: Arc<dyn SignalingTransport>,
    platform: Arc<dyn PlatformAudio>,
    peers: PeerConnectionManager,
    config: VoiceConfig,
    /// Fetched on first join and kept for the lifetime of the coordinator.
    configuration: Option<VoiceChatConfiguration>,
    state: SessionState,
    membership: Option<Membership>,
    muted: bool,
    gains: GainControls,
    sinks: HashMap<SessionId, RemoteSink>,
    events: broadcast::Sender<VoiceEvent>,
    playback_tx: mpsc::Sender<PlaybackFrame>,
    playback_rx: Option<mpsc::Receiver<PlaybackFrame>>,
}

impl VoiceChatCoordinator {
    pub fn new(
        transport: Arc<dyn SignalingTransport>,
        peers: PeerConnectionManager,
        config: &VoiceConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let (playback_tx, playback_rx) = mpsc::channel(PLAYBACK_CAPACITY);

        Self {
            transport,
            platform: Arc::new(NoopPlatformAudio),
            peers,
            config: config.clone(),
            configuration: None,
            state: SessionState::Idle,
            membership: None,
            muted: config.start_muted,
            gains: GainControls::new(config.media_volume, config.voice_volume),
            sinks: HashMap::new(),
            events,
            playback_tx,
            playback_rx: Some(playback_rx),
        }
    }

    /// Use a native audio-session bridge instead of the no-op default.
    #[must_use]
    pub fn with_platform(mut self, platform: Arc<dyn PlatformAudio>) -> Self {
        self.platform = platform;
        self
    }

    /// Join the voice chat of `group_id`.
    ///
    /// Joining the group that is already active succeeds without doing
    /// anything; any other group fails with [`VoiceError::AlreadyInGroup`].
    /// On failure every partial step is undone and the state is `Idle`.
    pub async fn join(&mut self, group_id: GroupId) -> Result<(), VoiceError> {
        match self.state {
            SessionState::Active => {
                let current = self.group_id().cloned();
                return match current {
                    Some(current) if current == group_id => {
                        debug!(group_id = %group_id, "Already in this voice chat");
                        Ok(())
                    }
                    Some(current) => Err(VoiceError::AlreadyInGroup { current }),
                    None => Err(VoiceError::SessionClosed),
                };
            }
            SessionState::Joining | SessionState::Leaving => {
                warn!(state = ?self.state, "Recovering from interrupted transition");
                self.teardown(true).await;
            }
            SessionState::Idle => {}
        }

        info!(group_id = %group_id, muted = self.muted, "Joining voice chat");
        self.state = SessionState::Joining;

        if let Err(e) = self.try_join(group_id).await {
            warn!("Failed to join voice chat: {}", e);
            self.teardown(true).await;
            return Err(e);
        }
        self.process_pending_events().await;
        Ok(())
    }

    async fn try_join(&mut self, group_id: GroupId) -> Result<(), VoiceError> {
        let configuration = match &self.configuration {
            Some(configuration) => configuration.clone(),
            None => {
                let configuration = self.transport.get_configuration().await?;
                self.configuration = Some(configuration.clone());
                configuration
            }
        };
        let ice_servers = self
            .config
            .ice_servers_or_fallback(configuration.ice_servers);
        self.peers.initialize(ice_servers)?;

        if self.platform.is_supported() {
            if let Err(e) = self.platform.configure_session().await {
                warn!("Failed to configure audio session: {}", e);
            }
        }

        if !self.muted {
            self.peers.start_local_capture().await?;
        }

        let joined = self.transport.join(&group_id).await?;
        let self_id = joined.self_session_id.clone();
        let others: Vec<SessionId> = joined.others().map(|p| p.session_id.clone()).collect();
        self.peers.set_local_session(self_id.clone());
        self.membership = Some(Membership {
            group_id: group_id.clone(),
            self_id: self_id.clone(),
            participants: joined.participants.clone(),
        });

        if self.muted {
            if let Err(e) = self.transport.update_mute_status(&group_id, true).await {
                warn!(group_id = %group_id, "Failed to announce mute status: {}", e);
            }
        }

        for peer in &others {
            self.peers.create_offer(peer).await?;
        }

        self.state = SessionState::Active;
        info!(
            group_id = %group_id,
            session_id = %self_id,
            participants = joined.participants.len(),
            "Joined voice chat"
        );
        self.emit(VoiceEvent::Joined {
            group_id,
            participants: joined.participants,
        });
        Ok(())
    }

    /// Leave the current group. Safe to call in any state.
    pub async fn leave(&mut self) {
        if self.state == SessionState::Idle {
            return;
        }
        self.state = SessionState::Leaving;
        if let Some(group_id) = self.teardown(true).await {
            info!(group_id = %group_id, "Left voice chat");
            self.emit(VoiceEvent::Left { group_id });
        }
    }

    /// The push channel is gone; drop the membership without calling the
    /// relay.
    pub async fn transport_lost(&mut self) {
        if self.state == SessionState::Idle {
            return;
        }
        warn!("Signaling transport lost, leaving voice chat");
        self.state = SessionState::Leaving;
        if let Some(group_id) = self.teardown(false).await {
            self.emit(VoiceEvent::Left { group_id });
        }
    }

    /// Release everything and return to `Idle`. Individual failures are
    /// logged; the transition always completes.
    async fn teardown(&mut self, send_leave: bool) -> Option<GroupId> {
        let membership = self.membership.take();
        if let (true, Some(m)) = (send_leave, &membership) {
            if let Err(e) = self.transport.leave(&m.group_id).await {
                warn!(group_id = %m.group_id, "Leave request failed: {}", e);
            }
        }

        self.sinks.clear();
        self.gains.forget_all();
        self.peers.cleanup().await;
        if self.platform.is_supported() {
            self.platform.restore_session();
        }
        self.state = SessionState::Idle;
        debug!("Voice chat cleaned up");

        membership.map(|m| m.group_id)
    }

    /// Whether `signal` is meant for the active membership.
    fn accepts(&self, signal: &Signal) -> bool {
        if self.state != SessionState::Active {
            return false;
        }
        let Some(m) = &self.membership else {
            return false;
        };
        if signal.group_id != m.group_id || signal.from_session_id == m.self_id {
            return false;
        }
        signal
            .to_session_id
            .as_ref()
            .map_or(true, |to| *to == m.self_id)
    }

    /// Dispatch a signal from the push channel. Signals for another group,
    /// from self or addressed elsewhere are ignored.
    pub async fn handle_signal(&mut self, signal: Signal) {
        if !self.accepts(&signal) {
            debug!(
                group_id = %signal.group_id,
                from = %signal.from_session_id,
                "Ignoring signal {:?}",
                signal.signal_type
            );
            return;
        }

        let decoded = match signal.decode() {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(from = %signal.from_session_id, "Dropping signal: {}", e);
                return;
            }
        };
        debug!(from = %signal.from_session_id, "Received {:?}", signal.signal_type);

        let from = signal.from_session_id;
        match decoded {
            InboundSignal::UserJoined(participant) => self.on_user_joined(participant).await,
            InboundSignal::UserLeft(participant) => self.on_user_left(participant).await,
            InboundSignal::MuteChanged(participant) => self.on_mute_changed(participant),
            InboundSignal::Offer(offer) => self.forward(&from, PeerMessage::Offer(offer)).await,
            InboundSignal::Answer(answer) => {
                self.forward(&from, PeerMessage::Answer(answer)).await;
            }
            InboundSignal::IceCandidate(candidate) => {
                self.forward(&from, PeerMessage::IceCandidate(candidate))
                    .await;
            }
        }
        self.process_pending_events().await;
    }

    /// Hand a peer signal to the mesh. Senders outside the roster have left
    /// or never joined, so their signals are dropped.
    async fn forward(&mut self, from: &SessionId, message: PeerMessage) {
        let signal_type = message.signal_type();
        if !self.is_participant(from) {
            debug!(peer = %from, "Ignoring {:?} from peer outside the roster", signal_type);
            return;
        }
        if let Err(e) = self.peers.handle_signal(from, message).await {
            warn!(peer = %from, "Failed to apply {:?}: {}", signal_type, e);
        }
    }

    fn is_participant(&self, session_id: &SessionId) -> bool {
        self.participants()
            .iter()
            .any(|p| p.session_id == *session_id)
    }

    async fn on_user_joined(&mut self, participant: Participant) {
        let Some(m) = self.membership.as_mut() else {
            return;
        };
        if participant.session_id == m.self_id {
            return;
        }
        if m.participants
            .iter()
            .any(|p| p.session_id == participant.session_id)
        {
            debug!(session_id = %participant.session_id, "Duplicate join announcement");
        } else {
            info!(session_id = %participant.session_id, user = %participant.user_name, "User joined voice chat");
            m.participants.push(participant.clone());
            self.emit(VoiceEvent::UserJoined {
                participant: participant.clone(),
            });
        }

        if let Err(e) = self.peers.create_offer(&participant.session_id).await {
            warn!(peer = %participant.session_id, "Failed to offer: {}", e);
        }
    }

    async fn on_user_left(&mut self, participant: Participant) {
        if let Some(m) = self.membership.as_mut() {
            m.participants
                .retain(|p| p.session_id != participant.session_id);
        }
        self.peers
            .remove_peer_connection(&participant.session_id)
            .await;
        self.sinks.remove(&participant.session_id);
        self.gains.forget(&participant.session_id);

        info!(session_id = %participant.session_id, user = %participant.user_name, "User left voice chat");
        self.emit(VoiceEvent::UserLeft { participant });
    }

    fn on_mute_changed(&mut self, participant: Participant) {
        let Some(m) = self.membership.as_mut() else {
            return;
        };
        let Some(existing) = m
            .participants
            .iter_mut()
            .find(|p| p.session_id == participant.session_id)
        else {
            debug!(session_id = %participant.session_id, "Mute change for unknown participant");
            return;
        };
        existing.is_muted = participant.is_muted;
        self.emit(VoiceEvent::MuteChanged { participant });
    }

    /// Flip the local mute flag. Returns the new flag.
    ///
    /// Unmuting fails, and the flag stays set, when the microphone cannot be
    /// acquired. The relay is notified best-effort.
    pub async fn toggle_mute(&mut self) -> Result<bool, VoiceError> {
        let muted = !self.muted;

        if self.state == SessionState::Active {
            self.peers.set_muted(muted).await?;
        }
        self.muted = muted;
        info!(muted, "Local mute changed");

        if let Some(m) = self.membership.as_mut() {
            let self_id = m.self_id.clone();
            if let Some(me) = m.participants.iter_mut().find(|p| p.session_id == self_id) {
                me.is_muted = muted;
            }
            let group_id = m.group_id.clone();
            if let Err(e) = self.transport.update_mute_status(&group_id, muted).await {
                warn!(group_id = %group_id, "Failed to update mute status: {}", e);
            }
        }

        self.emit(VoiceEvent::LocalMute { is_muted: muted });
        self.process_pending_events().await;
        Ok(muted)
    }

    /// Media playback volume, passed on to the platform audio session.
    pub fn set_media_volume(&mut self, level: f32) -> f32 {
        let level = self.gains.set_media_volume(level);
        if self.platform.is_supported() {
            self.platform.set_media_volume(level);
        }
        level
    }

    pub fn set_voice_chat_volume(&mut self, level: f32) -> f32 {
        self.gains.set_voice_volume(level)
    }

    pub fn set_remote_volume(&mut self, session_id: &SessionId, level: f32) -> f32 {
        self.gains.set_remote_volume(session_id, level)
    }

    /// Act on one event from the peer mesh.
    pub async fn handle_peer_event(&mut self, event: PeerEvent) {
        match event {
            PeerEvent::Signal(outbound) => {
                if !self.peers.is_current_link(&outbound.to, outbound.link_id) {
                    debug!(peer = %outbound.to, "Dropping signal from replaced connection");
                    return;
                }
                let Some(m) = &self.membership else {
                    return;
                };
                let request =
                    match SignalRequest::to_peer(m.group_id.clone(), outbound.to.clone(), &outbound.message) {
                        Ok(request) => request,
                        Err(e) => {
                            warn!(peer = %outbound.to, "Failed to encode signal: {}", e);
                            return;
                        }
                    };
                if let Err(e) = self.transport.send_signal(&request).await {
                    warn!(peer = %outbound.to, "Failed to relay {:?}: {}", request.signal_type, e);
                }
            }
            PeerEvent::ConnectionState {
                peer,
                link_id,
                state,
            } => {
                if self
                    .peers
                    .handle_connection_state(&peer, link_id, state)
                    .await
                {
                    self.sinks.remove(&peer);
                }
            }
            PeerEvent::RemoteTrack {
                peer,
                link_id,
                source,
            } => {
                if !self.peers.is_current_link(&peer, link_id) {
                    return;
                }
                let sink = RemoteSink::spawn(
                    peer.clone(),
                    source,
                    self.gains.voice(),
                    self.gains.remote(&peer),
                    self.playback_tx.clone(),
                );
                self.sinks.insert(peer.clone(), sink);
                info!(session_id = %peer, "Remote stream started");
                self.emit(VoiceEvent::RemoteStream { session_id: peer });
            }
        }
    }

    /// Wait for the next peer mesh event.
    pub async fn next_peer_event(&mut self) -> Option<PeerEvent> {
        self.peers.next_event().await
    }

    /// Handle every peer event that is already queued.
    pub async fn process_pending_events(&mut self) {
        while let Some(event) = self.peers.try_next_event() {
            self.handle_peer_event(event).await;
        }
    }

    fn emit(&self, event: VoiceEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<VoiceEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> broadcast::Sender<VoiceEvent> {
        self.events.clone()
    }

    /// Receiver of decoded remote audio. Can be taken once.
    pub fn take_playback_frames(&mut self) -> Option<mpsc::Receiver<PlaybackFrame>> {
        self.playback_rx.take()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn group_id(&self) -> Option<&GroupId> {
        self.membership.as_ref().map(|m| &m.group_id)
    }

    pub fn self_session_id(&self) -> Option<&SessionId> {
        self.membership.as_ref().map(|m| &m.self_id)
    }

    pub fn participants(&self) -> &[Participant] {
        self.membership
            .as_ref()
            .map_or(&[], |m| m.participants.as_slice())
    }

    pub fn peers(&self) -> &PeerConnectionManager {
        &self.peers
    }

    pub fn gains(&self) -> &GainControls {
        &self.gains
    }

    pub fn remote_stream_count(&self) -> usize {
        self.sinks.len()
    }

    pub fn snapshot(&self) -> VoiceSnapshot {
        VoiceSnapshot {
            state: self.state,
            group_id: self.group_id().cloned(),
            self_id: self.self_session_id().cloned(),
            participants: self.participants().to_vec(),
            is_muted: self.muted,
            remote_streams: self.sinks.len(),
            connections: self.peers.connection_count(),
        }
    }
}
