//! Peer Connection Manager
//!
//! Owns one [`PeerLink`] per remote participant together with the local
//! capture handle. All negotiation goes through `&mut self`, so offer
//! creation and mute changes never interleave.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use vc_signaling::{IceCandidate, IceServer, PeerMessage, SessionDescription, SessionId};

use super::{
    ConnectionState, LinkId, LocalTrack, OutboundSignal, PeerEvent, PeerEventSender, PeerLink,
    PeerLinkFactory, SignalingState, WebRtcError,
};
use crate::audio::{CaptureDevice, CaptureHandle};

/// Candidates kept per peer that has no connection yet.
const MAX_EARLY_CANDIDATES: usize = 32;

struct PeerEntry {
    link: Arc<dyn PeerLink>,
    link_id: LinkId,
    /// Whether an audio sender was ever added to this connection.
    has_sender: bool,
    /// Remote candidates received before any remote description.
    pending_candidates: Vec<IceCandidate>,
    renegotiate_when_stable: bool,
}

/// Mesh of peer connections for the current session.
pub struct PeerConnectionManager {
    factory: Arc<dyn PeerLinkFactory>,
    capture_device: CaptureDevice,
    ice_servers: Option<Vec<IceServer>>,
    local_session: Option<SessionId>,
    peers: HashMap<SessionId, PeerEntry>,
    /// Candidates that overtook the offer creating their connection.
    early_candidates: HashMap<SessionId, Vec<IceCandidate>>,
    capture: Option<CaptureHandle>,
    next_link_id: LinkId,
    events_tx: mpsc::UnboundedSender<PeerEvent>,
    events_rx: mpsc::UnboundedReceiver<PeerEvent>,
}

impl PeerConnectionManager {
    pub fn new(factory: Arc<dyn PeerLinkFactory>, capture_device: CaptureDevice) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            factory,
            capture_device,
            ice_servers: None,
            local_session: None,
            peers: HashMap::new(),
            early_candidates: HashMap::new(),
            capture: None,
            next_link_id: 1,
            events_tx,
            events_rx,
        }
    }

    /// Set the ICE servers used for every connection.
    ///
    /// Calling again with the same servers is a no-op. A different set is
    /// rejected with [`WebRtcError::IceServersChanged`].
    pub fn initialize(&mut self, ice_servers: Vec<IceServer>) -> Result<(), WebRtcError> {
        if let Some(current) = &self.ice_servers {
            return if *current == ice_servers {
                Ok(())
            } else {
                Err(WebRtcError::IceServersChanged)
            };
        }
        info!(servers = ice_servers.len(), "Peer connection manager initialized");
        self.ice_servers = Some(ice_servers);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.ice_servers.is_some()
    }

    /// Session id compared against remote ids by the initiator tie-break.
    pub fn set_local_session(&mut self, session_id: SessionId) {
        self.local_session = Some(session_id);
    }

    pub fn local_session(&self) -> Option<&SessionId> {
        self.local_session.as_ref()
    }

    /// Acquire the microphone unless it is already held.
    pub async fn start_local_capture(&mut self) -> Result<(), WebRtcError> {
        if self.capture.is_some() {
            return Ok(());
        }
        self.capture = Some(self.capture_device.acquire().await?);
        Ok(())
    }

    /// Release the microphone. No-op when not capturing.
    pub fn stop_local_capture(&mut self) {
        if let Some(handle) = self.capture.take() {
            handle.release();
        }
    }

    pub fn is_capturing(&self) -> bool {
        self.capture.is_some()
    }

    pub fn capture_device(&self) -> &CaptureDevice {
        &self.capture_device
    }

    /// Existing connection for `peer`, or a new one carrying the live
    /// capture track if there is one.
    pub async fn get_or_create(
        &mut self,
        peer: &SessionId,
    ) -> Result<Arc<dyn PeerLink>, WebRtcError> {
        if let Some(entry) = self.peers.get(peer) {
            return Ok(entry.link.clone());
        }
        let track = self.capture.as_ref().map(CaptureHandle::track);
        self.open_link(peer, track).await
    }

    async fn open_link(
        &mut self,
        peer: &SessionId,
        track: Option<LocalTrack>,
    ) -> Result<Arc<dyn PeerLink>, WebRtcError> {
        let ice_servers = self.ice_servers.clone().ok_or(WebRtcError::NotInitialized)?;
        let link_id = self.next_link_id;
        self.next_link_id += 1;

        let events = PeerEventSender::new(peer.clone(), link_id, self.events_tx.clone());
        let link = self.factory.create_link(&ice_servers, events).await?;

        let has_sender = match track {
            Some(track) => {
                if let Err(e) = link.add_audio_track(track).await {
                    let _ = link.close().await;
                    return Err(e);
                }
                true
            }
            None => false,
        };

        debug!(peer = %peer, link = link_id, has_sender, "Peer connection opened");
        self.peers.insert(
            peer.clone(),
            PeerEntry {
                link: link.clone(),
                link_id,
                has_sender,
                pending_candidates: self.early_candidates.remove(peer).unwrap_or_default(),
                renegotiate_when_stable: false,
            },
        );
        Ok(link)
    }

    /// Offer to `peer` if the local side is the initiator for the pair.
    ///
    /// Returns whether an offer was sent. Nothing happens when `peer` has the
    /// smaller session id or a connection to it is already negotiating or
    /// negotiated. A connection that never saw any description is offered on.
    pub async fn create_offer(&mut self, peer: &SessionId) -> Result<bool, WebRtcError> {
        let local = self.local_session.as_ref().ok_or(WebRtcError::NotInitialized)?;
        if !local.initiates(peer) {
            debug!(peer = %peer, "Waiting for offer from peer");
            return Ok(false);
        }
        if let Some(entry) = self.peers.get(peer) {
            if entry.link.signaling_state() != SignalingState::Stable
                || entry.link.has_remote_description().await
            {
                debug!(peer = %peer, "Connection already exists, not offering");
                return Ok(false);
            }
            debug!(peer = %peer, link = entry.link_id, "Offering on unnegotiated connection");
        }
        self.send_offer(peer).await?;
        Ok(true)
    }

    /// Start a new offer/answer round on an existing connection, or defer it
    /// until the current round settles.
    pub async fn renegotiate(&mut self, peer: &SessionId) -> Result<(), WebRtcError> {
        let entry = self
            .peers
            .get_mut(peer)
            .ok_or_else(|| WebRtcError::PeerNotFound(peer.clone()))?;
        if entry.link.signaling_state() != SignalingState::Stable {
            debug!(peer = %peer, "Negotiation in progress, renegotiating later");
            entry.renegotiate_when_stable = true;
            return Ok(());
        }
        self.send_offer(peer).await
    }

    /// Create, apply and emit an offer. While muted the microphone is held
    /// only for the duration of the offer so the audio m-line is negotiated.
    async fn send_offer(&mut self, peer: &SessionId) -> Result<(), WebRtcError> {
        let temporary = match self.capture {
            Some(_) => None,
            None => Some(self.capture_device.acquire().await?),
        };

        let result = self.negotiate(peer, temporary.as_ref()).await;

        if let Some(handle) = temporary {
            handle.release();
            if let Some(entry) = self.peers.get(peer) {
                if entry.has_sender {
                    if let Err(e) = entry.link.replace_audio_track(None).await {
                        warn!(peer = %peer, "Failed to detach temporary track: {}", e);
                    }
                }
            }
        }
        result
    }

    async fn negotiate(
        &mut self,
        peer: &SessionId,
        temporary: Option<&CaptureHandle>,
    ) -> Result<(), WebRtcError> {
        let track = temporary
            .or(self.capture.as_ref())
            .map(CaptureHandle::track);
        let created = !self.peers.contains_key(peer);

        if created {
            self.open_link(peer, track).await?;
        } else if let Some(entry) = self.peers.get_mut(peer) {
            if let (false, Some(track)) = (entry.has_sender, track) {
                entry.link.add_audio_track(track).await?;
                entry.has_sender = true;
            }
        }
        let (link, link_id) = self
            .peers
            .get(peer)
            .map(|entry| (entry.link.clone(), entry.link_id))
            .ok_or_else(|| WebRtcError::PeerNotFound(peer.clone()))?;

        let offer = async {
            let offer = link.create_offer().await?;
            link.set_local_description(offer.clone()).await?;
            Ok::<_, WebRtcError>(offer)
        }
        .await;

        match offer {
            Ok(offer) => {
                info!(peer = %peer, link = link_id, "Sending offer");
                self.emit(peer, link_id, PeerMessage::Offer(offer));
                Ok(())
            }
            Err(e) => {
                if created {
                    self.remove_peer_connection(peer).await;
                }
                Err(e)
            }
        }
    }

    /// Apply an offer, answer or candidate relayed from `from`.
    pub async fn handle_signal(
        &mut self,
        from: &SessionId,
        message: PeerMessage,
    ) -> Result<(), WebRtcError> {
        match message {
            PeerMessage::Offer(offer) => self.handle_offer(from, offer).await,
            PeerMessage::Answer(answer) => self.handle_answer(from, answer).await,
            PeerMessage::IceCandidate(candidate) => self.handle_candidate(from, candidate).await,
        }
    }

    async fn handle_offer(
        &mut self,
        from: &SessionId,
        offer: SessionDescription,
    ) -> Result<(), WebRtcError> {
        let mut carried = Vec::new();

        if let Some(entry) = self.peers.get(from) {
            if entry.link.signaling_state() == SignalingState::HaveLocalOffer {
                let local = self.local_session.as_ref().ok_or(WebRtcError::NotInitialized)?;
                if local.initiates(from) {
                    debug!(peer = %from, "Offer collision, keeping local offer");
                    return Ok(());
                }
                info!(peer = %from, "Offer collision, answering remote offer on a new connection");
                if let Some(entry) = self.peers.get_mut(from) {
                    carried = std::mem::take(&mut entry.pending_candidates);
                }
                self.remove_peer_connection(from).await;
            }
        }

        let created = !self.peers.contains_key(from);
        let link = self.get_or_create(from).await?;
        if let Some(entry) = self.peers.get_mut(from) {
            entry.pending_candidates.extend(carried);
        }

        let answered = async {
            link.set_remote_description(offer).await?;
            self.flush_candidates(from).await;
            let answer = link.create_answer().await?;
            link.set_local_description(answer.clone()).await?;
            Ok::<_, WebRtcError>(answer)
        }
        .await;

        match answered {
            Ok(answer) => {
                if let Some(link_id) = self.current_link_id(from) {
                    info!(peer = %from, link = link_id, "Sending answer");
                    self.emit(from, link_id, PeerMessage::Answer(answer));
                }
                self.after_stable(from).await;
                Ok(())
            }
            Err(e) => {
                if created {
                    self.remove_peer_connection(from).await;
                }
                Err(e)
            }
        }
    }

    async fn handle_answer(
        &mut self,
        from: &SessionId,
        answer: SessionDescription,
    ) -> Result<(), WebRtcError> {
        let Some(entry) = self.peers.get(from) else {
            debug!(peer = %from, "Ignoring answer for unknown peer");
            return Ok(());
        };
        let state = entry.link.signaling_state();
        if state != SignalingState::HaveLocalOffer {
            debug!(peer = %from, ?state, "Ignoring answer without pending offer");
            return Ok(());
        }

        entry.link.clone().set_remote_description(answer).await?;
        debug!(peer = %from, "Answer applied");
        self.flush_candidates(from).await;
        self.after_stable(from).await;
        Ok(())
    }

    async fn handle_candidate(
        &mut self,
        from: &SessionId,
        candidate: IceCandidate,
    ) -> Result<(), WebRtcError> {
        if !candidate.is_present() {
            debug!(peer = %from, "End of remote candidates");
            return Ok(());
        }

        let Some(entry) = self.peers.get_mut(from) else {
            // Only offers open connections; keep the candidate for the
            // offer that may still be on its way.
            let early = self.early_candidates.entry(from.clone()).or_default();
            if early.len() < MAX_EARLY_CANDIDATES {
                early.push(candidate);
                debug!(peer = %from, buffered = early.len(), "Buffered ICE candidate without connection");
            } else {
                debug!(peer = %from, "Dropping ICE candidate without connection");
            }
            return Ok(());
        };
        if !entry.link.has_remote_description().await {
            entry.pending_candidates.push(candidate);
            debug!(peer = %from, buffered = entry.pending_candidates.len(), "Buffered ICE candidate");
            return Ok(());
        }
        entry.link.add_ice_candidate(candidate).await
    }

    async fn flush_candidates(&mut self, peer: &SessionId) {
        let Some(entry) = self.peers.get_mut(peer) else {
            return;
        };
        let pending = std::mem::take(&mut entry.pending_candidates);
        if pending.is_empty() {
            return;
        }
        debug!(peer = %peer, count = pending.len(), "Applying buffered ICE candidates");
        for candidate in pending {
            if let Err(e) = entry.link.add_ice_candidate(candidate).await {
                warn!(peer = %peer, "Failed to apply buffered ICE candidate: {}", e);
            }
        }
    }

    async fn after_stable(&mut self, peer: &SessionId) {
        let Some(entry) = self.peers.get_mut(peer) else {
            return;
        };
        if !entry.renegotiate_when_stable || entry.link.signaling_state() != SignalingState::Stable {
            return;
        }
        entry.renegotiate_when_stable = false;
        if let Err(e) = self.send_offer(peer).await {
            warn!(peer = %peer, "Deferred renegotiation failed: {}", e);
        }
    }

    /// Release or reacquire the microphone and update every sender.
    ///
    /// Unmuting fails if the microphone cannot be acquired. Connections that
    /// never had a sender get one added and renegotiate.
    pub async fn set_muted(&mut self, muted: bool) -> Result<(), WebRtcError> {
        if muted {
            self.stop_local_capture();
            for (peer, entry) in &self.peers {
                if !entry.has_sender {
                    continue;
                }
                if let Err(e) = entry.link.replace_audio_track(None).await {
                    warn!(peer = %peer, "Failed to detach audio track: {}", e);
                }
            }
            return Ok(());
        }

        self.start_local_capture().await?;
        let Some(track) = self.capture.as_ref().map(CaptureHandle::track) else {
            return Ok(());
        };

        let mut renegotiate = Vec::new();
        for (peer, entry) in &mut self.peers {
            if entry.has_sender {
                if let Err(e) = entry.link.replace_audio_track(Some(track.clone())).await {
                    warn!(peer = %peer, "Failed to attach audio track: {}", e);
                }
                continue;
            }
            match entry.link.add_audio_track(track.clone()).await {
                Ok(()) => {
                    entry.has_sender = true;
                    renegotiate.push(peer.clone());
                }
                Err(e) => warn!(peer = %peer, "Failed to add audio track: {}", e),
            }
        }

        for peer in renegotiate {
            if let Err(e) = self.renegotiate(&peer).await {
                warn!(peer = %peer, "Renegotiation failed: {}", e);
            }
        }
        Ok(())
    }

    /// Close and forget the connection to `peer`. Returns whether one existed.
    pub async fn remove_peer_connection(&mut self, peer: &SessionId) -> bool {
        self.early_candidates.remove(peer);
        let Some(entry) = self.peers.remove(peer) else {
            return false;
        };
        if let Err(e) = entry.link.close().await {
            warn!(peer = %peer, "Failed to close peer connection: {}", e);
        }
        debug!(peer = %peer, link = entry.link_id, "Peer connection removed");
        true
    }

    /// Apply a state change from the connection `link_id`. Terminal states
    /// remove the connection; returns whether it was removed.
    pub async fn handle_connection_state(
        &mut self,
        peer: &SessionId,
        link_id: LinkId,
        state: ConnectionState,
    ) -> bool {
        if !self.is_current_link(peer, link_id) {
            return false;
        }
        if !state.is_terminal() {
            debug!(peer = %peer, ?state, "Peer connection state");
            return false;
        }
        info!(peer = %peer, ?state, "Peer connection lost");
        self.remove_peer_connection(peer).await
    }

    pub fn is_current_link(&self, peer: &SessionId, link_id: LinkId) -> bool {
        self.current_link_id(peer) == Some(link_id)
    }

    pub fn current_link_id(&self, peer: &SessionId) -> Option<LinkId> {
        self.peers.get(peer).map(|entry| entry.link_id)
    }

    /// Close every connection and release the microphone. ICE servers are
    /// kept.
    pub async fn cleanup(&mut self) {
        for (peer, entry) in self.peers.drain() {
            if let Err(e) = entry.link.close().await {
                warn!(peer = %peer, "Failed to close peer connection: {}", e);
            }
        }
        self.early_candidates.clear();
        self.stop_local_capture();
        self.local_session = None;
        while self.events_rx.try_recv().is_ok() {}
        debug!("Peer connections cleaned up");
    }

    fn emit(&self, to: &SessionId, link_id: LinkId, message: PeerMessage) {
        let _ = self.events_tx.send(PeerEvent::Signal(OutboundSignal {
            to: to.clone(),
            link_id,
            message,
        }));
    }

    /// Next event from any connection.
    pub async fn next_event(&mut self) -> Option<PeerEvent> {
        self.events_rx.recv().await
    }

    pub fn try_next_event(&mut self) -> Option<PeerEvent> {
        self.events_rx.try_recv().ok()
    }

    pub fn connection_count(&self) -> usize {
        self.peers.len()
    }

    pub fn has_connection(&self, peer: &SessionId) -> bool {
        self.peers.contains_key(peer)
    }

    pub fn peers(&self) -> impl Iterator<Item = &SessionId> {
        self.peers.keys()
    }

    pub fn signaling_state(&self, peer: &SessionId) -> Option<SignalingState> {
        self.peers.get(peer).map(|entry| entry.link.signaling_state())
    }

    pub fn has_sender(&self, peer: &SessionId) -> bool {
        self.peers.get(peer).is_some_and(|entry| entry.has_sender)
    }

    pub async fn sender_track_attached(&self, peer: &SessionId) -> bool {
        match self.peers.get(peer) {
            Some(entry) if entry.has_sender => entry.link.sender_track_attached().await,
            _ => false,
        }
    }
}
