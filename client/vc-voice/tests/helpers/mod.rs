//! Reusable test helpers for voice mesh integration tests.
//!
//! Provides [`FakeLinkFactory`], a `PeerLink` implementation that models the
//! offer/answer state machine without any networking, a counting microphone,
//! and [`Mesh`], which drives several coordinators over one loopback hub
//! until no signal is left in flight.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use vc_signaling::{
    GroupId, IceCandidate, IceServer, JoinResponse, PeerMessage, SdpKind, SessionDescription,
    SessionId, Signal, SignalRequest, SignalType, VoiceChatConfiguration,
};
use vc_voice::audio::{
    AudioError, AudioInput, CaptureDevice, PlatformAudio, RemoteAudioSource, SilenceInput,
};
use vc_voice::peer::{
    ConnectionState, LocalTrack, OutboundSignal, PeerEvent, PeerEventSender, PeerLink,
    PeerLinkFactory, SignalingState,
};
use vc_voice::{
    LoopbackHub, PeerConnectionManager, SignalingTransport, TransportError, VoiceChatCoordinator,
    VoiceConfig, WebRtcError,
};

// ============================================================================
// Fake peer links
// ============================================================================

#[derive(Default)]
struct LinkState {
    signaling: Option<SignalingState>,
    has_remote: bool,
    /// `None` until a sender exists; then the attached track, if any.
    sender: Option<Option<LocalTrack>>,
    applied_candidates: Vec<IceCandidate>,
    closed: bool,
}

/// In-memory connection following the offer/answer rules.
pub struct FakeLink {
    events: PeerEventSender,
    offers: Arc<AtomicUsize>,
    state: Mutex<LinkState>,
}

impl FakeLink {
    fn new(events: PeerEventSender, offers: Arc<AtomicUsize>) -> Self {
        Self {
            events,
            offers,
            state: Mutex::new(LinkState::default()),
        }
    }

    pub fn peer(&self) -> &SessionId {
        self.events.peer()
    }

    pub fn link_id(&self) -> u64 {
        self.events.link_id()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    pub fn applied_candidates(&self) -> usize {
        self.state.lock().unwrap().applied_candidates.len()
    }

    /// Report a connection state, as ICE would.
    pub fn report(&self, state: ConnectionState) {
        self.events.connection_state(state);
    }

    fn current(state: &LinkState) -> SignalingState {
        state.signaling.unwrap_or(SignalingState::Stable)
    }

    fn check_open(state: &LinkState) -> Result<(), WebRtcError> {
        if state.closed {
            Err(WebRtcError::PeerConnectionError("closed".to_string()))
        } else {
            Ok(())
        }
    }

    fn settled(&self) {
        self.events.remote_track(Arc::new(SilentSource));
    }
}

#[async_trait]
impl PeerLink for FakeLink {
    fn signaling_state(&self) -> SignalingState {
        let state = self.state.lock().unwrap();
        if state.closed {
            SignalingState::Closed
        } else {
            Self::current(&state)
        }
    }

    async fn create_offer(&self) -> Result<SessionDescription, WebRtcError> {
        let state = self.state.lock().unwrap();
        Self::check_open(&state)?;
        self.offers.fetch_add(1, Ordering::SeqCst);
        let audio = state.sender.is_some();
        Ok(SessionDescription::offer(format!("fake offer audio={audio}")))
    }

    async fn create_answer(&self) -> Result<SessionDescription, WebRtcError> {
        let state = self.state.lock().unwrap();
        Self::check_open(&state)?;
        if Self::current(&state) != SignalingState::HaveRemoteOffer {
            return Err(WebRtcError::SdpError("no remote offer".to_string()));
        }
        Ok(SessionDescription::answer("fake answer"))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), WebRtcError> {
        let settled = {
            let mut state = self.state.lock().unwrap();
            Self::check_open(&state)?;
            match (desc.kind, Self::current(&state)) {
                (SdpKind::Offer, SignalingState::Stable) => {
                    state.signaling = Some(SignalingState::HaveLocalOffer);
                    false
                }
                (SdpKind::Answer, SignalingState::HaveRemoteOffer) => {
                    state.signaling = Some(SignalingState::Stable);
                    true
                }
                (kind, current) => {
                    return Err(WebRtcError::SdpError(format!(
                        "local {kind:?} in {current:?}"
                    )))
                }
            }
        };

        // Gathering starts once a local description exists.
        self.events.ice_candidate(IceCandidate {
            candidate: format!("candidate:{} 1 udp 1 127.0.0.1 9 typ host", self.link_id()),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        });
        if settled {
            self.settled();
        }
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), WebRtcError> {
        let settled = {
            let mut state = self.state.lock().unwrap();
            Self::check_open(&state)?;
            let settled = match (desc.kind, Self::current(&state)) {
                (SdpKind::Offer, SignalingState::Stable) => {
                    state.signaling = Some(SignalingState::HaveRemoteOffer);
                    false
                }
                (SdpKind::Answer, SignalingState::HaveLocalOffer) => {
                    state.signaling = Some(SignalingState::Stable);
                    true
                }
                (kind, current) => {
                    return Err(WebRtcError::SdpError(format!(
                        "remote {kind:?} in {current:?}"
                    )))
                }
            };
            state.has_remote = true;
            settled
        };
        if settled {
            self.settled();
        }
        Ok(())
    }

    async fn has_remote_description(&self) -> bool {
        self.state.lock().unwrap().has_remote
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), WebRtcError> {
        let mut state = self.state.lock().unwrap();
        Self::check_open(&state)?;
        if !state.has_remote {
            return Err(WebRtcError::IceError("no remote description".to_string()));
        }
        state.applied_candidates.push(candidate);
        Ok(())
    }

    async fn add_audio_track(&self, track: LocalTrack) -> Result<(), WebRtcError> {
        let mut state = self.state.lock().unwrap();
        Self::check_open(&state)?;
        state.sender = Some(Some(track));
        Ok(())
    }

    async fn replace_audio_track(&self, track: Option<LocalTrack>) -> Result<(), WebRtcError> {
        let mut state = self.state.lock().unwrap();
        Self::check_open(&state)?;
        match state.sender.as_mut() {
            Some(slot) => {
                *slot = track;
                Ok(())
            }
            None => Err(WebRtcError::TrackError("no audio sender".to_string())),
        }
    }

    async fn sender_track_attached(&self) -> bool {
        matches!(self.state.lock().unwrap().sender, Some(Some(_)))
    }

    async fn close(&self) -> Result<(), WebRtcError> {
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        state.sender = None;
        drop(state);
        self.events.connection_state(ConnectionState::Closed);
        Ok(())
    }
}

/// Remote audio that ends immediately.
struct SilentSource;

#[async_trait]
impl RemoteAudioSource for SilentSource {
    async fn next_payload(&self) -> Option<Bytes> {
        None
    }
}

/// Factory handing out [`FakeLink`]s and remembering every one of them.
#[derive(Default)]
pub struct FakeLinkFactory {
    offers: Arc<AtomicUsize>,
    links: Mutex<Vec<Arc<FakeLink>>>,
    fail: std::sync::atomic::AtomicBool,
}

impl FakeLinkFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Offers created by any link of this factory.
    pub fn offers_created(&self) -> usize {
        self.offers.load(Ordering::SeqCst)
    }

    /// Most recent link to `peer`.
    pub fn link_to(&self, peer: &str) -> Option<Arc<FakeLink>> {
        self.links
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|link| link.peer().as_str() == peer)
            .cloned()
    }

    pub fn links_created(&self) -> usize {
        self.links.lock().unwrap().len()
    }

    pub fn fail_next_links(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl PeerLinkFactory for FakeLinkFactory {
    async fn create_link(
        &self,
        _ice_servers: &[IceServer],
        events: PeerEventSender,
    ) -> Result<Arc<dyn PeerLink>, WebRtcError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(WebRtcError::PeerConnectionError("refused".to_string()));
        }
        let link = Arc::new(FakeLink::new(events, self.offers.clone()));
        self.links.lock().unwrap().push(link.clone());
        Ok(link)
    }
}

// ============================================================================
// Microphones
// ============================================================================

/// Silence microphone that counts how often it was opened and can be made to
/// refuse access.
#[derive(Default)]
pub struct CountingInput {
    opened: AtomicUsize,
    deny: std::sync::atomic::AtomicBool,
}

impl CountingInput {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn deny(&self, deny: bool) {
        self.deny.store(deny, Ordering::SeqCst);
    }
}

#[async_trait]
impl AudioInput for CountingInput {
    async fn open(&self) -> Result<mpsc::Receiver<Bytes>, AudioError> {
        if self.deny.load(Ordering::SeqCst) {
            return Err(AudioError::PermissionDenied);
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        SilenceInput::new().open().await
    }
}

// ============================================================================
// Platform audio
// ============================================================================

/// Native bridge whose session setup always fails; records what the
/// coordinator asked of it.
#[derive(Default)]
pub struct BrokenPlatform {
    configured: AtomicUsize,
    restored: AtomicUsize,
    media_volume: Mutex<Option<f32>>,
}

impl BrokenPlatform {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn configured(&self) -> usize {
        self.configured.load(Ordering::SeqCst)
    }

    pub fn restored(&self) -> usize {
        self.restored.load(Ordering::SeqCst)
    }

    pub fn media_volume(&self) -> Option<f32> {
        *self.media_volume.lock().unwrap()
    }
}

#[async_trait]
impl PlatformAudio for BrokenPlatform {
    fn is_supported(&self) -> bool {
        true
    }

    async fn configure_session(&self) -> Result<(), AudioError> {
        self.configured.fetch_add(1, Ordering::SeqCst);
        Err(AudioError::SessionError("audio session unavailable".to_string()))
    }

    fn restore_session(&self) {
        self.restored.fetch_add(1, Ordering::SeqCst);
    }

    fn set_media_volume(&self, level: f32) {
        *self.media_volume.lock().unwrap() = Some(level);
    }
}

// ============================================================================
// Transports
// ============================================================================

/// Transport whose `join` always fails; everything else succeeds.
pub struct RejectingTransport;

#[async_trait]
impl SignalingTransport for RejectingTransport {
    async fn join(&self, _group_id: &GroupId) -> Result<JoinResponse, TransportError> {
        Err(TransportError::Status {
            endpoint: "Join",
            status: 500,
        })
    }

    async fn leave(&self, _group_id: &GroupId) -> Result<(), TransportError> {
        Ok(())
    }

    async fn send_signal(&self, _signal: &SignalRequest) -> Result<(), TransportError> {
        Ok(())
    }

    async fn get_configuration(&self) -> Result<VoiceChatConfiguration, TransportError> {
        Ok(VoiceChatConfiguration::default())
    }

    async fn update_mute_status(
        &self,
        _group_id: &GroupId,
        _is_muted: bool,
    ) -> Result<(), TransportError> {
        Ok(())
    }
}

// ============================================================================
// Mesh harness
// ============================================================================

/// One participant of a [`Mesh`].
pub struct Member {
    pub id: SessionId,
    pub coordinator: VoiceChatCoordinator,
    pub inbound: mpsc::UnboundedReceiver<Signal>,
    pub factory: Arc<FakeLinkFactory>,
    pub input: Arc<CountingInput>,
}

impl Member {
    pub fn peers(&self) -> &PeerConnectionManager {
        self.coordinator.peers()
    }

    pub fn capture_handles(&self) -> usize {
        self.coordinator.peers().capture_device().active_handles()
    }
}

/// Several coordinators sharing one loopback relay.
pub struct Mesh {
    pub hub: LoopbackHub,
    pub group: GroupId,
    pub members: Vec<Member>,
}

impl Mesh {
    pub fn new(group: &str) -> Self {
        Self {
            hub: LoopbackHub::new(),
            group: GroupId::from(group),
            members: Vec::new(),
        }
    }

    /// Register a participant under `id` without joining.
    pub async fn add(&mut self, id: &str) -> usize {
        self.add_with(id, &VoiceConfig::default()).await
    }

    pub async fn add_with(&mut self, id: &str, config: &VoiceConfig) -> usize {
        let session_id = SessionId::from(id);
        let (transport, inbound) = self
            .hub
            .connect_as(session_id.clone(), format!("user-{id}"))
            .await;
        let factory = FakeLinkFactory::new();
        let input = CountingInput::new();
        let peers = PeerConnectionManager::new(factory.clone(), CaptureDevice::new(input.clone()));
        let coordinator = VoiceChatCoordinator::new(Arc::new(transport), peers, config);

        self.members.push(Member {
            id: session_id,
            coordinator,
            inbound,
            factory,
            input,
        });
        self.members.len() - 1
    }

    /// Add, join and settle.
    pub async fn join(&mut self, id: &str) -> usize {
        let index = self.add(id).await;
        let group = self.group.clone();
        self.members[index]
            .coordinator
            .join(group)
            .await
            .expect("join failed");
        self.settle().await;
        index
    }

    pub fn member(&self, id: &str) -> &Member {
        self.members
            .iter()
            .find(|m| m.id.as_str() == id)
            .expect("unknown member")
    }

    pub fn member_mut(&mut self, id: &str) -> &mut Member {
        self.members
            .iter_mut()
            .find(|m| m.id.as_str() == id)
            .expect("unknown member")
    }

    /// Deliver signals and peer events until nothing moves.
    pub async fn settle(&mut self) {
        for _ in 0..200 {
            // Relay everything queued before reading any inbox.
            for member in &mut self.members {
                member.coordinator.process_pending_events().await;
            }
            let mut progressed = false;
            for member in &mut self.members {
                while let Ok(signal) = member.inbound.try_recv() {
                    member.coordinator.handle_signal(signal).await;
                    progressed = true;
                }
            }
            if !progressed {
                return;
            }
        }
        panic!("mesh did not settle");
    }

    /// Offers relayed so far as `(from, to)` pairs.
    pub async fn relayed_offers(&self) -> Vec<(String, String)> {
        self.hub
            .routed_signals()
            .await
            .into_iter()
            .filter(|s| s.signal_type == SignalType::Offer)
            .map(|s| {
                (
                    s.from_session_id.to_string(),
                    s.to_session_id.map(|t| t.to_string()).unwrap_or_default(),
                )
            })
            .collect()
    }
}

// ============================================================================
// Manager-level helpers
// ============================================================================

/// Manager with fake links, initialized and bound to `local`.
pub fn manager(local: &str) -> (PeerConnectionManager, Arc<FakeLinkFactory>, Arc<CountingInput>) {
    let factory = FakeLinkFactory::new();
    let input = CountingInput::new();
    let mut peers = PeerConnectionManager::new(factory.clone(), CaptureDevice::new(input.clone()));
    peers.initialize(Vec::new()).expect("initialize");
    peers.set_local_session(SessionId::from(local));
    (peers, factory, input)
}

/// Signals queued by `peers` that belong to the connection currently in use.
pub fn drain_signals(peers: &mut PeerConnectionManager) -> Vec<OutboundSignal> {
    let mut signals = Vec::new();
    while let Some(event) = peers.try_next_event() {
        if let PeerEvent::Signal(signal) = event {
            if peers.is_current_link(&signal.to, signal.link_id) {
                signals.push(signal);
            }
        }
    }
    signals
}

/// The single offer or answer among `signals`.
pub fn description(signals: &[OutboundSignal]) -> PeerMessage {
    let found: Vec<_> = signals
        .iter()
        .filter(|s| !matches!(s.message, PeerMessage::IceCandidate(_)))
        .collect();
    assert_eq!(found.len(), 1, "expected one description in {signals:?}");
    found[0].message.clone()
}
