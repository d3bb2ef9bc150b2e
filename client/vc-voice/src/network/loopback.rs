//! In-Process Signaling Relay
//!
//! [`LoopbackHub`] plays the server side of the signaling RPCs for any number
//! of clients living in the same process. Each client gets a
//! [`LoopbackTransport`] and the receiving end of its push channel.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};
use vc_signaling::{
    GroupId, JoinResponse, Participant, SessionId, Signal, SignalRequest, SignalType,
    VoiceChatConfiguration,
};

use super::{SignalingTransport, TransportError};

struct Client {
    user_name: String,
    push: mpsc::UnboundedSender<Signal>,
}

#[derive(Default)]
struct HubState {
    clients: HashMap<SessionId, Client>,
    rosters: HashMap<GroupId, Vec<Participant>>,
    configuration: VoiceChatConfiguration,
    configuration_requests: usize,
    routed: Vec<Signal>,
    next_id: u32,
    offline: bool,
}

impl HubState {
    fn ensure_online(&self) -> Result<(), TransportError> {
        if self.offline {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }

    fn is_member(&self, group_id: &GroupId, session_id: &SessionId) -> bool {
        self.rosters
            .get(group_id)
            .is_some_and(|roster| roster.iter().any(|p| p.session_id == *session_id))
    }

    fn deliver(&self, to: &SessionId, signal: Signal) {
        if let Some(client) = self.clients.get(to) {
            // A client that dropped its push channel simply stops receiving.
            let _ = client.push.send(signal);
        }
    }

    /// Send a roster signal about `participant` to every other member.
    fn announce(&self, group_id: &GroupId, signal_type: SignalType, participant: &Participant) {
        let signal = match Signal::roster(group_id.clone(), signal_type, participant) {
            Ok(signal) => signal,
            Err(e) => {
                warn!("Failed to encode {:?} signal: {}", signal_type, e);
                return;
            }
        };
        let Some(roster) = self.rosters.get(group_id) else {
            return;
        };
        for member in roster {
            if member.session_id != participant.session_id {
                self.deliver(&member.session_id, signal.clone());
            }
        }
    }
}

/// Shared in-process relay.
#[derive(Clone, Default)]
pub struct LoopbackHub {
    state: Arc<Mutex<HubState>>,
}

impl LoopbackHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hub answering `getConfiguration` with `configuration`.
    pub fn with_configuration(configuration: VoiceChatConfiguration) -> Self {
        Self {
            state: Arc::new(Mutex::new(HubState {
                configuration,
                ..HubState::default()
            })),
        }
    }

    /// Register a client under the next generated session id. Ids are
    /// zero-padded so they sort in connection order.
    pub async fn connect(
        &self,
        user_name: impl Into<String>,
    ) -> (LoopbackTransport, mpsc::UnboundedReceiver<Signal>) {
        let session_id = {
            let mut state = self.state.lock().await;
            state.next_id += 1;
            SessionId::new(format!("session-{:04}", state.next_id))
        };
        self.connect_as(session_id, user_name).await
    }

    /// Register a client under a chosen session id.
    pub async fn connect_as(
        &self,
        session_id: SessionId,
        user_name: impl Into<String>,
    ) -> (LoopbackTransport, mpsc::UnboundedReceiver<Signal>) {
        let (push, inbound) = mpsc::unbounded_channel();
        let user_name = user_name.into();
        debug!(session_id = %session_id, "Loopback client connected");

        self.state.lock().await.clients.insert(
            session_id.clone(),
            Client { user_name, push },
        );

        let transport = LoopbackTransport {
            hub: self.clone(),
            session_id,
        };
        (transport, inbound)
    }

    /// Drop a client's push channel, as if its connection to the relay died.
    pub async fn disconnect(&self, session_id: &SessionId) {
        self.state.lock().await.clients.remove(session_id);
    }

    /// While offline every RPC fails with [`TransportError::Closed`].
    pub async fn set_offline(&self, offline: bool) {
        self.state.lock().await.offline = offline;
    }

    pub async fn configuration_requests(&self) -> usize {
        self.state.lock().await.configuration_requests
    }

    pub async fn roster(&self, group_id: &GroupId) -> Vec<Participant> {
        self.state
            .lock()
            .await
            .rosters
            .get(group_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Every signal relayed through `sendSignal`, in relay order.
    pub async fn routed_signals(&self) -> Vec<Signal> {
        self.state.lock().await.routed.clone()
    }
}

/// One client's view of a [`LoopbackHub`].
pub struct LoopbackTransport {
    hub: LoopbackHub,
    session_id: SessionId,
}

impl LoopbackTransport {
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }
}

#[async_trait]
impl SignalingTransport for LoopbackTransport {
    async fn join(&self, group_id: &GroupId) -> Result<JoinResponse, TransportError> {
        let mut state = self.hub.state.lock().await;
        state.ensure_online()?;
        let user_name = state
            .clients
            .get(&self.session_id)
            .map(|c| c.user_name.clone())
            .ok_or(TransportError::Closed)?;

        let participant = Participant {
            session_id: self.session_id.clone(),
            user_name,
            is_muted: false,
        };
        let roster = state.rosters.entry(group_id.clone()).or_default();
        if !roster.iter().any(|p| p.session_id == self.session_id) {
            roster.push(participant.clone());
            state.announce(group_id, SignalType::UserJoined, &participant);
        }

        Ok(JoinResponse {
            participants: state.rosters.get(group_id).cloned().unwrap_or_default(),
            self_session_id: self.session_id.clone(),
        })
    }

    async fn leave(&self, group_id: &GroupId) -> Result<(), TransportError> {
        let mut state = self.hub.state.lock().await;
        state.ensure_online()?;

        let roster = state
            .rosters
            .get_mut(group_id)
            .ok_or_else(|| TransportError::NotJoined(group_id.clone()))?;
        let index = roster
            .iter()
            .position(|p| p.session_id == self.session_id)
            .ok_or_else(|| TransportError::NotJoined(group_id.clone()))?;
        let participant = roster.remove(index);

        state.announce(group_id, SignalType::UserLeft, &participant);
        if state.rosters.get(group_id).is_some_and(Vec::is_empty) {
            state.rosters.remove(group_id);
        }
        Ok(())
    }

    async fn send_signal(&self, request: &SignalRequest) -> Result<(), TransportError> {
        let mut state = self.hub.state.lock().await;
        state.ensure_online()?;
        if !state.is_member(&request.group_id, &self.session_id) {
            return Err(TransportError::NotJoined(request.group_id.clone()));
        }

        let signal = request.clone().into_signal(self.session_id.clone());
        match &signal.to_session_id {
            Some(to) => {
                if state.is_member(&signal.group_id, to) {
                    state.deliver(to, signal.clone());
                } else {
                    debug!(to = %to, "Dropping signal for non-member");
                }
            }
            None => {
                if let Some(roster) = state.rosters.get(&signal.group_id) {
                    for member in roster.iter().filter(|p| p.session_id != self.session_id) {
                        state.deliver(&member.session_id, signal.clone());
                    }
                }
            }
        }
        state.routed.push(signal);
        Ok(())
    }

    async fn get_configuration(&self) -> Result<VoiceChatConfiguration, TransportError> {
        let mut state = self.hub.state.lock().await;
        state.ensure_online()?;
        state.configuration_requests += 1;
        Ok(state.configuration.clone())
    }

    async fn update_mute_status(
        &self,
        group_id: &GroupId,
        is_muted: bool,
    ) -> Result<(), TransportError> {
        let mut state = self.hub.state.lock().await;
        state.ensure_online()?;

        let participant = state
            .rosters
            .get_mut(group_id)
            .and_then(|roster| roster.iter_mut().find(|p| p.session_id == self.session_id))
            .map(|p| {
                p.is_muted = is_muted;
                p.clone()
            })
            .ok_or_else(|| TransportError::NotJoined(group_id.clone()))?;

        let signal_type = if is_muted {
            SignalType::UserMuted
        } else {
            SignalType::UserUnmuted
        };
        state.announce(group_id, signal_type, &participant);
        Ok(())
    }
}
