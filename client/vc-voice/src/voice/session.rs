//! Voice Session Runner
//!
//! Moves a [`VoiceChatCoordinator`] onto its own task. Commands from
//! handles, inbound push signals and peer mesh events are processed one at
//! a time, so a mute toggle never overlaps an offer that is being created.

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use vc_signaling::{GroupId, SessionId, Signal};

use super::{VoiceChatCoordinator, VoiceError, VoiceEvent, VoiceSnapshot};

const COMMAND_CAPACITY: usize = 32;

enum Command {
    Join {
        group_id: GroupId,
        reply: oneshot::Sender<Result<(), VoiceError>>,
    },
    Leave {
        reply: oneshot::Sender<()>,
    },
    ToggleMute {
        reply: oneshot::Sender<Result<bool, VoiceError>>,
    },
    SetMediaVolume {
        level: f32,
        reply: oneshot::Sender<f32>,
    },
    SetVoiceChatVolume {
        level: f32,
        reply: oneshot::Sender<f32>,
    },
    SetRemoteVolume {
        session_id: SessionId,
        level: f32,
        reply: oneshot::Sender<f32>,
    },
    Snapshot {
        reply: oneshot::Sender<VoiceSnapshot>,
    },
    Shutdown,
}

/// Cloneable front end of a running [`VoiceSession`].
#[derive(Clone)]
pub struct VoiceSessionHandle {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<VoiceEvent>,
}

impl VoiceSessionHandle {
    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, VoiceError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| VoiceError::SessionClosed)?;
        response.await.map_err(|_| VoiceError::SessionClosed)
    }

    pub async fn join(&self, group_id: GroupId) -> Result<(), VoiceError> {
        self.request(|reply| Command::Join { group_id, reply })
            .await?
    }

    pub async fn leave(&self) -> Result<(), VoiceError> {
        self.request(|reply| Command::Leave { reply }).await
    }

    /// Returns the new mute flag.
    pub async fn toggle_mute(&self) -> Result<bool, VoiceError> {
        self.request(|reply| Command::ToggleMute { reply }).await?
    }

    pub async fn set_media_volume(&self, level: f32) -> Result<f32, VoiceError> {
        self.request(|reply| Command::SetMediaVolume { level, reply })
            .await
    }

    pub async fn set_voice_chat_volume(&self, level: f32) -> Result<f32, VoiceError> {
        self.request(|reply| Command::SetVoiceChatVolume { level, reply })
            .await
    }

    pub async fn set_remote_volume(
        &self,
        session_id: SessionId,
        level: f32,
    ) -> Result<f32, VoiceError> {
        self.request(|reply| Command::SetRemoteVolume {
            session_id,
            level,
            reply,
        })
        .await
    }

    pub async fn snapshot(&self) -> Result<VoiceSnapshot, VoiceError> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<VoiceEvent> {
        self.events.subscribe()
    }

    /// Leave the group if needed and stop the session task.
    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
    }
}

/// Task owning one coordinator.
pub struct VoiceSession {
    coordinator: VoiceChatCoordinator,
    commands: mpsc::Receiver<Command>,
    inbound: Option<mpsc::UnboundedReceiver<Signal>>,
}

impl VoiceSession {
    /// Spawn the session task. `inbound` is the relay's push channel.
    pub fn spawn(
        coordinator: VoiceChatCoordinator,
        inbound: mpsc::UnboundedReceiver<Signal>,
    ) -> (VoiceSessionHandle, JoinHandle<()>) {
        let (commands_tx, commands) = mpsc::channel(COMMAND_CAPACITY);
        let handle = VoiceSessionHandle {
            commands: commands_tx,
            events: coordinator.events(),
        };

        let session = Self {
            coordinator,
            commands,
            inbound: Some(inbound),
        };
        (handle, tokio::spawn(session.run()))
    }

    async fn run(mut self) {
        info!("Voice session started");

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    match command {
                        Some(Command::Shutdown) | None => break,
                        Some(command) => self.execute(command).await,
                    }
                }

                signal = next_signal(&mut self.inbound) => {
                    if let Some(signal) = signal {
                        self.coordinator.handle_signal(signal).await;
                    } else {
                        warn!("Signaling push channel closed");
                        self.inbound = None;
                        self.coordinator.transport_lost().await;
                    }
                }

                Some(event) = self.coordinator.next_peer_event() => {
                    self.coordinator.handle_peer_event(event).await;
                    self.coordinator.process_pending_events().await;
                }
            }
        }

        self.coordinator.leave().await;
        info!("Voice session stopped");
    }

    async fn execute(&mut self, command: Command) {
        // A dropped reply receiver only means the caller stopped waiting.
        match command {
            Command::Join { group_id, reply } => {
                let _ = reply.send(self.coordinator.join(group_id).await);
            }
            Command::Leave { reply } => {
                self.coordinator.leave().await;
                let _ = reply.send(());
            }
            Command::ToggleMute { reply } => {
                let _ = reply.send(self.coordinator.toggle_mute().await);
            }
            Command::SetMediaVolume { level, reply } => {
                let _ = reply.send(self.coordinator.set_media_volume(level));
            }
            Command::SetVoiceChatVolume { level, reply } => {
                let _ = reply.send(self.coordinator.set_voice_chat_volume(level));
            }
            Command::SetRemoteVolume {
                session_id,
                level,
                reply,
            } => {
                let _ = reply.send(self.coordinator.set_remote_volume(&session_id, level));
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.coordinator.snapshot());
            }
            Command::Shutdown => {}
        }
    }
}

async fn next_signal(inbound: &mut Option<mpsc::UnboundedReceiver<Signal>>) -> Option<Signal> {
    match inbound {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
