//! Remote Audio Sinks
//!
//! Each remote participant's track is drained by a [`RemoteSink`] task that
//! hands Opus payloads, tagged with the gain to apply, to the playback
//! channel. Decoding and output belong to the consumer of that channel.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, trace};
use vc_signaling::SessionId;
use webrtc::track::track_remote::TrackRemote;

use super::Gain;

/// Source of encoded audio received from a peer.
#[async_trait]
pub trait RemoteAudioSource: Send + Sync {
    /// Next Opus payload, or `None` once the track has ended.
    async fn next_payload(&self) -> Option<Bytes>;
}

#[async_trait]
impl RemoteAudioSource for TrackRemote {
    async fn next_payload(&self) -> Option<Bytes> {
        match self.read_rtp().await {
            Ok((packet, _)) => Some(packet.payload),
            Err(e) => {
                debug!("Remote track ended: {}", e);
                None
            }
        }
    }
}

/// One frame of remote audio ready for decoding.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackFrame {
    pub session_id: SessionId,
    pub payload: Bytes,
    /// Voice chat master volume multiplied by the participant's volume.
    pub gain: f32,
}

/// Playback task for one remote participant.
pub struct RemoteSink {
    task: JoinHandle<()>,
}

impl RemoteSink {
    pub fn spawn(
        session_id: SessionId,
        source: Arc<dyn RemoteAudioSource>,
        voice: Arc<Gain>,
        remote: Arc<Gain>,
        output: mpsc::Sender<PlaybackFrame>,
    ) -> Self {
        let task = tokio::spawn(async move {
            while let Some(payload) = source.next_payload().await {
                let frame = PlaybackFrame {
                    session_id: session_id.clone(),
                    payload,
                    gain: voice.get() * remote.get(),
                };
                match output.try_send(frame) {
                    Ok(()) => {}
                    // Late audio is worthless; drop rather than queue.
                    Err(TrySendError::Full(_)) => trace!(session_id = %session_id, "Playback queue full"),
                    Err(TrySendError::Closed(_)) => break,
                }
            }
            debug!(session_id = %session_id, "Remote sink finished");
        });

        Self { task }
    }
}

impl Drop for RemoteSink {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex;

    struct ScriptedSource(Mutex<Vec<Bytes>>);

    #[async_trait]
    impl RemoteAudioSource for ScriptedSource {
        async fn next_payload(&self) -> Option<Bytes> {
            let mut frames = self.0.lock().await;
            if frames.is_empty() {
                None
            } else {
                Some(frames.remove(0))
            }
        }
    }

    #[tokio::test]
    async fn test_frames_carry_combined_gain() {
        let source = Arc::new(ScriptedSource(Mutex::new(vec![
            Bytes::from_static(b"one"),
            Bytes::from_static(b"two"),
        ])));
        let (tx, mut rx) = mpsc::channel(4);
        let voice = Arc::new(Gain::new(0.5));
        let remote = Arc::new(Gain::new(0.5));

        let _sink = RemoteSink::spawn(SessionId::from("a"), source, voice, remote, tx);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.session_id.as_str(), "a");
        assert_eq!(first.payload, Bytes::from_static(b"one"));
        assert!((first.gain - 0.25).abs() < f32::EPSILON);

        let second = rx.recv().await.unwrap();
        assert_eq!(second.payload, Bytes::from_static(b"two"));

        // Source exhausted, task ends and drops its sender.
        assert!(rx.recv().await.is_none());
    }
}
