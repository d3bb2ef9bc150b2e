//! Microphone Capture
//!
//! The microphone is the one exclusively owned device of a session. A
//! [`CaptureHandle`] is move-only and releases the device when consumed or
//! dropped, so a release can never run twice for the same acquisition.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};
use webrtc::media::Sample;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use super::{opus_capability, AudioError, FRAME_SIZE_MS};
use crate::peer::LocalTrack;

/// 20 ms Opus frame carrying DTX silence.
const OPUS_SILENCE_FRAME: [u8; 3] = [0xf8, 0xff, 0xfe];

/// A microphone producing encoded Opus frames.
#[async_trait]
pub trait AudioInput: Send + Sync {
    /// Open the device. Dropping the returned receiver closes it again.
    async fn open(&self) -> Result<mpsc::Receiver<Bytes>, AudioError>;
}

/// Input that emits Opus silence at the normal frame rate.
#[derive(Debug, Clone, Default)]
pub struct SilenceInput;

impl SilenceInput {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AudioInput for SilenceInput {
    async fn open(&self) -> Result<mpsc::Receiver<Bytes>, AudioError> {
        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(FRAME_SIZE_MS));
            loop {
                ticker.tick().await;
                if tx
                    .send(Bytes::from_static(&OPUS_SILENCE_FRAME))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });
        Ok(rx)
    }
}

/// Owner of the microphone for one session.
pub struct CaptureDevice {
    input: Arc<dyn AudioInput>,
    active: Arc<AtomicUsize>,
    next_id: AtomicU64,
}

impl CaptureDevice {
    pub fn new(input: Arc<dyn AudioInput>) -> Self {
        Self {
            input,
            active: Arc::new(AtomicUsize::new(0)),
            next_id: AtomicU64::new(1),
        }
    }

    /// Open the microphone and bind it to a fresh local Opus track.
    pub async fn acquire(&self) -> Result<CaptureHandle, AudioError> {
        let mut frames = self.input.open().await?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let track = Arc::new(TrackLocalStaticSample::new(
            opus_capability(),
            "audio".to_string(),
            format!("voice-{id}"),
        ));

        let pump_track = track.clone();
        let pump = tokio::spawn(async move {
            while let Some(frame) = frames.recv().await {
                let sample = Sample {
                    data: frame,
                    duration: Duration::from_millis(FRAME_SIZE_MS),
                    ..Default::default()
                };
                if let Err(e) = pump_track.write_sample(&sample).await {
                    trace!(capture_id = id, "Dropped capture frame: {}", e);
                }
            }
        });

        self.active.fetch_add(1, Ordering::SeqCst);
        debug!(capture_id = id, "Microphone acquired");

        Ok(CaptureHandle {
            id,
            track,
            pump,
            active: self.active.clone(),
        })
    }

    /// Number of acquisitions not yet released.
    pub fn active_handles(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

/// A live microphone acquisition.
pub struct CaptureHandle {
    id: u64,
    track: Arc<TrackLocalStaticSample>,
    pump: JoinHandle<()>,
    active: Arc<AtomicUsize>,
}

impl CaptureHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The local track fed by this acquisition.
    pub fn track(&self) -> LocalTrack {
        self.track.clone()
    }

    /// Stop capturing and close the device.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        // Aborting the pump drops the frame receiver, which closes the input.
        self.pump.abort();
        self.active.fetch_sub(1, Ordering::SeqCst);
        debug!(capture_id = self.id, "Microphone released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use webrtc::track::track_local::TrackLocal;

    /// Microphone that is either refused or missing.
    struct FailingInput {
        denied: bool,
    }

    #[async_trait]
    impl AudioInput for FailingInput {
        async fn open(&self) -> Result<mpsc::Receiver<Bytes>, AudioError> {
            if self.denied {
                Err(AudioError::PermissionDenied)
            } else {
                Err(AudioError::NoInputDevice)
            }
        }
    }

    #[tokio::test]
    async fn test_acquire_and_release_balance() {
        let device = CaptureDevice::new(Arc::new(SilenceInput::new()));
        assert_eq!(device.active_handles(), 0);

        let first = device.acquire().await.unwrap();
        assert_eq!(device.active_handles(), 1);
        first.release();
        assert_eq!(device.active_handles(), 0);

        // Toggle spam
        for _ in 0..10 {
            let handle = device.acquire().await.unwrap();
            assert_eq!(device.active_handles(), 1);
            drop(handle);
        }
        assert_eq!(device.active_handles(), 0);
    }

    #[tokio::test]
    async fn test_each_acquisition_gets_its_own_track() {
        let device = CaptureDevice::new(Arc::new(SilenceInput::new()));
        let a = device.acquire().await.unwrap();
        let b = device.acquire().await.unwrap();
        assert_ne!(a.id(), b.id());
        assert_ne!(a.track().stream_id(), b.track().stream_id());
    }

    #[tokio::test]
    async fn test_denied_input_leaves_nothing_acquired() {
        let device = CaptureDevice::new(Arc::new(FailingInput { denied: true }));
        let result = device.acquire().await;
        assert!(matches!(result, Err(AudioError::PermissionDenied)));
        assert_eq!(device.active_handles(), 0);
    }

    #[tokio::test]
    async fn test_missing_device_leaves_nothing_acquired() {
        let device = CaptureDevice::new(Arc::new(FailingInput { denied: false }));
        let result = device.acquire().await;
        assert!(matches!(result, Err(AudioError::NoInputDevice)));
        assert_eq!(device.active_handles(), 0);
    }
}
