//! Platform Audio Session
//!
//! Mobile shells expose a native audio-session bridge so that starting the
//! microphone does not drop the device into mono call mode. Desktop builds
//! use [`NoopPlatformAudio`].

use async_trait::async_trait;

use super::AudioError;

/// Native audio-session capability.
#[async_trait]
pub trait PlatformAudio: Send + Sync {
    /// Whether a native bridge is present at all.
    fn is_supported(&self) -> bool;

    /// Prepare the audio session before the microphone opens.
    async fn configure_session(&self) -> Result<(), AudioError> {
        Ok(())
    }

    /// Return the audio session to its normal state.
    fn restore_session(&self) {}

    /// Apply the synchronized media playback volume.
    fn set_media_volume(&self, _level: f32) {}
}

/// Platform without a native bridge.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPlatformAudio;

#[async_trait]
impl PlatformAudio for NoopPlatformAudio {
    fn is_supported(&self) -> bool {
        false
    }
}
