//! Audio Input/Output
//!
//! Microphone capture feeding the local WebRTC track, per-peer playback
//! sinks with gain control, and the platform audio-session bridge.

use thiserror::Error;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;

mod capture;
mod gain;
mod platform;
mod playback;

pub use capture::{AudioInput, CaptureDevice, CaptureHandle, SilenceInput};
pub use gain::{clamp_level, Gain, GainControls};
pub use platform::{NoopPlatformAudio, PlatformAudio};
pub use playback::{PlaybackFrame, RemoteAudioSource, RemoteSink};

/// Audio configuration constants
pub const SAMPLE_RATE: u32 = 48000;
pub const CHANNELS: u16 = 2;
pub const FRAME_SIZE_MS: u64 = 20;

/// Audio errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("No input device available")]
    NoInputDevice,
    #[error("Permission denied")]
    PermissionDenied,
    #[error("Audio session error: {0}")]
    SessionError(String),
}

/// Opus capability shared by the media engine and the local track.
pub fn opus_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: "audio/opus".to_string(),
        clock_rate: SAMPLE_RATE,
        channels: CHANNELS,
        sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
        rtcp_feedback: vec![],
    }
}
