//! Playback Gain
//!
//! Local volume controls. None of these touch signaling.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use vc_signaling::SessionId;

/// Clamp a requested level to `0.0..=1.0`; NaN is treated as silence.
pub fn clamp_level(level: f32) -> f32 {
    if level.is_nan() {
        0.0
    } else {
        level.clamp(0.0, 1.0)
    }
}

/// Lock-free gain cell shared with playback tasks.
#[derive(Debug)]
pub struct Gain(AtomicU32);

impl Gain {
    pub fn new(level: f32) -> Self {
        Self(AtomicU32::new(clamp_level(level).to_bits()))
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    /// Store the clamped level and return it.
    pub fn set(&self, level: f32) -> f32 {
        let level = clamp_level(level);
        self.0.store(level.to_bits(), Ordering::Relaxed);
        level
    }
}

impl Default for Gain {
    fn default() -> Self {
        Self::new(1.0)
    }
}

/// Media, voice chat master, and per-participant volumes.
#[derive(Debug)]
pub struct GainControls {
    media: f32,
    voice: Arc<Gain>,
    remote: HashMap<SessionId, Arc<Gain>>,
}

impl GainControls {
    pub fn new(media: f32, voice: f32) -> Self {
        Self {
            media: clamp_level(media),
            voice: Arc::new(Gain::new(voice)),
            remote: HashMap::new(),
        }
    }

    pub fn media_volume(&self) -> f32 {
        self.media
    }

    pub fn set_media_volume(&mut self, level: f32) -> f32 {
        self.media = clamp_level(level);
        self.media
    }

    pub fn voice_volume(&self) -> f32 {
        self.voice.get()
    }

    pub fn set_voice_volume(&mut self, level: f32) -> f32 {
        self.voice.set(level)
    }

    /// Shared master gain handed to every sink.
    pub fn voice(&self) -> Arc<Gain> {
        self.voice.clone()
    }

    /// Gain cell for one participant, created at full volume.
    pub fn remote(&mut self, session_id: &SessionId) -> Arc<Gain> {
        self.remote
            .entry(session_id.clone())
            .or_insert_with(|| Arc::new(Gain::default()))
            .clone()
    }

    pub fn remote_volume(&self, session_id: &SessionId) -> Option<f32> {
        self.remote.get(session_id).map(|g| g.get())
    }

    pub fn set_remote_volume(&mut self, session_id: &SessionId, level: f32) -> f32 {
        self.remote(session_id).set(level)
    }

    pub fn forget(&mut self, session_id: &SessionId) {
        self.remote.remove(session_id);
    }

    pub fn forget_all(&mut self) {
        self.remote.clear();
    }
}
