//! Voice Chat Configuration
//!
//! Loads configuration from environment variables.

use anyhow::{Context, Result};
use std::env;
use url::Url;
use vc_signaling::IceServer;

use crate::audio::clamp_level;

const DEFAULT_FALLBACK_STUN: &str = "stun:stun.l.google.com:19302";

/// Client configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceConfig {
    /// Base URL of the media server hosting the signaling relay
    pub server_url: Option<String>,

    /// Access token sent with every RPC (optional)
    pub access_token: Option<String>,

    /// RPC timeout in seconds (default: 30)
    pub http_timeout_secs: u64,

    /// STUN server used when the server configuration lists none
    pub fallback_stun: String,

    /// Capacity of the voice event broadcast channel (default: 64)
    pub event_capacity: usize,

    /// Join with the microphone muted (default: false)
    pub start_muted: bool,

    /// Voice chat master volume, 0.0 to 1.0 (default: 1.0)
    pub voice_volume: f32,

    /// Media playback volume, 0.0 to 1.0 (default: 1.0)
    pub media_volume: f32,
}

impl VoiceConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let server_url = match env::var("VC_SERVER_URL") {
            Ok(url) => {
                Url::parse(&url).context("VC_SERVER_URL must be a valid URL")?;
                Some(url)
            }
            Err(_) => None,
        };

        Ok(Self {
            server_url,
            access_token: env::var("VC_ACCESS_TOKEN").ok(),
            http_timeout_secs: env::var("VC_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            fallback_stun: env::var("VC_FALLBACK_STUN")
                .unwrap_or_else(|_| DEFAULT_FALLBACK_STUN.into()),
            event_capacity: env::var("VC_EVENT_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|&n: &usize| n > 0)
                .unwrap_or(64),
            start_muted: env::var("VC_START_MUTED")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
            voice_volume: volume_from_env("VC_VOICE_VOLUME"),
            media_volume: volume_from_env("VC_MEDIA_VOLUME"),
        })
    }

    /// ICE servers to use, falling back to the configured STUN server when
    /// the relay provides none.
    pub fn ice_servers_or_fallback(&self, servers: Vec<IceServer>) -> Vec<IceServer> {
        if servers.is_empty() {
            vec![IceServer::stun(self.fallback_stun.clone())]
        } else {
            servers
        }
    }
}

fn volume_from_env(key: &str) -> f32 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(clamp_level)
        .unwrap_or(1.0)
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            access_token: None,
            http_timeout_secs: 30,
            fallback_stun: DEFAULT_FALLBACK_STUN.into(),
            event_capacity: 64,
            start_muted: false,
            voice_volume: 1.0,
            media_volume: 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const KEYS: [&str; 8] = [
        "VC_SERVER_URL",
        "VC_ACCESS_TOKEN",
        "VC_HTTP_TIMEOUT_SECS",
        "VC_FALLBACK_STUN",
        "VC_EVENT_CAPACITY",
        "VC_START_MUTED",
        "VC_VOICE_VOLUME",
        "VC_MEDIA_VOLUME",
    ];

    fn clear_env() {
        for key in KEYS {
            env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_defaults_without_environment() {
        clear_env();
        let config = VoiceConfig::from_env().unwrap();
        assert_eq!(config, VoiceConfig::default());
    }

    #[test]
    #[serial]
    fn test_reads_environment() {
        clear_env();
        env::set_var("VC_SERVER_URL", "https://media.example.com");
        env::set_var("VC_HTTP_TIMEOUT_SECS", "5");
        env::set_var("VC_START_MUTED", "true");
        env::set_var("VC_VOICE_VOLUME", "1.7");
        env::set_var("VC_MEDIA_VOLUME", "0.25");
        env::set_var("VC_EVENT_CAPACITY", "not-a-number");

        let config = VoiceConfig::from_env().unwrap();
        assert_eq!(config.server_url.as_deref(), Some("https://media.example.com"));
        assert_eq!(config.http_timeout_secs, 5);
        assert!(config.start_muted);
        assert!((config.voice_volume - 1.0).abs() < f32::EPSILON);
        assert!((config.media_volume - 0.25).abs() < f32::EPSILON);
        assert_eq!(config.event_capacity, 64);
        clear_env();
    }

    #[test]
    #[serial]
    fn test_invalid_server_url() {
        clear_env();
        env::set_var("VC_SERVER_URL", "not a url");
        assert!(VoiceConfig::from_env().is_err());
        clear_env();
    }

    #[test]
    fn test_fallback_stun() {
        let config = VoiceConfig::default();
        let servers = config.ice_servers_or_fallback(Vec::new());
        assert_eq!(servers, vec![IceServer::stun(DEFAULT_FALLBACK_STUN)]);

        let turn = vec![IceServer::stun("stun:relay.example.com:3478")];
        assert_eq!(config.ice_servers_or_fallback(turn.clone()), turn);
    }
}
