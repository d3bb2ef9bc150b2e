//! HTTP Signaling Transport

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client as HttpClient, Method, RequestBuilder, Response};
use tracing::{debug, error};
use url::Url;
use vc_signaling::{GroupId, JoinResponse, SignalRequest, VoiceChatConfiguration};

use super::{SignalingTransport, TransportError};
use crate::config::VoiceConfig;

/// Relay reached over the server's REST API.
pub struct HttpSignalingTransport {
    http: HttpClient,
    base_url: Url,
    access_token: Option<String>,
}

impl HttpSignalingTransport {
    pub fn new(
        base_url: &str,
        access_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let base_url = Url::parse(base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(TransportError::InvalidBaseUrl);
        }
        let http = HttpClient::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            base_url,
            access_token,
        })
    }

    pub fn from_config(config: &VoiceConfig) -> Result<Self, TransportError> {
        let server_url = config
            .server_url
            .as_deref()
            .ok_or(TransportError::NotConfigured("VC_SERVER_URL"))?;
        Self::new(
            server_url,
            config.access_token.clone(),
            Duration::from_secs(config.http_timeout_secs),
        )
    }

    /// `{base}/SyncPlay/VoiceChat/{segments..}` with each segment escaped.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, TransportError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| TransportError::InvalidBaseUrl)?
            .pop_if_empty()
            .extend(["SyncPlay", "VoiceChat"])
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.http.request(method, url);
        match &self.access_token {
            Some(token) => builder.header(
                "Authorization",
                format!("MediaBrowser Token=\"{token}\""),
            ),
            None => builder,
        }
    }

    async fn send(
        &self,
        endpoint: &'static str,
        builder: RequestBuilder,
    ) -> Result<Response, TransportError> {
        let response = builder.send().await.map_err(|e| {
            error!("{} request failed: {}", endpoint, e);
            e
        })?;

        let status = response.status();
        if !status.is_success() {
            error!("{} failed: {}", endpoint, status);
            return Err(TransportError::Status {
                endpoint,
                status: status.as_u16(),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl SignalingTransport for HttpSignalingTransport {
    async fn join(&self, group_id: &GroupId) -> Result<JoinResponse, TransportError> {
        let url = self.endpoint(&["Join", group_id.as_str()])?;
        let response = self.send("Join", self.request(Method::POST, url)).await?;
        let joined: JoinResponse = response.json().await?;
        debug!(
            group_id = %group_id,
            participants = joined.participants.len(),
            "Joined voice chat"
        );
        Ok(joined)
    }

    async fn leave(&self, group_id: &GroupId) -> Result<(), TransportError> {
        let url = self.endpoint(&["Leave", group_id.as_str()])?;
        self.send("Leave", self.request(Method::POST, url)).await?;
        Ok(())
    }

    async fn send_signal(&self, signal: &SignalRequest) -> Result<(), TransportError> {
        let url = self.endpoint(&["Signal"])?;
        self.send("Signal", self.request(Method::POST, url).json(signal))
            .await?;
        Ok(())
    }

    async fn get_configuration(&self) -> Result<VoiceChatConfiguration, TransportError> {
        let url = self.endpoint(&["Configuration"])?;
        let response = self
            .send("Configuration", self.request(Method::GET, url))
            .await?;
        Ok(response.json().await?)
    }

    async fn update_mute_status(
        &self,
        group_id: &GroupId,
        is_muted: bool,
    ) -> Result<(), TransportError> {
        let mut url = self.endpoint(&["Mute", group_id.as_str()])?;
        url.query_pairs_mut()
            .append_pair("isMuted", if is_muted { "true" } else { "false" });
        self.send("Mute", self.request(Method::POST, url)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport(base: &str) -> HttpSignalingTransport {
        HttpSignalingTransport::new(base, None, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_endpoint_paths() {
        let t = transport("https://media.example.com");
        assert_eq!(
            t.endpoint(&["Join", "g-1"]).unwrap().as_str(),
            "https://media.example.com/SyncPlay/VoiceChat/Join/g-1"
        );

        let t = transport("https://media.example.com/jellyfin/");
        assert_eq!(
            t.endpoint(&["Configuration"]).unwrap().as_str(),
            "https://media.example.com/jellyfin/SyncPlay/VoiceChat/Configuration"
        );
    }

    #[test]
    fn test_group_id_is_escaped() {
        let t = transport("https://media.example.com");
        let url = t.endpoint(&["Leave", "a/b c"]).unwrap();
        assert_eq!(url.path(), "/SyncPlay/VoiceChat/Leave/a%2Fb%20c");
    }

    #[test]
    fn test_from_config_requires_server_url() {
        let config = VoiceConfig::default();
        assert!(matches!(
            HttpSignalingTransport::from_config(&config),
            Err(TransportError::NotConfigured("VC_SERVER_URL"))
        ));
    }

    #[test]
    fn test_rejects_non_base_url() {
        assert!(matches!(
            HttpSignalingTransport::new("mailto:voice@example.com", None, Duration::from_secs(1)),
            Err(TransportError::InvalidBaseUrl)
        ));
    }
}
