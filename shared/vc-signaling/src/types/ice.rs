//! ICE Configuration Types

use serde::{Deserialize, Deserializer, Serialize};

/// A STUN or TURN server entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct IceServer {
    /// Server URLs. The relay may send a single string or a list.
    #[serde(alias = "urls", deserialize_with = "one_or_many")]
    pub urls: Vec<String>,
    /// Username for TURN servers.
    #[serde(default, alias = "username", skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Credential for TURN servers.
    #[serde(default, alias = "credential", skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
    /// Credential type (`password` or `oauth`).
    #[serde(
        default,
        alias = "credentialType",
        skip_serializing_if = "Option::is_none"
    )]
    pub credential_type: Option<String>,
}

impl IceServer {
    /// A credential-less STUN entry.
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
            credential_type: None,
        }
    }
}

/// Response of the `getConfiguration` RPC.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VoiceChatConfiguration {
    /// ICE servers to use for every peer connection.
    #[serde(default, alias = "iceServers")]
    pub ice_servers: Vec<IceServer>,
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(url) => vec![url],
        OneOrMany::Many(urls) => urls,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls_accept_string_or_list() {
        let json = r#"{"IceServers":[
            {"Urls":"stun:stun.example.org:3478"},
            {"Urls":["turn:turn.example.org"],"Username":"u","Credential":"p","CredentialType":"password"}
        ]}"#;
        let config: VoiceChatConfiguration = serde_json::from_str(json).unwrap();
        assert_eq!(config.ice_servers.len(), 2);
        assert_eq!(config.ice_servers[0], IceServer::stun("stun:stun.example.org:3478"));
        assert_eq!(config.ice_servers[1].username.as_deref(), Some("u"));
        assert_eq!(
            config.ice_servers[1].credential_type.as_deref(),
            Some("password")
        );
    }

    #[test]
    fn test_missing_servers_is_empty() {
        let config: VoiceChatConfiguration = serde_json::from_str("{}").unwrap();
        assert!(config.ice_servers.is_empty());
    }
}
