//! Signal Protocol
//!
//! Signals travel as `{GroupId, FromSessionId, ToSessionId, Type, Data}`
//! where `Data` is itself a JSON document encoded as a string. Decoding turns
//! that loose form into [`InboundSignal`], which callers match exhaustively.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{GroupId, IceCandidate, Participant, SessionDescription, SessionId};

/// Signal type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalType {
    UserJoined,
    UserLeft,
    #[serde(alias = "Muted")]
    UserMuted,
    #[serde(alias = "Unmuted")]
    UserUnmuted,
    Offer,
    Answer,
    IceCandidate,
    #[serde(other)]
    Unknown,
}

/// Signal as delivered by the push channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Signal {
    pub group_id: GroupId,
    pub from_session_id: SessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_session_id: Option<SessionId>,
    #[serde(rename = "Type")]
    pub signal_type: SignalType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

/// Decoded inbound signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundSignal {
    UserJoined(Participant),
    UserLeft(Participant),
    /// `UserMuted` and `UserUnmuted`; the payload carries the new flag.
    MuteChanged(Participant),
    Offer(SessionDescription),
    Answer(SessionDescription),
    IceCandidate(IceCandidate),
}

impl Signal {
    /// Build a roster signal (`UserJoined`, `UserLeft`, `UserMuted`, `UserUnmuted`).
    pub fn roster(
        group_id: GroupId,
        signal_type: SignalType,
        participant: &Participant,
    ) -> Result<Self> {
        Ok(Self {
            group_id,
            from_session_id: participant.session_id.clone(),
            to_session_id: None,
            signal_type,
            data: Some(serde_json::to_string(participant)?),
        })
    }

    /// Decode the payload according to the signal type.
    pub fn decode(&self) -> Result<InboundSignal> {
        match self.signal_type {
            SignalType::UserJoined => self.payload().map(InboundSignal::UserJoined),
            SignalType::UserLeft => self.payload().map(InboundSignal::UserLeft),
            SignalType::UserMuted => {
                let mut participant: Participant = self.payload()?;
                participant.is_muted = true;
                Ok(InboundSignal::MuteChanged(participant))
            }
            SignalType::UserUnmuted => {
                let mut participant: Participant = self.payload()?;
                participant.is_muted = false;
                Ok(InboundSignal::MuteChanged(participant))
            }
            SignalType::Offer => self.payload().map(InboundSignal::Offer),
            SignalType::Answer => self.payload().map(InboundSignal::Answer),
            SignalType::IceCandidate => self.payload().map(InboundSignal::IceCandidate),
            SignalType::Unknown => Err(Error::UnknownSignalType),
        }
    }

    fn payload<T: DeserializeOwned>(&self) -> Result<T> {
        let data = self
            .data
            .as_deref()
            .filter(|d| !d.trim().is_empty())
            .ok_or(Error::MissingPayload(self.signal_type))?;

        serde_json::from_str(data).map_err(|source| Error::InvalidPayload {
            signal_type: self.signal_type,
            source,
        })
    }
}

/// Payload of a peer-to-peer signal produced by the local connection manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerMessage {
    Offer(SessionDescription),
    Answer(SessionDescription),
    IceCandidate(IceCandidate),
}

impl PeerMessage {
    pub fn signal_type(&self) -> SignalType {
        match self {
            Self::Offer(_) => SignalType::Offer,
            Self::Answer(_) => SignalType::Answer,
            Self::IceCandidate(_) => SignalType::IceCandidate,
        }
    }

    fn to_data(&self) -> Result<String> {
        Ok(match self {
            Self::Offer(desc) | Self::Answer(desc) => serde_json::to_string(desc)?,
            Self::IceCandidate(candidate) => serde_json::to_string(candidate)?,
        })
    }
}

/// Outbound signal posted to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SignalRequest {
    pub group_id: GroupId,
    /// `None` broadcasts to the whole group.
    pub to_session_id: Option<SessionId>,
    #[serde(rename = "Type")]
    pub signal_type: SignalType,
    pub data: String,
}

impl SignalRequest {
    /// Address `message` to a single peer.
    pub fn to_peer(group_id: GroupId, to: SessionId, message: &PeerMessage) -> Result<Self> {
        Ok(Self {
            group_id,
            to_session_id: Some(to),
            signal_type: message.signal_type(),
            data: message.to_data()?,
        })
    }

    /// The signal a relay delivers for this request.
    pub fn into_signal(self, from_session_id: SessionId) -> Signal {
        Signal {
            group_id: self.group_id,
            from_session_id,
            to_session_id: self.to_session_id,
            signal_type: self.signal_type,
            data: Some(self.data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SdpKind;

    fn signal(json: &str) -> Signal {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_decode_user_joined() {
        let s = signal(
            r#"{"GroupId":"g","FromSessionId":"b","Type":"UserJoined",
                "Data":"{\"SessionId\":\"b\",\"UserName\":\"bob\",\"IsMuted\":false}"}"#,
        );
        match s.decode().unwrap() {
            InboundSignal::UserJoined(p) => assert_eq!(p.user_name, "bob"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_mute_aliases_force_flag() {
        let s = signal(
            r#"{"GroupId":"g","FromSessionId":"b","Type":"Muted",
                "Data":"{\"SessionId\":\"b\",\"UserName\":\"bob\"}"}"#,
        );
        assert_eq!(s.signal_type, SignalType::UserMuted);
        match s.decode().unwrap() {
            InboundSignal::MuteChanged(p) => assert!(p.is_muted),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_decode_offer() {
        let s = signal(
            r#"{"GroupId":"g","FromSessionId":"a","ToSessionId":"b","Type":"Offer",
                "Data":"{\"type\":\"offer\",\"sdp\":\"v=0\"}"}"#,
        );
        match s.decode().unwrap() {
            InboundSignal::Offer(desc) => {
                assert_eq!(desc.kind, SdpKind::Offer);
                assert_eq!(desc.sdp, "v=0");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let s = signal(r#"{"GroupId":"g","FromSessionId":"a","Type":"Wave"}"#);
        assert_eq!(s.signal_type, SignalType::Unknown);
        assert!(matches!(s.decode(), Err(Error::UnknownSignalType)));
    }

    #[test]
    fn test_missing_and_invalid_payload() {
        let s = signal(r#"{"GroupId":"g","FromSessionId":"a","Type":"Answer"}"#);
        assert!(matches!(
            s.decode(),
            Err(Error::MissingPayload(SignalType::Answer))
        ));

        let s = signal(r#"{"GroupId":"g","FromSessionId":"a","Type":"Answer","Data":"[1,2]"}"#);
        assert!(matches!(s.decode(), Err(Error::InvalidPayload { .. })));
    }

    #[test]
    fn test_request_wire_shape() {
        let request = SignalRequest::to_peer(
            GroupId::from("g"),
            SessionId::from("b"),
            &PeerMessage::Answer(SessionDescription::answer("v=0")),
        )
        .unwrap();
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["GroupId"], "g");
        assert_eq!(json["ToSessionId"], "b");
        assert_eq!(json["Type"], "Answer");
        assert_eq!(json["Data"], r#"{"type":"answer","sdp":"v=0"}"#);

        let delivered = request.into_signal(SessionId::from("a"));
        assert!(matches!(delivered.decode(), Ok(InboundSignal::Answer(_))));
    }
}
