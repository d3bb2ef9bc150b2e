//! Group and Participant Types

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a synchronized-playback group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(String);

impl GroupId {
    /// Wrap a raw group identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GroupId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Session identifier of one voice chat member.
///
/// Identifiers are compared as plain strings. The ordering is stable for the
/// lifetime of a session and decides which side of a pair sends the initial
/// offer, see [`SessionId::initiates`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Wrap a raw session identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether `self` must create the initial offer towards `remote`.
    ///
    /// Only the lexicographically smaller side initiates; for two distinct
    /// identifiers exactly one of `a.initiates(b)` and `b.initiates(a)` holds.
    pub fn initiates(&self, remote: &Self) -> bool {
        self < remote
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Roster entry for a member of a group's voice chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Participant {
    /// Session identifier.
    pub session_id: SessionId,
    /// Display name of the user behind the session.
    #[serde(default)]
    pub user_name: String,
    /// Whether the participant announced themselves muted.
    #[serde(default)]
    pub is_muted: bool,
}

impl Participant {
    /// Create an unmuted participant.
    pub fn new(session_id: impl Into<String>, user_name: impl Into<String>) -> Self {
        Self {
            session_id: SessionId::new(session_id),
            user_name: user_name.into(),
            is_muted: false,
        }
    }
}

/// Response of the `join` RPC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct JoinResponse {
    /// Current roster, possibly including the joining session itself.
    #[serde(default)]
    pub participants: Vec<Participant>,
    /// Session identifier assigned to the caller.
    pub self_session_id: SessionId,
}

impl JoinResponse {
    /// Roster entries other than the caller.
    pub fn others(&self) -> impl Iterator<Item = &Participant> {
        self.participants
            .iter()
            .filter(|p| p.session_id != self.self_session_id)
    }
}
