//! Public types shared by the session API and its collaborators

use serde::{Deserialize, Serialize};

/// Public id reserved for the server-side recorder participant.
///
/// Joins and leaves of this identity never produce call-detail records.
pub const RECORDER_PARTICIPANT_PUBLIC_ID: &str = "RECORDER";

/// Unique identifier of a session
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(format!("session-{}", uuid::Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Identity of one connected party.
///
/// The private id is internal to the server and is never sent to other
/// participants; peers only ever see the public id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Participant {
    pub private_id: String,
    pub public_id: String,
}

impl Participant {
    pub fn new(private_id: impl Into<String>, public_id: impl Into<String>) -> Self {
        Self {
            private_id: private_id.into(),
            public_id: public_id.into(),
        }
    }
}

impl std::fmt::Display for Participant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[private={}, public={}]", self.private_id, self.public_id)
    }
}

/// ICE candidate gathered by the media engine for a participant endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    pub sdp_mid: String,
    pub sdp_m_line_index: u32,
}

/// Membership state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// No participant has joined yet
    Inactive,
    /// At least one join succeeded and the session is not closed
    Active,
    /// Terminal
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Inactive => write!(f, "Inactive"),
            SessionState::Active => write!(f, "Active"),
            SessionState::Closed => write!(f, "Closed"),
        }
    }
}
