//! Error types for session-core
//!
//! Errors detected synchronously (closed session, unknown participant) fail
//! the call immediately. Pipeline creation outcomes are resolved through the
//! lifecycle manager and converted into [`SessionError::SessionUnavailable`]
//! at the point they are awaited.

use thiserror::Error;

use crate::api::types::SessionId;

/// Result type for session operations
pub type Result<T> = std::result::Result<T, SessionError>;

/// Errors surfaced by [`crate::session::Session`] operations
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    /// Operation attempted after the session was closed
    #[error("Session '{session_id}' is closed")]
    SessionClosed { session_id: SessionId },

    /// No participant with the given private id is part of the session
    #[error("Participant with private id {private_id} not found in session '{session_id}'")]
    ParticipantNotFound {
        session_id: SessionId,
        private_id: String,
    },

    /// The private id is already present, or has already left this session
    #[error("Participant with private id {private_id} cannot join session '{session_id}' twice")]
    DuplicateParticipant {
        session_id: SessionId,
        private_id: String,
    },

    /// The media pipeline could not be created
    #[error("Unable to create media pipeline for session '{session_id}': {reason}")]
    SessionUnavailable { session_id: SessionId, reason: String },

    /// The media pipeline could not be released; reported, never returned to callers
    #[error("Could not release media pipeline of session '{session_id}': {reason}")]
    PipelineReleaseFailed { session_id: SessionId, reason: String },

    /// Invalid configuration value
    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

impl SessionError {
    pub fn closed(session_id: &SessionId) -> Self {
        Self::SessionClosed {
            session_id: session_id.clone(),
        }
    }

    pub fn participant_not_found(session_id: &SessionId, private_id: &str) -> Self {
        Self::ParticipantNotFound {
            session_id: session_id.clone(),
            private_id: private_id.to_string(),
        }
    }

    pub fn duplicate_participant(session_id: &SessionId, private_id: &str) -> Self {
        Self::DuplicateParticipant {
            session_id: session_id.clone(),
            private_id: private_id.to_string(),
        }
    }

    pub fn unavailable(session_id: &SessionId, reason: impl Into<String>) -> Self {
        Self::SessionUnavailable {
            session_id: session_id.clone(),
            reason: reason.into(),
        }
    }

    pub fn release_failed(session_id: &SessionId, reason: impl Into<String>) -> Self {
        Self::PipelineReleaseFailed {
            session_id: session_id.clone(),
            reason: reason.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// True for errors that leave the session permanently unusable
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::SessionClosed { .. } | Self::SessionUnavailable { .. })
    }
}
