//! Session error types

use thiserror::Error;

use crate::types::{GroupId, ParticipantId};

/// Errors that can occur while running interview sessions
#[derive(Debug, Error)]
pub enum SessionError {
    /// The session's broadcast cancellation was raised while waiting
    #[error("Cancelled by broadcast signal")]
    Cancelled,

    /// A reply wait is already outstanding for this participant
    #[error("Already waiting for a reply from {0}")]
    WaitPending(ParticipantId),

    /// The reply channel was dropped before a message arrived
    #[error("Reply channel closed")]
    ChannelClosed,

    /// No reply within the configured timeout
    #[error("Timed out waiting for a reply from {0}")]
    ReplyTimeout(ParticipantId),

    /// Too many invalid replies in a row
    #[error("{participant} sent {attempts} invalid replies")]
    RetriesExhausted {
        participant: ParticipantId,
        attempts: u32,
    },

    /// Outbound message delivery failed
    #[error("Transport error: {0}")]
    Transport(#[source] anyhow::Error),

    /// `start` was called twice
    #[error("Session already started")]
    AlreadyStarted,

    /// The group already has an active session
    #[error("A session is already in progress in group {0}")]
    SessionInProgress(GroupId),

    /// No active session for the group
    #[error("No active session in group {0}")]
    NoActiveSession(GroupId),

    /// Density is a percentage
    #[error("Density must be between 0 and 100, got {0}")]
    InvalidDensity(u32),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl SessionError {
    /// Whether this is the broadcast cancellation rather than a real failure
    pub fn is_cancellation(&self) -> bool {
        matches!(self, SessionError::Cancelled)
    }
}
