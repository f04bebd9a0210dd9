use thiserror::Error;

/// Errors from the relay or media transport
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Send failed: {0}")]
    SendFailed(String),
    #[error("Disconnected")]
    Disconnected,
    #[error("Not connected")]
    NotConnected,
    #[error("Codec error: {0}")]
    Codec(String),
}

/// Everything that can go wrong while setting up or running a call
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Neither camera nor screen capture yielded a media source
    #[error("Media capture unavailable: {0}")]
    CapabilityUnavailable(String),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    /// A message arrived that the session cannot accept in its current state
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Room {0} is full")]
    RoomFull(String),
    #[error("Negotiation failed: {0}")]
    NegotiationFailure(String),
    #[error("Timed out: {0}")]
    Timeout(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

impl SessionError {
    /// Stray messages are discarded; every other error ends the session.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SessionError::InvalidState(_))
    }

    pub(crate) fn invalid_state(msg: impl Into<String>) -> Self {
        SessionError::InvalidState(msg.into())
    }

    pub(crate) fn negotiation(err: impl std::fmt::Display) -> Self {
        SessionError::NegotiationFailure(err.to_string())
    }
}
