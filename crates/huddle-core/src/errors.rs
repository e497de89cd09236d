use thiserror::Error;

use crate::session::SessionState;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    /// A request/response round trip came back without a payload.
    #[error("signaling `{event}` failed: {reason}")]
    Signaling { event: &'static str, reason: String },
    #[error("media negotiation failed: {0}")]
    Negotiation(String),
    #[error("`{operation}` is not allowed while {state:?}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("local media unavailable: {0}")]
    Media(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<serde_json::Error> for SessionError {
    fn from(e: serde_json::Error) -> Self {
        SessionError::Protocol(e.to_string())
    }
}
