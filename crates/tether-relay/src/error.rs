//! Relay errors.

use tether_core::ProtocolError;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Errors that end a single relay connection or the relay itself
#[derive(Debug, Error)]
pub enum RelayError {
    /// Socket I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// WebSocket handshake or transport failure
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// Registration frame could not be decoded
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// No registration frame within the handshake timeout
    #[error("registration timed out")]
    HandshakeTimeout,

    /// Peer closed before registering
    #[error("connection closed before registration")]
    ClosedBeforeRegistration,

    /// First frame was not a binary registration
    #[error("expected binary registration frame, got {0} frame")]
    UnexpectedFrame(&'static str),

    /// Empty node id
    #[error("invalid node id")]
    InvalidNodeId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            RelayError::HandshakeTimeout.to_string(),
            "registration timed out"
        );
        assert_eq!(
            RelayError::UnexpectedFrame("text").to_string(),
            "expected binary registration frame, got text frame"
        );
    }

    #[test]
    fn test_from_protocol_error() {
        let err: RelayError = ProtocolError::UnknownPath("x".to_string()).into();
        assert!(matches!(err, RelayError::Protocol(_)));
    }
}
