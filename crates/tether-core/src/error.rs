//! Error types for the Tether wire format.

use thiserror::Error;

/// Envelope encoding and decoding errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Text frame is not a well-formed transfer envelope
    #[error("malformed text envelope: {0}")]
    MalformedText(#[from] serde_json::Error),

    /// Binary frame is not a well-formed MessagePack envelope
    #[error("malformed binary envelope: {0}")]
    MalformedBinary(#[from] rmp_serde::decode::Error),

    /// Envelope could not be serialized
    #[error("failed to encode envelope: {0}")]
    Encode(String),

    /// Text envelope carries a `path` nobody handles
    #[error("unknown path: {0}")]
    UnknownPath(String),

    /// `file_data` is neither base64 nor the EOF marker
    #[error("invalid chunk data: {0}")]
    InvalidChunkData(String),
}

impl From<rmp_serde::encode::Error> for ProtocolError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        ProtocolError::Encode(err.to_string())
    }
}
