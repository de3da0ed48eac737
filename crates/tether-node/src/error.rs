//! Node client errors.

use tether_core::ProtocolError;
use tether_files::TransferError;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Errors returned by [`NodeClient`](crate::NodeClient) and the transfer glue
#[derive(Debug, Error)]
pub enum NodeError {
    /// Send attempted while not registered with the relay
    #[error("Node is not connected")]
    NotConnected,

    /// Opening the WebSocket or sending the registration failed
    #[error("failed to connect to relay: {0}")]
    Connect(#[source] tungstenite::Error),

    /// Transport failure on an established connection
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// Envelope could not be encoded
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Local file-transfer failure
    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    /// Receiver answered with an error response
    #[error("remote node reported: {0}")]
    Remote(String),

    /// Connection ended before a terminal transfer response arrived
    #[error("connection closed before transfer completed")]
    ConnectionClosed,
}
