//! File-transfer errors.

use tether_core::{NodeId, ProtocolError};
use thiserror::Error;

/// Errors raised while sending or receiving a file
#[derive(Debug, Error)]
pub enum TransferError {
    /// EOF arrived with no open session for (source, filename)
    ///
    /// The display text is sent verbatim to the sender.
    #[error("File transfer not found")]
    TransferNotFound {
        /// Sending node
        source_node: NodeId,
        /// Requested filename
        filename: String,
    },

    /// Scratch or storage filesystem failure
    #[error("storage error: {context}: {source}")]
    Storage {
        /// Operation that failed
        context: &'static str,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// `.zip` archive could not be opened or extracted
    #[error("archive extraction failed: {0}")]
    Archive(String),

    /// Filename or node id would escape the storage root
    #[error("invalid name: {0:?}")]
    InvalidName(String),

    /// Local I/O failure reading a file to send
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Envelope could not be encoded or decoded
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Wrap an I/O error with the storage operation that raised it
pub(crate) fn storage(context: &'static str) -> impl FnOnce(std::io::Error) -> TransferError {
    move |source| TransferError::Storage { context, source }
}
