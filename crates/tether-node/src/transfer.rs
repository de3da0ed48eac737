//! File transfer over a [`NodeClient`].
//!
//! The sender streams every chunk back-to-back without waiting for
//! acknowledgements, then optionally waits for the receiver's terminal
//! response. The receiver side is a dispatch loop feeding a
//! [`TransferReceiver`].

use crate::client::{Inbound, NodeClient};
use crate::error::NodeError;
use std::path::Path;
use tether_core::{
    Envelope, NodeId, RouteHeader, TransferBody, TransferEnvelope, TransferResponse,
};
use tether_files::{ChunkStream, FileChunker, TransferReceiver};

/// Options for [`send_file`]
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Name to store the file under; defaults to the path's file name
    pub filename: Option<String>,
    /// Chunk size
    pub chunker: FileChunker,
}

/// Progress reported after each data chunk is queued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendProgress {
    /// Index of the chunk just queued
    pub chunk_index: u64,
    /// Bytes queued so far
    pub bytes_sent: u64,
    /// Total file size
    pub file_size: u64,
}

/// What was sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendSummary {
    /// Remote file name
    pub filename: String,
    /// File size in bytes
    pub file_size: u64,
    /// Data chunks sent, excluding EOF
    pub data_chunks: u64,
    /// Declared total carried in every envelope
    pub chunk_total: u64,
}

/// Terminal success reported by the receiver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutcome {
    /// Node that stored the file
    pub receiver: NodeId,
    /// Storage folder id
    pub folder_id: String,
    /// Confirmation text
    pub message: String,
    /// `Chunk received` acknowledgements seen before the terminal response
    pub acks: u64,
}

/// Stream a file to `target`: every data chunk, then EOF
///
/// Returns once the EOF envelope is queued; use [`await_outcome`] for the
/// receiver's verdict. A zero-length file is sent as a lone EOF, which the
/// receiver answers with "File transfer not found".
///
/// # Errors
///
/// Returns [`NodeError::NotConnected`] if the client is not registered, and
/// I/O or name errors from opening the file.
pub async fn send_file(
    client: &NodeClient,
    path: impl AsRef<Path>,
    target: &str,
    options: &SendOptions,
    mut on_progress: impl FnMut(SendProgress),
) -> Result<SendSummary, NodeError> {
    if !client.is_connected().await {
        return Err(NodeError::NotConnected);
    }

    let path = path.as_ref();
    let mut stream = match &options.filename {
        Some(name) => {
            ChunkStream::open_as(path, name, client.node_id(), target, &options.chunker).await?
        }
        None => ChunkStream::open(path, client.node_id(), target, &options.chunker).await?,
    };

    tracing::info!(
        filename = stream.filename(),
        to = target,
        size = stream.file_size(),
        chunk_total = stream.chunk_total(),
        "sending file"
    );

    let mut data_chunks = 0;
    while let Some(envelope) = stream.next().await? {
        let chunk_index = match &envelope.body {
            TransferBody::WriteStorage(params) if !params.file_data.is_eof() => {
                Some(params.chunk_index)
            }
            _ => None,
        };

        client.send_envelope(&envelope.into()).await?;

        if let Some(chunk_index) = chunk_index {
            data_chunks += 1;
            on_progress(SendProgress {
                chunk_index,
                bytes_sent: stream.bytes_read(),
                file_size: stream.file_size(),
            });
        }
    }

    tracing::debug!(filename = stream.filename(), data_chunks, "EOF sent");

    Ok(SendSummary {
        filename: stream.filename().to_string(),
        file_size: stream.file_size(),
        data_chunks,
        chunk_total: stream.chunk_total(),
    })
}

/// Wait for the first terminal transfer response
///
/// Progress acknowledgements are counted; other traffic is skipped.
///
/// # Errors
///
/// Returns [`NodeError::Remote`] if the receiver reported an error and
/// [`NodeError::ConnectionClosed`] if the connection ended first.
pub async fn await_outcome(client: &NodeClient) -> Result<TransferOutcome, NodeError> {
    let mut acks = 0;

    while let Some(item) = client.recv().await {
        let envelope = match item {
            Inbound::Envelope(Envelope::Transfer(envelope)) => envelope,
            Inbound::Envelope(Envelope::Message(message)) => {
                tracing::debug!(from = %message.source, "ignoring message while awaiting transfer outcome");
                continue;
            }
            Inbound::Undecodable { error, .. } => {
                tracing::warn!(%error, "ignoring undecodable frame while awaiting transfer outcome");
                continue;
            }
        };

        match envelope.body {
            TransferBody::Response(TransferResponse::Progress { .. }) => acks += 1,
            TransferBody::Response(TransferResponse::Stored { message, folder_id }) => {
                tracing::info!(from = %envelope.source_node, %folder_id, acks, "transfer stored");
                return Ok(TransferOutcome {
                    receiver: envelope.source_node,
                    folder_id,
                    message,
                    acks,
                });
            }
            TransferBody::Response(TransferResponse::Failed { error }) => {
                tracing::warn!(from = %envelope.source_node, %error, "transfer failed remotely");
                return Err(NodeError::Remote(error));
            }
            TransferBody::WriteStorage(_) => {
                tracing::debug!(from = %envelope.source_node, "ignoring incoming chunk while sending");
            }
        }
    }

    Err(NodeError::ConnectionClosed)
}

/// Serve incoming `write_storage` requests until the connection ends
///
/// Every request gets a reply through `client`. Undecodable frames whose
/// source can still be read are answered with an error response. Generic
/// messages are logged.
///
/// # Errors
///
/// Currently always returns `Ok` once the connection has ended; failed
/// replies are logged.
pub async fn serve_storage(
    client: &NodeClient,
    receiver: &TransferReceiver,
) -> Result<(), NodeError> {
    tracing::info!(
        node_id = client.node_id(),
        root = %receiver.layout().root().display(),
        "serving write_storage"
    );

    while let Some(item) = client.recv().await {
        let reply = match item {
            Inbound::Envelope(Envelope::Transfer(envelope)) => {
                receiver.handle_envelope(&envelope).await
            }
            Inbound::Envelope(Envelope::Message(message)) => {
                tracing::info!(
                    from = %message.source,
                    keys = ?message.payload.keys().collect::<Vec<_>>(),
                    "message received"
                );
                None
            }
            Inbound::Undecodable {
                route: Some(RouteHeader {
                    source: Some(source),
                    ..
                }),
                error,
            } => Some(TransferEnvelope {
                source_node: client.node_id().to_string(),
                target_node: source,
                body: TransferBody::Response(TransferResponse::Failed {
                    error: error.to_string(),
                }),
            }),
            Inbound::Undecodable { error, .. } => {
                tracing::warn!(%error, "dropping undecodable frame with no source");
                None
            }
        };

        if let Some(reply) = reply {
            if let Err(e) = client.send_envelope(&reply.into()).await {
                tracing::warn!(error = %e, "failed to send transfer reply");
            }
        }
    }

    tracing::info!(node_id = client.node_id(), "connection ended, storage service stopped");
    Ok(())
}
