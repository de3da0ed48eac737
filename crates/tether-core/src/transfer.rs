//! Textual file-transfer envelopes.
//!
//! A transfer envelope is a JSON object sent as a WebSocket text frame:
//!
//! ```text
//! { "source_node": "node_1", "target_node": "node_2", "path": "write_storage",
//!   "params": { "filename": "a.png", "file_data": "<base64|EOF>",
//!               "chunk_index": 0, "chunk_total": 3 } }
//! ```
//!
//! Responses travel back with source and target swapped, no `path`, and one of
//! three parameter shapes (see [`TransferResponse`]).

use crate::error::ProtocolError;
use crate::wire::NodeId;
use crate::{EOF_MARKER, WRITE_STORAGE_PATH};
use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// File-transfer envelope (textual wire variant)
#[derive(Debug, Clone, PartialEq)]
pub struct TransferEnvelope {
    /// Originating node
    pub source_node: NodeId,
    /// Destination node
    pub target_node: NodeId,
    /// Typed body, selected by the wire `path`
    pub body: TransferBody,
}

/// Body of a transfer envelope, discriminated by `path`
#[derive(Debug, Clone, PartialEq)]
pub enum TransferBody {
    /// `path = "write_storage"`: one chunk or the EOF marker
    WriteStorage(WriteStorage),
    /// No `path`: status reported back to the sender
    Response(TransferResponse),
}

/// Parameters of a `write_storage` request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteStorage {
    /// Name the file is stored under on the receiver
    pub filename: String,
    /// Chunk bytes, or the end-of-file sentinel
    pub file_data: ChunkData,
    /// Zero-based position of this chunk (informational, never validated)
    pub chunk_index: u64,
    /// Declared number of chunks (informational, never validated)
    pub chunk_total: u64,
}

/// Contents of the `file_data` field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkData {
    /// Raw chunk bytes, base64 on the wire
    Bytes(Vec<u8>),
    /// The literal `"EOF"` sentinel
    Eof,
}

impl ChunkData {
    /// Parse the wire representation
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidChunkData`] if the value is not valid base64.
    pub fn from_wire(raw: &str) -> Result<Self, ProtocolError> {
        if raw == EOF_MARKER {
            return Ok(ChunkData::Eof);
        }
        STANDARD
            .decode(raw)
            .map(ChunkData::Bytes)
            .map_err(|e| ProtocolError::InvalidChunkData(e.to_string()))
    }

    /// Wire representation: base64 for bytes, `"EOF"` for the sentinel
    #[must_use]
    pub fn to_wire(&self) -> String {
        match self {
            ChunkData::Bytes(bytes) => STANDARD.encode(bytes),
            ChunkData::Eof => EOF_MARKER.to_string(),
        }
    }

    /// True for the end-of-file sentinel
    #[must_use]
    pub fn is_eof(&self) -> bool {
        matches!(self, ChunkData::Eof)
    }
}

impl Serialize for ChunkData {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_wire())
    }
}

impl<'de> Deserialize<'de> for ChunkData {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        ChunkData::from_wire(&raw).map_err(serde::de::Error::custom)
    }
}

/// Status reported by a receiver for a `write_storage` request
///
/// Untagged on the wire: the parameter keys select the variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TransferResponse {
    /// `{ "message": ..., "folder_id": ... }` - transfer finalized
    Stored {
        /// Human-readable confirmation
        message: String,
        /// Storage folder the file was materialized under
        folder_id: String,
    },
    /// `{ "error": ... }` - transfer failed
    Failed {
        /// Failure description
        error: String,
    },
    /// `{ "status": ... }` - intermediate chunk acknowledgement
    Progress {
        /// Status text (`"Chunk received"`)
        status: String,
    },
}

impl TransferResponse {
    /// Acknowledgement sent for every accepted data chunk
    #[must_use]
    pub fn chunk_received() -> Self {
        TransferResponse::Progress {
            status: "Chunk received".to_string(),
        }
    }

    /// True for `Stored` and `Failed`, which end a sender's wait
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransferResponse::Progress { .. })
    }

    /// Result view of a terminal response; `None` while still in progress
    ///
    /// `Ok` carries the folder id, `Err` the remote error text.
    #[must_use]
    pub fn outcome(&self) -> Option<Result<&str, &str>> {
        match self {
            TransferResponse::Stored { folder_id, .. } => Some(Ok(folder_id.as_str())),
            TransferResponse::Failed { error } => Some(Err(error.as_str())),
            TransferResponse::Progress { .. } => None,
        }
    }
}

/// JSON object as it appears on the wire
#[derive(Serialize, Deserialize)]
struct TextFrame {
    source_node: NodeId,
    target_node: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    path: Option<String>,
    #[serde(default)]
    params: serde_json::Value,
}

impl TransferEnvelope {
    /// Build a `write_storage` request
    #[must_use]
    pub fn write_storage(
        source_node: impl Into<NodeId>,
        target_node: impl Into<NodeId>,
        params: WriteStorage,
    ) -> Self {
        Self {
            source_node: source_node.into(),
            target_node: target_node.into(),
            body: TransferBody::WriteStorage(params),
        }
    }

    /// Build the response to this envelope: source and target swapped
    #[must_use]
    pub fn reply(&self, response: TransferResponse) -> Self {
        Self {
            source_node: self.target_node.clone(),
            target_node: self.source_node.clone(),
            body: TransferBody::Response(response),
        }
    }

    /// Wire `path` of this envelope
    #[must_use]
    pub fn path(&self) -> Option<&'static str> {
        match self.body {
            TransferBody::WriteStorage(_) => Some(WRITE_STORAGE_PATH),
            TransferBody::Response(_) => None,
        }
    }

    /// Serialize to a JSON text frame
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Encode`] if serialization fails.
    pub fn to_text(&self) -> Result<String, ProtocolError> {
        let params = match &self.body {
            TransferBody::WriteStorage(params) => serde_json::to_value(params),
            TransferBody::Response(response) => serde_json::to_value(response),
        }
        .map_err(|e| ProtocolError::Encode(e.to_string()))?;

        let frame = TextFrame {
            source_node: self.source_node.clone(),
            target_node: self.target_node.clone(),
            path: self.path().map(str::to_string),
            params,
        };

        serde_json::to_string(&frame).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Parse a JSON text frame, dispatching on `path`
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] for malformed JSON, missing keys, an unknown
    /// `path`, or parameters that do not match the selected body.
    pub fn from_text(text: &str) -> Result<Self, ProtocolError> {
        let frame: TextFrame = serde_json::from_str(text)?;

        let body = match frame.path.as_deref() {
            Some(WRITE_STORAGE_PATH) => {
                TransferBody::WriteStorage(serde_json::from_value(frame.params)?)
            }
            Some(other) => return Err(ProtocolError::UnknownPath(other.to_string())),
            None => TransferBody::Response(serde_json::from_value(frame.params)?),
        };

        Ok(Self {
            source_node: frame.source_node,
            target_node: frame.target_node,
            body,
        })
    }
}
