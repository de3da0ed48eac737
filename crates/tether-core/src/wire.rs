//! Transport frames and the envelope sum type.

use crate::error::ProtocolError;
use crate::message::MessageEnvelope;
use crate::transfer::TransferEnvelope;
use serde::Deserialize;

/// Node identifier, chosen by each participant
pub type NodeId = String;

/// One transport frame, independent of the WebSocket library in use
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    /// UTF-8 text frame (transfer envelopes)
    Text(String),
    /// Binary frame (registration and message envelopes)
    Binary(Vec<u8>),
}

impl WireFrame {
    /// Frame size in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            WireFrame::Text(text) => text.len(),
            WireFrame::Binary(bytes) => bytes.len(),
        }
    }

    /// True if the frame carries no bytes
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Frame kind name, for logging
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            WireFrame::Text(_) => "text",
            WireFrame::Binary(_) => "binary",
        }
    }
}

/// Any envelope a node can send or receive
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// File-transfer traffic (text frames)
    Transfer(TransferEnvelope),
    /// Generic node-to-node traffic (binary frames)
    Message(MessageEnvelope),
}

impl Envelope {
    /// Originating node id
    #[must_use]
    pub fn source(&self) -> &str {
        match self {
            Envelope::Transfer(env) => &env.source_node,
            Envelope::Message(env) => &env.source,
        }
    }

    /// Destination node id
    #[must_use]
    pub fn target(&self) -> &str {
        match self {
            Envelope::Transfer(env) => &env.target_node,
            Envelope::Message(env) => &env.target,
        }
    }

    /// Encode into the frame kind of its wire variant
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Encode`] if serialization fails.
    pub fn encode(&self) -> Result<WireFrame, ProtocolError> {
        match self {
            Envelope::Transfer(env) => env.to_text().map(WireFrame::Text),
            Envelope::Message(env) => env.to_bytes().map(WireFrame::Binary),
        }
    }

    /// Decode a frame: text frames are transfer envelopes, binary frames messages
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] if the frame does not hold a valid envelope.
    pub fn decode(frame: &WireFrame) -> Result<Self, ProtocolError> {
        match frame {
            WireFrame::Text(text) => TransferEnvelope::from_text(text).map(Envelope::Transfer),
            WireFrame::Binary(bytes) => MessageEnvelope::from_bytes(bytes).map(Envelope::Message),
        }
    }
}

impl From<TransferEnvelope> for Envelope {
    fn from(env: TransferEnvelope) -> Self {
        Envelope::Transfer(env)
    }
}

impl From<MessageEnvelope> for Envelope {
    fn from(env: MessageEnvelope) -> Self {
        Envelope::Message(env)
    }
}

/// Addressing fields of a frame, decoded without touching the rest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteHeader {
    /// Claimed source, if present
    pub source: Option<NodeId>,
    /// Destination node id
    pub target: NodeId,
}

#[derive(Deserialize)]
struct TextRoute {
    #[serde(default)]
    source_node: Option<NodeId>,
    target_node: NodeId,
}

#[derive(Deserialize)]
struct BinaryRoute {
    #[serde(default)]
    source: Option<NodeId>,
    target: NodeId,
}

impl RouteHeader {
    /// Read only the addressing fields of either wire variant
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] if the frame is undecodable or lacks a target.
    pub fn peek(frame: &WireFrame) -> Result<Self, ProtocolError> {
        match frame {
            WireFrame::Text(text) => {
                let route: TextRoute = serde_json::from_str(text)?;
                Ok(Self {
                    source: route.source_node,
                    target: route.target_node,
                })
            }
            WireFrame::Binary(bytes) => {
                let route: BinaryRoute = rmp_serde::from_slice(bytes)?;
                Ok(Self {
                    source: route.source,
                    target: route.target,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Payload;
    use crate::transfer::{ChunkData, WriteStorage};

    fn transfer() -> Envelope {
        TransferEnvelope::write_storage(
            "node_1",
            "node_2",
            WriteStorage {
                filename: "data.bin".to_string(),
                file_data: ChunkData::Bytes(vec![7; 32]),
                chunk_index: 0,
                chunk_total: 1,
            },
        )
        .into()
    }

    #[test]
    fn test_envelope_frame_kinds() {
        assert_eq!(transfer().encode().unwrap().kind(), "text");

        let msg: Envelope = MessageEnvelope::new("a", "b", Payload::new()).into();
        assert_eq!(msg.encode().unwrap().kind(), "binary");
    }

    #[test]
    fn test_envelope_decode_roundtrip() {
        let env = transfer();
        let frame = env.encode().unwrap();
        assert_eq!(Envelope::decode(&frame).unwrap(), env);
    }

    #[test]
    fn test_route_header_text() {
        let frame = transfer().encode().unwrap();
        let route = RouteHeader::peek(&frame).unwrap();
        assert_eq!(route.source.as_deref(), Some("node_1"));
        assert_eq!(route.target, "node_2");
    }

    #[test]
    fn test_route_header_binary() {
        let frame = Envelope::from(MessageEnvelope::new("a", "b", Payload::new()))
            .encode()
            .unwrap();
        let route = RouteHeader::peek(&frame).unwrap();
        assert_eq!(route.target, "b");
    }

    #[test]
    fn test_route_header_ignores_unknown_path() {
        let frame = WireFrame::Text(
            r#"{"source_node":"a","target_node":"b","path":"whatever","params":{"x":1}}"#
                .to_string(),
        );
        assert_eq!(RouteHeader::peek(&frame).unwrap().target, "b");
        assert!(Envelope::decode(&frame).is_err());
    }

    #[test]
    fn test_route_header_missing_target() {
        let frame = WireFrame::Text(r#"{"source_node":"a"}"#.to_string());
        assert!(RouteHeader::peek(&frame).is_err());

        let frame = WireFrame::Binary(vec![0x00, 0x01]);
        assert!(RouteHeader::peek(&frame).is_err());
    }
}
