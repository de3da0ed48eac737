//! Binary envelopes: generic node-to-node messages and the registration handshake.
//!
//! Both are MessagePack maps with named keys, sent as WebSocket binary frames.

use crate::error::ProtocolError;
use crate::wire::NodeId;
use serde::{Deserialize, Serialize};

/// Opaque string-keyed payload carried by a [`MessageEnvelope`]
///
/// Values must be JSON-representable (strings, numbers, booleans, arrays, maps).
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Generic node-to-node message (binary wire variant)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    /// Originating node
    pub source: NodeId,
    /// Destination node; the only field the relay reads
    pub target: NodeId,
    /// Application payload, never inspected by the relay
    #[serde(default)]
    pub payload: Payload,
}

impl MessageEnvelope {
    /// Create a new message envelope
    #[must_use]
    pub fn new(source: impl Into<NodeId>, target: impl Into<NodeId>, payload: Payload) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            payload,
        }
    }

    /// Serialize to a MessagePack map
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Encode`] if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    /// Deserialize from MessagePack
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedBinary`] on malformed input or missing keys.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

/// First frame a node sends to claim its id on the relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    /// Id the connection is registered under
    pub node_id: NodeId,
}

impl Registration {
    /// Create a registration for `node_id`
    #[must_use]
    pub fn new(node_id: impl Into<NodeId>) -> Self {
        Self {
            node_id: node_id.into(),
        }
    }

    /// Serialize to a MessagePack map
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Encode`] if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    /// Deserialize from MessagePack
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedBinary`] on malformed input or a missing `node_id`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
