//! # Tether Core
//!
//! Wire format shared by every Tether component.
//!
//! This crate provides:
//! - The textual transfer envelope (`source_node`/`target_node`/`path`/`params`, JSON)
//! - The binary message envelope (`source`/`target`/`payload`, MessagePack)
//! - The binary registration handshake (`node_id`)
//! - A partial route-header decode used by the relay to forward frames untouched
//! - Protocol error types
//!
//! ## Framing
//!
//! ```text
//! ┌──────────────────────────────┐      ┌──────────────────────────────┐
//! │  WireFrame::Text (JSON)      │      │  WireFrame::Binary (msgpack) │
//! │  TransferEnvelope            │      │  Registration | Message      │
//! │   path = "write_storage"     │      │   { source, target, payload }│
//! │   path = none  -> response   │      │                              │
//! └──────────────────────────────┘      └──────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod message;
pub mod transfer;
pub mod wire;

pub use error::ProtocolError;
pub use message::{MessageEnvelope, Payload, Registration};
pub use transfer::{ChunkData, TransferBody, TransferEnvelope, TransferResponse, WriteStorage};
pub use wire::{Envelope, NodeId, RouteHeader, WireFrame};

/// Fixed chunk size used by the file-transfer protocol (256 KiB)
pub const DEFAULT_CHUNK_SIZE: usize = 262_144;

/// `path` tag carried by file-transfer chunk envelopes
pub const WRITE_STORAGE_PATH: &str = "write_storage";

/// `file_data` sentinel marking the end of a transfer
pub const EOF_MARKER: &str = "EOF";

/// Default relay listen port
pub const DEFAULT_RELAY_PORT: u16 = 8765;

/// WebSocket path prefix served by the relay
pub const RELAY_WS_PATH: &str = "/ws";
