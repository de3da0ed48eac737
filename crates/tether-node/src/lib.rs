//! # Tether Node
//!
//! Client side of the Tether relay.
//!
//! A [`NodeClient`] holds one WebSocket to the relay, registers its node id
//! with a binary handshake frame, and exchanges envelopes with other nodes by
//! id. The [`transfer`] module drives file transfers over a client.
//!
//! ## Example
//!
//! ```rust,no_run
//! use tether_core::Payload;
//! use tether_node::NodeClient;
//!
//! # async fn example() -> Result<(), tether_node::NodeError> {
//! let client = NodeClient::new("node_1", "ws://localhost:8765/ws");
//! client.connect().await?;
//!
//! let mut payload = Payload::new();
//! payload.insert("message".into(), "hello".into());
//! client.send("node_2", payload).await?;
//!
//! client.disconnect().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod error;
pub mod transfer;

pub use client::{Inbound, NodeClient, NodeState};
pub use error::NodeError;
pub use transfer::{
    SendOptions, SendProgress, SendSummary, TransferOutcome, await_outcome, send_file,
    serve_storage,
};
