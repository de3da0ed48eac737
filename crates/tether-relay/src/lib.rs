//! # Tether Relay
//!
//! Central hub for nodes that cannot reach each other directly.
//!
//! Every node keeps one WebSocket to the relay and registers under a node id.
//! The relay reads only the target id of each frame and forwards the original
//! bytes to the connection registered under that id. Frames for unknown targets
//! are dropped with a warning; the sender is not told.
//!
//! ## Architecture
//!
//! ```text
//!                    ┌─────────────────┐
//!                    │   Relay Hub     │
//!                    │ node id -> conn │
//!                    └────────┬────────┘
//!                             │
//!              ┌──────────────┴──────────────┐
//!              │                              │
//!              ▼                              ▼
//!       ┌─────────────┐                ┌─────────────┐
//!       │   node_1    │                │   node_2    │
//!       │  (NAT'd)    │                │  (NAT'd)    │
//!       └─────────────┘                └─────────────┘
//! ```
//!
//! ## Registration
//!
//! A node registers either by connecting to `/ws/{node_id}`, or by connecting
//! to `/ws` and sending a binary [`Registration`](tether_core::Registration)
//! frame first. A later registration under the same id replaces the earlier one
//! without closing it.
//!
//! ## Example
//!
//! ```rust,no_run
//! use tether_relay::RelayServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let server = RelayServer::bind("0.0.0.0:8765".parse()?).await?;
//! println!("relay on {}", server.local_addr());
//! server.run().await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod registry;
pub mod server;

pub use error::RelayError;
pub use registry::{ConnectionHandle, ConnectionId, ConnectionRegistry, RouteOutcome};
pub use server::{RelayServer, RelayServerConfig};

/// Maximum accepted WebSocket message size (64 MiB)
pub const MAX_MESSAGE_SIZE: usize = 64 << 20;

/// Time a connection on the bare `/ws` path has to send its registration
pub const HANDSHAKE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);
