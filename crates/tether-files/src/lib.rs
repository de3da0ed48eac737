//! # Tether Files
//!
//! Chunked file transfer over the Tether relay.
//!
//! This crate provides:
//! - Streaming a file as `write_storage` chunk envelopes followed by EOF
//! - Per-(source, filename) receive sessions backed by a scratch file
//! - Finalization into a fresh storage folder, with `.zip` extraction
//! - Idle-session eviction
//!
//! It never touches the network; the node client feeds envelopes in and
//! carries responses out.
//!
//! ## Receive flow
//!
//! ```text
//! chunk ──► session (append to temp/{source}_{filename}.part) ──► "Chunk received"
//! EOF   ──► close scratch ──► {root}/{folder_id}/{filename} ──► unzip? ──► stored
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::time::Duration;

pub mod chunker;
pub mod error;
pub mod receiver;
pub mod session;
pub mod storage;

pub use chunker::{ChunkStream, FileChunker, chunk_total};
pub use error::TransferError;
pub use receiver::{ReceiverConfig, TransferReceiver};
pub use session::{SessionKey, SessionState, TransferSession};
pub use storage::{StorageLayout, StoredTransfer};
pub use tether_core::DEFAULT_CHUNK_SIZE;

/// Confirmation text carried by a `Stored` response
pub const STORED_MESSAGE: &str = "Files written to storage";

/// Scratch directory name under the storage root
pub const SCRATCH_DIR: &str = "temp";

/// Sessions with no chunk for this long are evicted (10 minutes)
pub const DEFAULT_SESSION_IDLE_TIMEOUT: Duration = Duration::from_secs(600);
