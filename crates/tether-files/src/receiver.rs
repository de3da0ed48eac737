//! Receiver: routes chunk envelopes into sessions and finalizes on EOF.

use crate::error::TransferError;
use crate::session::{SessionKey, TransferSession};
use crate::storage::{StorageLayout, StoredTransfer};
use crate::{DEFAULT_SESSION_IDLE_TIMEOUT, STORED_MESSAGE};
use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tether_core::{ChunkData, TransferBody, TransferEnvelope, TransferResponse, WriteStorage};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Receiver configuration
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// Root for scratch files and storage folders
    pub storage_root: PathBuf,
    /// Sessions idle this long are evicted by [`TransferReceiver::reap_idle`]
    pub idle_timeout: Duration,
}

impl ReceiverConfig {
    /// Config with the default idle timeout
    #[must_use]
    pub fn new(storage_root: impl Into<PathBuf>) -> Self {
        Self {
            storage_root: storage_root.into(),
            idle_timeout: DEFAULT_SESSION_IDLE_TIMEOUT,
        }
    }
}

/// Receive side of the file-transfer protocol
///
/// Sessions for different (source, filename) keys proceed independently;
/// chunks for one key are applied one at a time under that session's lock.
#[derive(Debug)]
pub struct TransferReceiver {
    layout: StorageLayout,
    sessions: DashMap<SessionKey, Arc<Mutex<TransferSession>>>,
    idle_timeout: Duration,
}

impl TransferReceiver {
    /// Create a receiver
    #[must_use]
    pub fn new(config: ReceiverConfig) -> Self {
        Self {
            layout: StorageLayout::new(config.storage_root),
            sessions: DashMap::new(),
            idle_timeout: config.idle_timeout,
        }
    }

    /// Storage layout
    #[must_use]
    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    /// Apply an incoming envelope and build the reply to send back
    ///
    /// Returns `None` for envelopes that are not `write_storage` requests.
    pub async fn handle_envelope(&self, envelope: &TransferEnvelope) -> Option<TransferEnvelope> {
        match &envelope.body {
            TransferBody::WriteStorage(request) => {
                let response = self.handle(&envelope.source_node, request).await;
                Some(envelope.reply(response))
            }
            TransferBody::Response(_) => None,
        }
    }

    /// Apply one `write_storage` request from `source_node`
    ///
    /// Never fails: errors become a `Failed` response carrying the error text.
    pub async fn handle(&self, source_node: &str, request: &WriteStorage) -> TransferResponse {
        let result = match &request.file_data {
            ChunkData::Bytes(bytes) => self
                .accept_chunk(source_node, &request.filename, bytes)
                .await
                .map(|_| TransferResponse::chunk_received()),
            ChunkData::Eof => self
                .finalize(source_node, &request.filename)
                .await
                .map(|stored| TransferResponse::Stored {
                    message: STORED_MESSAGE.to_string(),
                    folder_id: stored.folder_id,
                }),
        };

        result.unwrap_or_else(|e| {
            tracing::warn!(
                source_node,
                filename = %request.filename,
                chunk_index = request.chunk_index,
                error = %e,
                "write_storage failed"
            );
            TransferResponse::Failed {
                error: e.to_string(),
            }
        })
    }

    /// Append a data chunk, opening the session on first use
    ///
    /// Returns the bytes received so far for this session.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::InvalidName`] for unsafe names and
    /// [`TransferError::Storage`] if the scratch file cannot be written; the
    /// session is discarded in the latter case.
    pub async fn accept_chunk(
        &self,
        source_node: &str,
        filename: &str,
        bytes: &[u8],
    ) -> Result<u64, TransferError> {
        let key = SessionKey::new(source_node, filename)?;

        loop {
            let session = self
                .sessions
                .entry(key.clone())
                .or_insert_with(|| {
                    tracing::info!(source_node, filename, "transfer session opened");
                    Arc::new(Mutex::new(TransferSession::new(
                        key.clone(),
                        self.layout.scratch_path(&key),
                    )))
                })
                .clone();

            let mut guard = session.lock().await;
            // Finalized or evicted between lookup and lock
            if !guard.is_accumulating() {
                continue;
            }

            return match guard.append(bytes).await {
                Ok(()) => {
                    tracing::debug!(
                        source_node,
                        filename,
                        chunks = guard.chunks_received(),
                        bytes = guard.bytes_received(),
                        "chunk appended"
                    );
                    Ok(guard.bytes_received())
                }
                Err(e) => {
                    guard.fail().await;
                    self.sessions.remove_if(&key, |_, s| Arc::ptr_eq(s, &session));
                    Err(e)
                }
            };
        }
    }

    /// Close the session and move its file into a fresh storage folder
    ///
    /// The session stays in the map, locked, until its file has been moved, so
    /// a chunk arriving meanwhile waits and then opens a fresh session.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::TransferNotFound`] if no session is open for
    /// the key, or the storage/archive error that failed finalization. The
    /// session is gone afterwards either way.
    pub async fn finalize(
        &self,
        source_node: &str,
        filename: &str,
    ) -> Result<StoredTransfer, TransferError> {
        let key = SessionKey::new(source_node, filename)?;

        loop {
            let Some(session) = self.sessions.get(&key).map(|e| Arc::clone(e.value())) else {
                return Err(TransferError::TransferNotFound {
                    source_node: source_node.to_string(),
                    filename: filename.to_string(),
                });
            };

            let mut guard = session.lock().await;
            // Finalized or evicted between lookup and lock
            if !guard.is_accumulating() {
                continue;
            }

            let result = self.store(&mut guard, filename).await;
            // Removed before the lock is released
            self.sessions.remove_if(&key, |_, s| Arc::ptr_eq(s, &session));
            return result;
        }
    }

    async fn store(
        &self,
        session: &mut TransferSession,
        filename: &str,
    ) -> Result<StoredTransfer, TransferError> {
        let scratch = match session.close().await {
            Ok(path) => path,
            Err(e) => {
                session.fail().await;
                return Err(e);
            }
        };

        match self.layout.materialize(&scratch, filename).await {
            Ok(stored) => {
                session.complete();
                tracing::info!(
                    source_node = session.key().source_node(),
                    filename,
                    folder_id = %stored.folder_id,
                    bytes = session.bytes_received(),
                    chunks = session.chunks_received(),
                    elapsed_ms = session.elapsed().as_millis() as u64,
                    "transfer stored"
                );
                Ok(stored)
            }
            Err(e) => {
                session.fail().await;
                Err(e)
            }
        }
    }

    /// Evict sessions idle for longer than the configured timeout
    ///
    /// Sessions busy with a chunk are skipped. Returns the number evicted.
    pub async fn reap_idle(&self) -> usize {
        let timeout = self.idle_timeout;
        let candidates: Vec<SessionKey> = self.sessions.iter().map(|e| e.key().clone()).collect();

        let mut evicted = 0;
        for key in candidates {
            let Some(session) = self.sessions.get(&key).map(|e| Arc::clone(e.value())) else {
                continue;
            };
            let Ok(mut guard) = session.try_lock() else {
                continue;
            };
            if !guard.is_accumulating() || guard.idle_for() < timeout {
                continue;
            }

            tracing::warn!(
                source_node = key.source_node(),
                filename = key.filename(),
                bytes = guard.bytes_received(),
                idle_secs = guard.idle_for().as_secs(),
                "evicting idle transfer session"
            );
            guard.fail().await;
            self.sessions.remove_if(&key, |_, s| Arc::ptr_eq(s, &session));
            evicted += 1;
        }
        evicted
    }

    /// Run [`reap_idle`](Self::reap_idle) every `interval` until aborted
    pub fn spawn_reaper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let receiver = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);

            loop {
                ticker.tick().await;
                let evicted = receiver.reap_idle().await;
                if evicted > 0 {
                    tracing::debug!(evicted, "idle sessions reaped");
                }
            }
        })
    }

    /// Number of open sessions
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// True if a session is open for (source, filename)
    #[must_use]
    pub fn has_session(&self, source_node: &str, filename: &str) -> bool {
        SessionKey::new(source_node, filename).is_ok_and(|key| self.sessions.contains_key(&key))
    }
}
