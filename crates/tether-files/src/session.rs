//! Receive session state machine.

use crate::error::{TransferError, storage};
use crate::storage::validate_name;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tether_core::NodeId;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Chunks are being appended to the scratch file
    Accumulating,
    /// EOF received and the file was stored
    Completed,
    /// Write, finalize, or idle eviction failed the session
    Failed,
}

/// Identity of a receive session: one sending node and one filename
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    source_node: NodeId,
    filename: String,
}

impl SessionKey {
    /// Build a key, rejecting names unsafe as path components
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::InvalidName`] if either part is unsafe.
    pub fn new(source_node: &str, filename: &str) -> Result<Self, TransferError> {
        validate_name(source_node)?;
        validate_name(filename)?;
        Ok(Self {
            source_node: source_node.to_string(),
            filename: filename.to_string(),
        })
    }

    /// Sending node
    #[must_use]
    pub fn source_node(&self) -> &str {
        &self.source_node
    }

    /// Filename
    #[must_use]
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// `{source}_{filename}.part`
    #[must_use]
    pub fn scratch_name(&self) -> String {
        format!("{}_{}.part", self.source_node, self.filename)
    }
}

/// One in-progress receive
///
/// Holds the scratch file open for writing from the first chunk until EOF,
/// failure, or eviction.
#[derive(Debug)]
pub struct TransferSession {
    key: SessionKey,
    scratch_path: PathBuf,
    file: Option<File>,
    state: SessionState,
    bytes_received: u64,
    chunks_received: u64,
    started_at: Instant,
    last_activity: Instant,
}

impl TransferSession {
    /// New session; the scratch file is created by the first append
    #[must_use]
    pub fn new(key: SessionKey, scratch_path: PathBuf) -> Self {
        let now = Instant::now();
        Self {
            key,
            scratch_path,
            file: None,
            state: SessionState::Accumulating,
            bytes_received: 0,
            chunks_received: 0,
            started_at: now,
            last_activity: now,
        }
    }

    /// Append one chunk at the end of the scratch file
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Storage`] if the scratch file cannot be
    /// created or written.
    pub async fn append(&mut self, bytes: &[u8]) -> Result<(), TransferError> {
        if self.file.is_none() {
            self.file = Some(self.create_scratch().await?);
        }
        if let Some(file) = self.file.as_mut() {
            file.write_all(bytes)
                .await
                .map_err(storage("append chunk"))?;
        }

        self.bytes_received += bytes.len() as u64;
        self.chunks_received += 1;
        self.last_activity = Instant::now();
        Ok(())
    }

    async fn create_scratch(&self) -> Result<File, TransferError> {
        if let Some(dir) = self.scratch_path.parent() {
            fs::create_dir_all(dir)
                .await
                .map_err(storage("create scratch directory"))?;
        }
        // Stale scratch from an earlier failed run is discarded
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.scratch_path)
            .await
            .map_err(storage("create scratch file"))
    }

    /// Flush and close the scratch file, returning its path
    ///
    /// A session that never received a chunk gets an empty scratch file.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Storage`] if flushing fails.
    pub async fn close(&mut self) -> Result<PathBuf, TransferError> {
        let mut file = match self.file.take() {
            Some(file) => file,
            None => self.create_scratch().await?,
        };
        file.flush().await.map_err(storage("flush scratch file"))?;
        file.sync_all()
            .await
            .map_err(storage("sync scratch file"))?;
        Ok(self.scratch_path.clone())
    }

    /// Mark stored
    pub fn complete(&mut self) {
        self.state = SessionState::Completed;
    }

    /// Mark failed, closing and deleting the scratch file
    pub async fn fail(&mut self) {
        self.state = SessionState::Failed;
        self.file = None;
        match fs::remove_file(&self.scratch_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                path = %self.scratch_path.display(),
                error = %e,
                "failed to remove scratch file"
            ),
        }
    }

    /// Session key
    #[must_use]
    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    /// Scratch file path
    #[must_use]
    pub fn scratch_path(&self) -> &Path {
        &self.scratch_path
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// True while chunks are accepted
    #[must_use]
    pub fn is_accumulating(&self) -> bool {
        self.state == SessionState::Accumulating
    }

    /// Bytes appended so far
    #[must_use]
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    /// Chunks appended so far
    #[must_use]
    pub fn chunks_received(&self) -> u64 {
        self.chunks_received
    }

    /// Time since the session was opened
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Time since the last chunk
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }
}
