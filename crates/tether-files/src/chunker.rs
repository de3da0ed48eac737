//! File chunking.

use crate::DEFAULT_CHUNK_SIZE;
use crate::error::TransferError;
use crate::storage::validate_name;
use std::path::Path;
use tether_core::{ChunkData, NodeId, TransferEnvelope, WriteStorage};
use tokio::fs::File;
use tokio::io::AsyncReadExt;

/// Declared chunk total carried in every envelope of a transfer
///
/// Always `file_size / chunk_size + 1`, which overstates the number of data
/// chunks by one when the size is an exact multiple. Receivers never check it.
#[must_use]
pub fn chunk_total(file_size: u64, chunk_size: usize) -> u64 {
    file_size / chunk_size as u64 + 1
}

/// Chunk a file into fixed-size pieces
#[derive(Debug, Clone, Copy)]
pub struct FileChunker {
    chunk_size: usize,
}

impl FileChunker {
    /// Create a new chunker with default chunk size
    #[must_use]
    pub fn new() -> Self {
        Self::with_chunk_size(DEFAULT_CHUNK_SIZE)
    }

    /// Create a new chunker with custom chunk size (minimum one byte)
    #[must_use]
    pub fn with_chunk_size(size: usize) -> Self {
        Self {
            chunk_size: size.max(1),
        }
    }

    /// Get chunk size
    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Number of data chunks actually produced for a file
    #[must_use]
    pub fn chunk_count(&self, file_size: u64) -> u64 {
        file_size.div_ceil(self.chunk_size as u64)
    }

    /// Declared total for a file, see [`chunk_total`]
    #[must_use]
    pub fn declared_total(&self, file_size: u64) -> u64 {
        chunk_total(file_size, self.chunk_size)
    }
}

impl Default for FileChunker {
    fn default() -> Self {
        Self::new()
    }
}

/// Lazy sequence of `write_storage` envelopes for one file
///
/// Yields one envelope per full chunk, a final partial chunk if any, then a
/// single EOF envelope whose index equals the number of data chunks. The file
/// is read one chunk at a time and never held in memory whole.
#[derive(Debug)]
pub struct ChunkStream {
    file: File,
    filename: String,
    source: NodeId,
    target: NodeId,
    chunk_size: usize,
    file_size: u64,
    chunk_total: u64,
    next_index: u64,
    bytes_read: u64,
    finished: bool,
}

impl ChunkStream {
    /// Open `path` for streaming, stored remotely under its own file name
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::InvalidName`] if the path has no usable file
    /// name, or [`TransferError::Io`] if the file cannot be opened.
    pub async fn open(
        path: impl AsRef<Path>,
        source: impl Into<NodeId>,
        target: impl Into<NodeId>,
        chunker: &FileChunker,
    ) -> Result<Self, TransferError> {
        let path = path.as_ref();
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| TransferError::InvalidName(path.display().to_string()))?;
        Self::open_as(path, filename, source, target, chunker).await
    }

    /// Open `path` for streaming, stored remotely as `filename`
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::InvalidName`] for an unsafe `filename`, or
    /// [`TransferError::Io`] if the file cannot be opened.
    pub async fn open_as(
        path: impl AsRef<Path>,
        filename: &str,
        source: impl Into<NodeId>,
        target: impl Into<NodeId>,
        chunker: &FileChunker,
    ) -> Result<Self, TransferError> {
        validate_name(filename)?;

        let file = File::open(path.as_ref()).await?;
        let file_size = file.metadata().await?.len();

        Ok(Self {
            file,
            filename: filename.to_string(),
            source: source.into(),
            target: target.into(),
            chunk_size: chunker.chunk_size(),
            file_size,
            chunk_total: chunker.declared_total(file_size),
            next_index: 0,
            bytes_read: 0,
            finished: false,
        })
    }

    /// Next envelope, or `None` after EOF has been yielded
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Io`] if reading the file fails.
    pub async fn next(&mut self) -> Result<Option<TransferEnvelope>, TransferError> {
        if self.finished {
            return Ok(None);
        }

        let mut buf = vec![0u8; self.chunk_size];
        let n = read_full(&mut self.file, &mut buf).await?;

        let file_data = if n > 0 {
            buf.truncate(n);
            self.bytes_read += n as u64;
            ChunkData::Bytes(buf)
        } else {
            self.finished = true;
            ChunkData::Eof
        };

        let envelope = TransferEnvelope::write_storage(
            self.source.clone(),
            self.target.clone(),
            WriteStorage {
                filename: self.filename.clone(),
                file_data,
                chunk_index: self.next_index,
                chunk_total: self.chunk_total,
            },
        );
        if !self.finished {
            self.next_index += 1;
        }

        Ok(Some(envelope))
    }

    /// Remote file name
    #[must_use]
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Size of the file at open time
    #[must_use]
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Declared chunk total carried in every envelope
    #[must_use]
    pub fn chunk_total(&self) -> u64 {
        self.chunk_total
    }

    /// Bytes yielded so far
    #[must_use]
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// True once the EOF envelope has been yielded
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

/// Fill `buf` unless the file ends first; returns bytes read
async fn read_full(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]).await? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}
