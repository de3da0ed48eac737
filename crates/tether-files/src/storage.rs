//! Storage layout and finalization.
//!
//! ```text
//! {root}/
//!   temp/{source}_{filename}.part     scratch files of open sessions
//!   {folder_id}/{filename}            finalized transfers
//!   {folder_id}/...                   extracted archive entries
//! ```

use crate::SCRATCH_DIR;
use crate::error::{TransferError, storage};
use crate::session::SessionKey;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Outcome of finalizing one transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredTransfer {
    /// 32 lowercase hex characters, unique per finalization
    pub folder_id: String,
    /// Absolute folder under the storage root
    pub folder: PathBuf,
    /// Stored file name
    pub filename: String,
    /// Entry count if the file was a `.zip` that got extracted
    pub extracted_entries: Option<usize>,
}

/// Paths under a storage root
#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    /// Layout rooted at `root`; nothing is created until first use
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Storage root
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding scratch files
    #[must_use]
    pub fn scratch_dir(&self) -> PathBuf {
        self.root.join(SCRATCH_DIR)
    }

    /// Scratch file for a session
    #[must_use]
    pub fn scratch_path(&self, key: &SessionKey) -> PathBuf {
        self.scratch_dir().join(key.scratch_name())
    }

    /// Folder for a finalized transfer
    #[must_use]
    pub fn folder_path(&self, folder_id: &str) -> PathBuf {
        self.root.join(folder_id)
    }

    /// Move a closed scratch file into a fresh folder, extracting archives
    ///
    /// On any failure the fresh folder is removed again.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Storage`] if the folder cannot be created or
    /// the file cannot be moved, and [`TransferError::Archive`] if a `.zip`
    /// cannot be extracted.
    pub async fn materialize(
        &self,
        scratch: &Path,
        filename: &str,
    ) -> Result<StoredTransfer, TransferError> {
        validate_name(filename)?;

        let folder_id = generate_folder_id();
        let folder = self.folder_path(&folder_id);
        fs::create_dir_all(&folder)
            .await
            .map_err(storage("create storage folder"))?;

        match place(scratch, &folder, filename).await {
            Ok(extracted_entries) => {
                tracing::debug!(%folder_id, filename, ?extracted_entries, "transfer materialized");
                Ok(StoredTransfer {
                    folder_id,
                    folder,
                    filename: filename.to_string(),
                    extracted_entries,
                })
            }
            Err(e) => {
                if let Err(cleanup) = fs::remove_dir_all(&folder).await {
                    tracing::warn!(folder = %folder.display(), error = %cleanup, "failed to remove storage folder");
                }
                Err(e)
            }
        }
    }
}

async fn place(
    scratch: &Path,
    folder: &Path,
    filename: &str,
) -> Result<Option<usize>, TransferError> {
    let dest = folder.join(filename);
    move_file(scratch, &dest).await?;

    if !is_archive(filename) {
        return Ok(None);
    }

    let entries = extract_archive(dest.clone(), folder.to_path_buf()).await?;
    fs::remove_file(&dest)
        .await
        .map_err(storage("remove extracted archive"))?;
    Ok(Some(entries))
}

/// Rename, falling back to copy + remove across filesystems
async fn move_file(from: &Path, to: &Path) -> Result<(), TransferError> {
    if fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    fs::copy(from, to).await.map_err(storage("copy scratch file"))?;
    fs::remove_file(from)
        .await
        .map_err(storage("remove scratch file"))?;
    Ok(())
}

/// Extract every entry of `archive` into `dest`; returns the entry count
async fn extract_archive(archive: PathBuf, dest: PathBuf) -> Result<usize, TransferError> {
    tokio::task::spawn_blocking(move || -> zip::result::ZipResult<usize> {
        let file = std::fs::File::open(&archive)?;
        let mut zip = zip::ZipArchive::new(file)?;
        let entries = zip.len();
        zip.extract(&dest)?;
        Ok(entries)
    })
    .await
    .map_err(|e| TransferError::Archive(e.to_string()))?
    .map_err(|e| TransferError::Archive(e.to_string()))
}

/// True for names ending in `.zip`, any case
#[must_use]
pub fn is_archive(filename: &str) -> bool {
    Path::new(filename)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"))
}

/// Fresh storage folder id: 16 random bytes as lowercase hex
#[must_use]
pub fn generate_folder_id() -> String {
    hex::encode(rand::random::<[u8; 16]>())
}

/// Reject names that are empty, relative components, or contain separators
///
/// Applied to filenames and to source node ids, both of which become path
/// components under the storage root.
///
/// # Errors
///
/// Returns [`TransferError::InvalidName`] for an unsafe name.
pub fn validate_name(name: &str) -> Result<(), TransferError> {
    let unsafe_name = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0']);

    if unsafe_name {
        Err(TransferError::InvalidName(name.to_string()))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = std::fs::File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);
        for (name, data) in entries {
            zip.start_file(*name, options).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn test_folder_id_format() {
        let a = generate_folder_id();
        let b = generate_folder_id();
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_is_archive() {
        assert!(is_archive("bundle.zip"));
        assert!(is_archive("BUNDLE.ZIP"));
        assert!(!is_archive("output.png"));
        assert!(!is_archive("zip"));
        assert!(!is_archive("archive.zip.part"));
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("output.png").is_ok());
        assert!(validate_name("node_1").is_ok());
        assert!(validate_name("..hidden").is_ok());
        for bad in ["", ".", "..", "../x", "a/b", "a\\b", "nul\0"] {
            assert!(
                matches!(validate_name(bad), Err(TransferError::InvalidName(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_layout_paths() {
        let layout = StorageLayout::new("/srv/storage");
        let key = SessionKey::new("node_1", "a.png").unwrap();
        assert_eq!(
            layout.scratch_path(&key),
            PathBuf::from("/srv/storage/temp/node_1_a.png.part")
        );
        assert_eq!(layout.folder_path("abc"), PathBuf::from("/srv/storage/abc"));
    }

    #[tokio::test]
    async fn test_materialize_plain_file() {
        let dir = TempDir::new().unwrap();
        let layout = StorageLayout::new(dir.path());
        std::fs::create_dir_all(layout.scratch_dir()).unwrap();
        let scratch = layout.scratch_dir().join("node_1_a.txt.part");
        std::fs::write(&scratch, b"hello").unwrap();

        let stored = layout.materialize(&scratch, "a.txt").await.unwrap();

        assert_eq!(stored.extracted_entries, None);
        assert_eq!(stored.folder, dir.path().join(&stored.folder_id));
        assert_eq!(std::fs::read(stored.folder.join("a.txt")).unwrap(), b"hello");
        assert!(!scratch.exists());
    }

    #[tokio::test]
    async fn test_materialize_extracts_zip() {
        let dir = TempDir::new().unwrap();
        let layout = StorageLayout::new(dir.path());
        std::fs::create_dir_all(layout.scratch_dir()).unwrap();
        let scratch = layout.scratch_dir().join("node_1_bundle.zip.part");
        write_zip(&scratch, &[("x.txt", b"x"), ("sub/y.txt", b"yy")]);

        let stored = layout.materialize(&scratch, "bundle.zip").await.unwrap();

        assert_eq!(stored.extracted_entries, Some(2));
        assert_eq!(std::fs::read(stored.folder.join("x.txt")).unwrap(), b"x");
        assert_eq!(std::fs::read(stored.folder.join("sub/y.txt")).unwrap(), b"yy");
        assert!(!stored.folder.join("bundle.zip").exists());
    }

    #[tokio::test]
    async fn test_materialize_corrupt_zip_removes_folder() {
        let dir = TempDir::new().unwrap();
        let layout = StorageLayout::new(dir.path());
        std::fs::create_dir_all(layout.scratch_dir()).unwrap();
        let scratch = layout.scratch_dir().join("node_1_bad.zip.part");
        std::fs::write(&scratch, b"not a zip").unwrap();

        let result = layout.materialize(&scratch, "bad.zip").await;
        assert!(matches!(result, Err(TransferError::Archive(_))));

        // Only the scratch directory remains under the root
        let remaining: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(remaining, vec![std::ffi::OsString::from(SCRATCH_DIR)]);
    }
}
