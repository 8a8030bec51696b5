//! On-disk storage for mirrored attachments
//!
//! Every stored object lives directly under the storage root as `<id>` or
//! `<id>.<ext>`. Paths are derived only from the [`FileId`] and a sanitized
//! extension; the original filename never becomes part of a path.

use crate::error::{AttachmentServerError, AttachmentServerResult};
use crate::file_id::FileId;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Suffix of files that are still being written
const PARTIAL_SUFFIX: &str = ".part";

/// Longest extension kept from an original filename
const MAX_EXTENSION_LEN: usize = 16;

/// Root directory holding one file per stored attachment
#[derive(Debug, Clone)]
pub struct StorageDirectory {
    root: PathBuf,
}

impl StorageDirectory {
    /// Open (and create if needed) the storage directory
    pub async fn open(root: impl AsRef<Path>) -> AttachmentServerResult<Self> {
        let root = root.as_ref();

        fs::create_dir_all(root).await.map_err(|e| {
            AttachmentServerError::storage(format!(
                "Failed to create storage directory '{}': {}",
                root.display(),
                e
            ))
        })?;

        let root = fs::canonicalize(root).await.map_err(|e| {
            AttachmentServerError::storage(format!(
                "Failed to resolve storage directory '{}': {}",
                root.display(),
                e
            ))
        })?;

        let storage = Self { root };
        storage.report_leftovers().await;

        info!("Attachment storage ready at {}", storage.root.display());
        Ok(storage)
    }

    /// Absolute path of the storage root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path for a stored object. Only the identifier and an already
    /// sanitized extension are used.
    pub fn path_for(&self, id: &FileId, extension: Option<&str>) -> PathBuf {
        match extension {
            Some(ext) if is_safe_extension(ext) => self.root.join(format!("{}.{}", id, ext)),
            _ => self.root.join(id.to_string()),
        }
    }

    /// Whether `path` is a direct child of the storage root
    pub fn contains(&self, path: &Path) -> bool {
        path.parent() == Some(self.root.as_path())
            && path
                .file_name()
                .map(|name| name != "." && name != "..")
                .unwrap_or(false)
    }

    /// Write `bytes` to `path` so that the final name only ever appears with
    /// complete, flushed content.
    ///
    /// Data goes to a `.part` sibling first, is synced, then renamed. On any
    /// failure the partial file is removed and a storage error is returned.
    pub async fn write(&self, path: &Path, bytes: &[u8]) -> AttachmentServerResult<()> {
        if !self.contains(path) {
            return Err(AttachmentServerError::internal(format!(
                "Refusing to write outside storage root: {}",
                path.display()
            )));
        }

        let partial = partial_path(path);

        if let Err(e) = write_synced(&partial, bytes).await {
            discard(&partial).await;
            return Err(AttachmentServerError::storage(format!(
                "Failed to write attachment file: {}",
                e
            )));
        }

        if let Err(e) = fs::rename(&partial, path).await {
            discard(&partial).await;
            return Err(AttachmentServerError::storage(format!(
                "Failed to move attachment file into place: {}",
                e
            )));
        }

        debug!("Stored {} bytes at {}", bytes.len(), path.display());
        Ok(())
    }

    /// Whether anything exists at `path` or at its in-progress `.part` sibling
    pub async fn is_occupied(&self, path: &Path) -> std::io::Result<bool> {
        if fs::try_exists(path).await? {
            return Ok(true);
        }
        fs::try_exists(partial_path(path)).await
    }

    /// Read a stored file. A file that no longer exists yields `Ok(None)`.
    pub async fn read(&self, path: &Path) -> std::io::Result<Option<Vec<u8>>> {
        if !self.contains(path) {
            return Ok(None);
        }

        match fs::read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Delete a stored file. Returns `Ok(false)` if it was already gone.
    pub async fn remove(&self, path: &Path) -> std::io::Result<bool> {
        if !self.contains(path) {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                format!("path outside storage root: {}", path.display()),
            ));
        }

        match fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Files left over from a previous process are not tracked by the
    /// in-memory registry. They are reported, never served or deleted.
    async fn report_leftovers(&self) {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Could not scan storage directory: {}", e);
                return;
            }
        };

        let mut leftovers = 0usize;
        while let Ok(Some(_)) = entries.next_entry().await {
            leftovers += 1;
        }

        if leftovers > 0 {
            warn!(
                "Storage directory {} contains {} untracked file(s) from a previous run; remove them manually",
                self.root.display(),
                leftovers
            );
        }
    }
}

/// Extract an extension worth keeping from an untrusted filename.
///
/// Only 1..=16 ASCII alphanumerics survive (lowercased). Hidden-file names
/// like `.bashrc` have no extension.
pub fn safe_extension(filename: &str) -> Option<String> {
    let (stem, ext) = filename.rsplit_once('.')?;
    if stem.is_empty() || !is_safe_extension(ext) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

fn is_safe_extension(ext: &str) -> bool {
    !ext.is_empty() && ext.len() <= MAX_EXTENSION_LEN && ext.bytes().all(|b| b.is_ascii_alphanumeric())
}

fn partial_path(path: &Path) -> PathBuf {
    let mut partial = path.as_os_str().to_owned();
    partial.push(PARTIAL_SUFFIX);
    PathBuf::from(partial)
}

async fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    Ok(())
}

async fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != ErrorKind::NotFound {
            warn!("Failed to remove partial file {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_extension() {
        assert_eq!(safe_extension("report.PDF"), Some("pdf".to_string()));
        assert_eq!(safe_extension("archive.tar.gz"), Some("gz".to_string()));
        assert_eq!(safe_extension("noextension"), None);
        assert_eq!(safe_extension(".bashrc"), None);
        assert_eq!(safe_extension("../../etc/passwd"), None);
        assert_eq!(safe_extension("..\\..\\win.ini"), Some("ini".to_string()));
        assert_eq!(safe_extension("evil.p\0df"), None);
        assert_eq!(safe_extension("a.b\u{2215}c"), None);
        assert_eq!(safe_extension("x.verylongextensionname"), None);
        assert_eq!(safe_extension("trailing."), None);
    }

    #[tokio::test]
    async fn test_path_stays_inside_root_for_hostile_names() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageDirectory::open(dir.path()).await.unwrap();

        let hostile = [
            "../../etc/passwd",
            "..\\..\\win.ini",
            "name\0.txt",
            "a\u{2215}..\u{2215}b.txt",
            "/absolute/path.sh",
            "C:\\Windows\\system32.dll",
            "..",
            "",
        ];

        for name in hostile {
            let id = FileId::generate();
            let ext = safe_extension(name);
            let path = storage.path_for(&id, ext.as_deref());

            assert!(storage.contains(&path), "{:?} escaped to {:?}", name, path);
            assert!(path.starts_with(storage.root()));
            let file_name = path.file_name().unwrap().to_str().unwrap();
            assert!(file_name.starts_with(&id.to_string()));
        }
    }

    #[tokio::test]
    async fn test_unsafe_extension_is_dropped_by_path_for() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageDirectory::open(dir.path()).await.unwrap();
        let id = FileId::generate();

        let path = storage.path_for(&id, Some("../x"));
        assert_eq!(path, storage.root().join(id.to_string()));
    }

    #[tokio::test]
    async fn test_write_read_remove() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageDirectory::open(dir.path()).await.unwrap();
        let path = storage.path_for(&FileId::generate(), Some("txt"));

        storage.write(&path, b"hello").await.unwrap();
        assert_eq!(storage.read(&path).await.unwrap(), Some(b"hello".to_vec()));

        // No partial file left behind
        assert!(!partial_path(&path).exists());

        assert!(storage.remove(&path).await.unwrap());
        assert!(!storage.remove(&path).await.unwrap());
        assert_eq!(storage.read(&path).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_write_failure_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageDirectory::open(dir.path()).await.unwrap();
        let path = storage.path_for(&FileId::generate(), None);

        // A directory at the partial path makes File::create fail
        std::fs::create_dir(partial_path(&path)).unwrap();

        let err = storage.write(&path, b"data").await.unwrap_err();
        assert_eq!(err.category(), "storage");
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_occupied_paths_include_partial_writes() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageDirectory::open(dir.path()).await.unwrap();

        let complete = storage.path_for(&FileId::generate(), Some("txt"));
        std::fs::write(&complete, b"done").unwrap();

        let in_progress = storage.path_for(&FileId::generate(), Some("txt"));
        std::fs::write(partial_path(&in_progress), b"half").unwrap();

        let free = storage.path_for(&FileId::generate(), Some("txt"));

        assert!(storage.is_occupied(&complete).await.unwrap());
        assert!(storage.is_occupied(&in_progress).await.unwrap());
        assert!(!storage.is_occupied(&free).await.unwrap());
    }

    #[tokio::test]
    async fn test_rejects_paths_outside_root() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageDirectory::open(dir.path().join("store")).await.unwrap();
        let outside = dir.path().join("outside.txt");

        assert!(!storage.contains(&outside));
        assert!(storage.write(&outside, b"x").await.is_err());
        assert!(!outside.exists());
        assert!(storage.remove(&outside).await.is_err());
        assert_eq!(storage.read(&outside).await.unwrap(), None);
    }
}
