//! Content-addressable blob storage (C2): on-disk bytes bound to `File`
//! metadata records. Writes land via a temp-file-then-rename so a reader
//! never observes a partially-written blob.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::RepoResult;

pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> RepoResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Writes `data` under a fresh UUID directory, sanitizing `filename` to
    /// its basename so no path component can escape `files_root`. Returns
    /// the generated UUID and the path the blob was written to.
    pub fn ingest(&self, data: &[u8], filename: &str) -> RepoResult<(Uuid, PathBuf)> {
        let uuid = Uuid::new_v4();
        let sanitized = sanitize_filename(filename);
        let dir = self.root.join(uuid.to_string());
        std::fs::create_dir_all(&dir)?;
        let final_path = dir.join(&sanitized);
        let tmp_path = dir.join(format!(".{sanitized}.tmp"));
        std::fs::write(&tmp_path, data)?;
        std::fs::rename(&tmp_path, &final_path)?;

        let mut hasher = Sha256::new();
        hasher.update(data);
        tracing::info!(
            uuid = %uuid,
            name = sanitized,
            sha256 = %format!("{:x}", hasher.finalize()),
            bytes = data.len(),
            "ingested file blob"
        );
        Ok((uuid, final_path))
    }

    pub fn read(&self, path: &Path) -> RepoResult<Vec<u8>> {
        Ok(std::fs::read(path)?)
    }

    /// Removes the blob directory containing `path` (one of the paths
    /// returned by [`FileStore::ingest`]), if present. Safe to call after
    /// the metadata record itself has already been deleted. The directory
    /// is derived from `path`'s parent rather than re-deriving a UUID, since
    /// the File record's own uuid is unrelated to the blob directory name.
    pub fn delete_blob(&self, path: &Path) -> RepoResult<()> {
        if let Some(dir) = path.parent() {
            if dir.starts_with(&self.root) && dir.exists() {
                std::fs::remove_dir_all(dir)?;
            }
        }
        Ok(())
    }
}

fn sanitize_filename(name: &str) -> String {
    Path::new(name)
        .file_name()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("unnamed")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ingest_writes_under_uuid_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        let (uuid, path) = store.ingest(b"hello", "submission.py").unwrap();
        assert!(path.starts_with(dir.path().join(uuid.to_string())));
        assert_eq!(store.read(&path).unwrap(), b"hello");
    }

    #[test]
    fn ingest_sanitizes_traversal_in_filename() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        let (uuid, path) = store.ingest(b"x", "../../etc/passwd").unwrap();
        assert_eq!(path.file_name().unwrap().to_str().unwrap(), "passwd");
        assert!(path.starts_with(dir.path().join(uuid.to_string())));
    }

    #[test]
    fn delete_blob_removes_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        let (_uuid, path) = store.ingest(b"x", "a.txt").unwrap();
        assert!(path.exists());
        store.delete_blob(&path).unwrap();
        assert!(!path.exists());
        assert!(!path.parent().unwrap().exists());
    }
}
