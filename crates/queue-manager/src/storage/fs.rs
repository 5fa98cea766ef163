use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use super::Storage;

/// A [`Storage`] writing one file per key into a directory.
///
/// Keys are hashed to form the file name, so arbitrary queue names are safe to use. Files are
/// written to a temporary file first and then moved into place, so readers never observe a
/// partially written value.
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    /// Creates a storage rooted at `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// The directory entries are stored in.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the full path of the file holding `key`.
    pub fn entry_path(&self, key: &str) -> PathBuf {
        self.root.join(relative_path(key))
    }

    fn write(&self, path: &Path, value: &str) -> io::Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| io::Error::other("no parent directory to persist entry"))?;
        // The root might have been removed underneath us, so it is recreated on every write.
        fs::create_dir_all(parent)?;

        let mut temp_file = NamedTempFile::new_in(&self.root)?;
        temp_file.write_all(value.as_bytes())?;
        temp_file.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}

impl Storage for FsStorage {
    fn get(&self, key: &str) -> Option<String> {
        let path = self.entry_path(key);
        match fs::read_to_string(&path) {
            Ok(value) => Some(value),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                tracing::error!(
                    error = &e as &dyn std::error::Error,
                    path = %path.display(),
                    "Failed to read stored entry",
                );
                None
            }
        }
    }

    fn set(&self, key: &str, value: &str) {
        let path = self.entry_path(key);
        tracing::trace!("Storing {key} at path {}", path.display());

        if let Err(e) = self.write(&path, value) {
            tracing::error!(
                error = &e as &dyn std::error::Error,
                path = %path.display(),
                "Failed to persist stored entry",
            );
        }
    }
}

/// Returns the relative path for `key`.
///
/// The relative path is a sha-256 hash hex-formatted like so: `aa/bbccdd/eeff...`
fn relative_path(key: &str) -> String {
    let hash = Sha256::digest(key.as_bytes());
    let hex: String = hash.iter().map(|b| format!("{b:02x}")).collect();
    format!("{}/{}/{}", &hex[..2], &hex[2..8], &hex[8..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hashed_paths() {
        assert_eq!(
            relative_path(""),
            "e3/b0c442/98fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_ne!(relative_path("user:1"), relative_path("user:2"));
        assert_eq!(relative_path("../../etc/passwd").matches('/').count(), 2);
    }

    #[test]
    fn test_roundtrip() {
        let dir = queue_manager_test::tempdir();
        let storage = FsStorage::new(dir.path().join("values")).unwrap();

        assert_eq!(storage.get("user:1"), None);

        storage.set("user:1", r#"{"id":1,"name":"Ann"}"#);
        assert_eq!(
            storage.get("user:1").as_deref(),
            Some(r#"{"id":1,"name":"Ann"}"#)
        );

        storage.set("user:1", "null");
        assert_eq!(storage.get("user:1").as_deref(), Some("null"));

        let path = storage.entry_path("user:1");
        assert!(path.starts_with(storage.root()));
        assert!(path.is_file());
    }

    #[test]
    fn test_survives_reopen() {
        let dir = queue_manager_test::tempdir();

        let storage = FsStorage::new(dir.path()).unwrap();
        storage.set("answer", "42");
        drop(storage);

        let storage = FsStorage::new(dir.path()).unwrap();
        assert_eq!(storage.get("answer").as_deref(), Some("42"));
    }

    #[test]
    fn test_recreates_removed_root() {
        let dir = queue_manager_test::tempdir();
        let storage = FsStorage::new(dir.path().join("values")).unwrap();

        fs::remove_dir_all(storage.root()).unwrap();
        storage.set("answer", "42");
        assert_eq!(storage.get("answer").as_deref(), Some("42"));
    }
}
