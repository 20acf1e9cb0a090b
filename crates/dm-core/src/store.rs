//! File-backed state directory
//!
//! Every piece of persisted agent state is one JSON document in the state
//! directory. Each file is independently optional: a missing or malformed
//! file reads as `None` and the caller falls back to defaults.

use std::fs;
use std::io;
use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Default state directory, relative to the working directory
pub const DEFAULT_STATE_DIR: &str = "cfg";

/// Directory holding the agent's persisted JSON documents
#[derive(Debug, Clone)]
pub struct StateDir {
    root: PathBuf,
}

impl StateDir {
    /// Create a state directory handle (the directory is created lazily on first write)
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Full path of a document
    pub fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Whether a document exists
    pub fn exists(&self, name: &str) -> bool {
        self.path(name).is_file()
    }

    /// Read a document
    ///
    /// Returns `None` if the file is missing or does not decode as `T`.
    pub fn read<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        let path = self.path(name);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!("Failed to read {:?}: {}", path, e);
                return None;
            }
        };

        match serde_json::from_str(&content) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Ignoring malformed {:?}: {}", path, e);
                None
            }
        }
    }

    /// Write a document atomically (temp file, then rename)
    pub fn write<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> io::Result<()> {
        fs::create_dir_all(&self.root)?;

        let content = serde_json::to_string_pretty(value)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let path = self.path(name);
        let tmp = self.path(&format!(".{}.tmp", name));
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &path)
    }

    /// Remove a document
    ///
    /// Returns `Ok(())` even if the file doesn't exist.
    pub fn remove(&self, name: &str) -> io::Result<()> {
        match fs::remove_file(self.path(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl Default for StateDir {
    fn default() -> Self {
        Self::new(DEFAULT_STATE_DIR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Doc {
        name: String,
    }

    #[test]
    fn test_read_missing_document() {
        let dir = TempDir::new().unwrap();
        let store = StateDir::new(dir.path());
        assert!(store.read::<Doc>("missing.json").is_none());
        assert!(!store.exists("missing.json"));
    }

    #[test]
    fn test_write_and_read() {
        let dir = TempDir::new().unwrap();
        let store = StateDir::new(dir.path().join("nested"));
        let doc = Doc { name: "agent".into() };

        store.write("doc.json", &doc).unwrap();
        assert!(store.exists("doc.json"));
        assert_eq!(store.read::<Doc>("doc.json"), Some(doc));
        assert!(!store.path(".doc.json.tmp").exists());
    }

    #[test]
    fn test_malformed_document_reads_as_none() {
        let dir = TempDir::new().unwrap();
        let store = StateDir::new(dir.path());
        fs::write(store.path("doc.json"), "{not json").unwrap();
        assert!(store.read::<Doc>("doc.json").is_none());
    }

    #[test]
    fn test_remove() {
        let dir = TempDir::new().unwrap();
        let store = StateDir::new(dir.path());
        store.write("doc.json", &Doc { name: "x".into() }).unwrap();
        store.remove("doc.json").unwrap();
        assert!(!store.exists("doc.json"));
        // Removing again is fine
        store.remove("doc.json").unwrap();
    }
}
