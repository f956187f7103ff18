//! One-JSON-file-per-record storage under a root directory.
//!
//! Records live at `<root>/<project>/<id>.json`, pretty-printed. Writes go to a sibling temp
//! file that is renamed into place, so a concurrent reader sees either the old or the new
//! record, never a torn one. Absence is reported as `Ok(None)` / `Ok(false)`.

use crate::mmlmcp::error::{StorageError, StorageResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct JsonDirStore {
    root: PathBuf,
}

impl JsonDirStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn check_key(key: &str) -> StorageResult<()> {
        let bad = key.is_empty()
            || key == "."
            || key == ".."
            || key.contains(['/', '\\', '\0']);
        if bad {
            Err(StorageError::InvalidKey(key.to_string()))
        } else {
            Ok(())
        }
    }

    fn project_dir(&self, project: &str) -> StorageResult<PathBuf> {
        Self::check_key(project)?;
        Ok(self.root.join(project))
    }

    fn record_path(&self, project: &str, id: &str) -> StorageResult<PathBuf> {
        Self::check_key(id)?;
        Ok(self.project_dir(project)?.join(format!("{}.json", id)))
    }

    pub async fn write<T: Serialize>(&self, project: &str, id: &str, record: &T) -> StorageResult<()> {
        let path = self.record_path(project, id)?;
        tokio::fs::create_dir_all(self.project_dir(project)?).await?;

        let json = serde_json::to_string_pretty(record)?;
        let tmp = path.with_extension(format!("json.{}.tmp", uuid::Uuid::new_v4()));
        tokio::fs::write(&tmp, json).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Read a record; `Ok(None)` when it does not exist or the key can never exist.
    pub async fn read<T: DeserializeOwned>(&self, project: &str, id: &str) -> StorageResult<Option<T>> {
        let path = match self.record_path(project, id) {
            Ok(path) => path,
            Err(StorageError::InvalidKey(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove a record; `Ok(false)` when there was nothing to remove.
    pub async fn delete(&self, project: &str, id: &str) -> StorageResult<bool> {
        let path = match self.record_path(project, id) {
            Ok(path) => path,
            Err(StorageError::InvalidKey(_)) => return Ok(false),
            Err(e) => return Err(e),
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Every readable record in `project`. Unreadable files are logged and skipped.
    pub async fn list<T: DeserializeOwned>(&self, project: &str) -> StorageResult<Vec<T>> {
        let dir = match self.project_dir(project) {
            Ok(dir) => dir,
            Err(StorageError::InvalidKey(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            match tokio::fs::read(&path).await {
                Ok(bytes) => match serde_json::from_slice::<T>(&bytes) {
                    Ok(record) => records.push(record),
                    Err(e) => log::warn!("Skipping malformed record {}: {}", path.display(), e),
                },
                Err(e) => log::warn!("Skipping unreadable record {}: {}", path.display(), e),
            }
        }
        Ok(records)
    }

    /// Recursively remove the whole root. A root that is already gone is not an error.
    pub async fn remove_all(&self) -> StorageResult<()> {
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// `<system temp>/<prefix>-<uuid>`
pub fn unique_temp_root(prefix: &str) -> PathBuf {
    std::env::temp_dir().join(format!("{}-{}", prefix, uuid::Uuid::new_v4()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Note {
        text: String,
    }

    #[tokio::test]
    async fn test_write_read_delete() {
        let dir = TempDir::new().unwrap();
        let store = JsonDirStore::open(dir.path().join("store")).await.unwrap();

        store.write("p", "n1", &Note { text: "hi".into() }).await.unwrap();
        let note: Option<Note> = store.read("p", "n1").await.unwrap();
        assert_eq!(note, Some(Note { text: "hi".into() }));
        assert!(dir.path().join("store/p/n1.json").exists());

        assert!(store.delete("p", "n1").await.unwrap());
        assert!(!store.delete("p", "n1").await.unwrap());
        assert_eq!(store.read::<Note>("p", "n1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_traversal_keys_never_touch_disk() {
        let dir = TempDir::new().unwrap();
        let store = JsonDirStore::open(dir.path()).await.unwrap();
        assert!(matches!(
            store.write("p", "../escape", &Note { text: "x".into() }).await,
            Err(StorageError::InvalidKey(_))
        ));
        assert_eq!(store.read::<Note>("..", "x").await.unwrap(), None);
        assert!(!store.delete("p", "..").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_skips_malformed_files() {
        let dir = TempDir::new().unwrap();
        let store = JsonDirStore::open(dir.path()).await.unwrap();
        store.write("p", "good", &Note { text: "ok".into() }).await.unwrap();
        tokio::fs::write(dir.path().join("p/bad.json"), "{oops").await.unwrap();
        tokio::fs::write(dir.path().join("p/readme.txt"), "ignored").await.unwrap();

        let notes: Vec<Note> = store.list("p").await.unwrap();
        assert_eq!(notes, vec![Note { text: "ok".into() }]);
        assert!(store.list::<Note>("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_all_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = JsonDirStore::open(dir.path().join("root")).await.unwrap();
        store.write("p", "n", &Note { text: "x".into() }).await.unwrap();
        store.remove_all().await.unwrap();
        assert!(!dir.path().join("root").exists());
        store.remove_all().await.unwrap();
    }
}
