use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::{decode_record, is_valid_key, Storage};
use crate::config::StorageConfig;
use crate::error::{StorageError, StorageResult};
use crate::tree::ThoughtTree;

const RECORD_EXTENSION: &str = "json";

/// Directory-backed storage holding one `<tree_id>.json` record per tree
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    /// Create a file storage instance, creating the record directory if needed
    pub async fn new(config: &StorageConfig) -> StorageResult<Self> {
        tokio::fs::create_dir_all(&config.data_dir)
            .await
            .map_err(|e| io_error(&config.data_dir, e))?;

        info!(path = %config.data_dir.display(), "Record directory ready");
        Ok(Self {
            root: config.data_dir.clone(),
        })
    }

    /// Directory holding the records
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, id: &str) -> StorageResult<PathBuf> {
        if !is_valid_key(id) {
            return Err(StorageError::InvalidKey { key: id.to_string() });
        }
        Ok(self.root.join(format!("{}.{}", id, RECORD_EXTENSION)))
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn save_tree(&self, tree: &ThoughtTree) -> StorageResult<()> {
        let path = self.record_path(&tree.id)?;
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(tree)?;

        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| io_error(&tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| io_error(&path, e))?;

        debug!(tree_id = %tree.id, bytes = bytes.len(), "Tree record written");
        Ok(())
    }

    async fn load_tree(&self, id: &str) -> StorageResult<Option<ThoughtTree>> {
        // Ids that could never have been written simply do not exist.
        if !is_valid_key(id) {
            return Ok(None);
        }
        let path = self.record_path(id)?;

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(&path, e)),
        };

        decode_record(id, &bytes).map(Some)
    }

    async fn list_tree_ids(&self) -> StorageResult<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| io_error(&self.root, e))?;

        let mut ids = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error(&self.root, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if is_valid_key(stem) {
                    ids.push(stem.to_string());
                }
            }
        }

        ids.sort();
        Ok(ids)
    }

    async fn delete_tree(&self, id: &str) -> StorageResult<bool> {
        if !is_valid_key(id) {
            return Ok(false);
        }
        let path = self.record_path(id)?;

        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_error(&path, e)),
        }
    }

    fn location(&self, id: &str) -> String {
        self.root
            .join(format!("{}.{}", id, RECORD_EXTENSION))
            .display()
            .to_string()
    }
}

fn io_error(path: &Path, source: std::io::Error) -> StorageError {
    StorageError::Io {
        path: path.display().to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::Strategy;
    use tempfile::tempdir;

    async fn storage_in(dir: &Path) -> FileStorage {
        FileStorage::new(&StorageConfig {
            data_dir: dir.to_path_buf(),
        })
        .await
        .expect("Failed to create file storage")
    }

    fn sample_tree() -> ThoughtTree {
        ThoughtTree::new(
            "Plan a migration",
            vec!["feasibility".to_string()],
            Strategy::Greedy,
            3,
            0.3,
        )
    }

    #[tokio::test]
    async fn test_new_creates_directory() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let storage = storage_in(&nested).await;
        assert!(nested.is_dir());
        assert_eq!(storage.root(), nested.as_path());
    }

    #[tokio::test]
    async fn test_save_leaves_no_temporary_file() {
        let dir = tempdir().unwrap();
        let storage = storage_in(dir.path()).await;
        let tree = sample_tree();

        storage.save_tree(&tree).await.unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec![format!("{}.json", tree.id)]);
    }

    #[tokio::test]
    async fn test_list_ignores_foreign_files() {
        let dir = tempdir().unwrap();
        let storage = storage_in(dir.path()).await;
        let tree = sample_tree();
        storage.save_tree(&tree).await.unwrap();

        std::fs::write(dir.path().join("notes.txt"), "hi").unwrap();
        std::fs::write(dir.path().join("stale.json.tmp"), "{").unwrap();

        assert_eq!(storage.list_tree_ids().await.unwrap(), vec![tree.id]);
    }

    #[tokio::test]
    async fn test_invalid_keys() {
        let dir = tempdir().unwrap();
        let storage = storage_in(dir.path()).await;

        assert!(storage.load_tree("../outside").await.unwrap().is_none());
        assert!(!storage.delete_tree("../outside").await.unwrap());

        let mut tree = sample_tree();
        tree.id = "bad/id".to_string();
        let err = storage.save_tree(&tree).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey { .. }));
    }

    #[tokio::test]
    async fn test_location_names_record() {
        let dir = tempdir().unwrap();
        let storage = storage_in(dir.path()).await;
        assert!(storage.location("abc").ends_with("abc.json"));
    }
}
