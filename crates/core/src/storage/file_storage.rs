use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use async_trait::async_trait;
use tracing::{debug, trace};

use super::{validate_key, Storage, StorageError, StorageOptions, StorageResult, RESERVED_PREFIX};

/// A file-based storage implementation.
///
/// Each key maps to one file below the base directory. Writes go to a
/// sibling temporary file which is then renamed over the target, so a
/// concurrent reader sees either the old or the new contents.
pub struct FileStorage {
    base_path: PathBuf,
    options: StorageOptions,
    cache: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl FileStorage {
    /// Create a new file storage instance rooted at `base_path`
    pub async fn new(base_path: impl Into<PathBuf>) -> StorageResult<Self> {
        let path = base_path.into();

        if !path.exists() {
            fs::create_dir_all(&path).await?;
        }

        Ok(Self {
            base_path: path,
            options: StorageOptions::default(),
            cache: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Set storage options
    pub fn with_options(mut self, options: StorageOptions) -> Self {
        self.options = options;
        self
    }

    /// Get the full path for a key
    fn get_path(&self, key: &str) -> PathBuf {
        key.split('/').fold(self.base_path.clone(), |path, part| path.join(part))
    }

    /// Sibling path for an in-flight write to `path`. Keys cannot start a
    /// segment with the reserved prefix, so this never names a stored key.
    fn tmp_path(path: &Path) -> PathBuf {
        let mut name = std::ffi::OsString::from(RESERVED_PREFIX);
        if let Some(file_name) = path.file_name() {
            name.push(file_name);
        }
        path.with_file_name(name)
    }

    /// Recursive helper to list directory contents as storage keys
    async fn list_directory(&self, dir_path: &Path) -> StorageResult<Vec<String>> {
        let mut result = Vec::new();
        let mut pending = vec![dir_path.to_path_buf()];

        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let file_type = entry.file_type().await?;

                if file_type.is_dir() {
                    pending.push(path);
                } else if file_type.is_file() {
                    let in_flight = path
                        .file_name()
                        .map(|n| n.to_string_lossy().starts_with(RESERVED_PREFIX))
                        .unwrap_or(false);
                    if in_flight {
                        continue;
                    }
                    if let Ok(rel_path) = path.strip_prefix(&self.base_path) {
                        let key = rel_path
                            .components()
                            .map(|c| c.as_os_str().to_string_lossy().into_owned())
                            .collect::<Vec<_>>()
                            .join("/");
                        result.push(key);
                    }
                }
            }
        }

        result.sort();
        Ok(result)
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn put(&self, key: &str, data: &[u8]) -> StorageResult<()> {
        validate_key(key)?;
        let path = self.get_path(key);

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent).await?;
            }
        }

        let tmp_path = Self::tmp_path(&path);

        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(data).await?;
        if self.options.sync_write {
            file.sync_all().await?;
        }
        drop(file);
        fs::rename(&tmp_path, &path).await?;

        if self.options.use_cache {
            let mut cache = self.cache.write().await;
            cache.insert(key.to_string(), data.to_vec());
        }

        debug!("Stored data at key: {}", key);
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Vec<u8>> {
        if self.options.use_cache {
            let cache = self.cache.read().await;
            if let Some(data) = cache.get(key) {
                trace!("Retrieved data from cache for key: {}", key);
                return Ok(data.clone());
            }
        }

        validate_key(key)?;
        let path = self.get_path(key);
        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::KeyNotFound(key.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        if self.options.use_cache {
            let mut cache = self.cache.write().await;
            cache.insert(key.to_string(), data.clone());
        }

        trace!("Retrieved data for key: {}", key);
        Ok(data)
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        validate_key(key)?;
        let path = self.get_path(key);

        match fs::remove_file(&path).await {
            Ok(()) => debug!("Deleted key: {}", key),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        if self.options.use_cache {
            let mut cache = self.cache.write().await;
            cache.remove(key);
        }

        Ok(())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        if self.options.use_cache {
            let cache = self.cache.read().await;
            if cache.contains_key(key) {
                return Ok(true);
            }
        }

        validate_key(key)?;
        Ok(fs::metadata(self.get_path(key)).await.map(|m| m.is_file()).unwrap_or(false))
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        // Only whole directory prefixes ("a/b/") map onto the filesystem directly
        let dir_prefix = match prefix.rfind('/') {
            Some(idx) => &prefix[..idx],
            None => "",
        };
        let dir = if dir_prefix.is_empty() {
            self.base_path.clone()
        } else {
            self.get_path(dir_prefix)
        };
        trace!("Listing keys with prefix: {}", prefix);

        if !dir.exists() {
            return Ok(Vec::new());
        }
        if !dir.is_dir() {
            return Err(StorageError::NotADirectory(prefix.to_string()));
        }

        let keys = self.list_directory(&dir).await?;
        Ok(keys.into_iter().filter(|k| k.starts_with(prefix)).collect())
    }

    fn base_path(&self) -> Option<PathBuf> {
        Some(self.base_path.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::JsonStorage;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_file_storage_round_trip() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::new(dir.path()).await.unwrap();

        storage.put("governance/proposals/p1", b"one").await.unwrap();
        storage.put("governance/positions/p1/alice", b"two").await.unwrap();
        storage.put("governance/positions/p1/bob", b"three").await.unwrap();
        storage.put("governance/positions/p2/carol", b"four").await.unwrap();

        assert_eq!(storage.get("governance/proposals/p1").await.unwrap(), b"one");

        let keys = storage.list("governance/positions/p1/").await.unwrap();
        assert_eq!(keys, vec![
            "governance/positions/p1/alice".to_string(),
            "governance/positions/p1/bob".to_string(),
        ]);

        storage.delete("governance/positions/p1/alice").await.unwrap();
        assert!(!storage.exists("governance/positions/p1/alice").await.unwrap());
        assert!(storage.list("governance/missing/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_values_survive_reopen() {
        let dir = tempdir().unwrap();
        {
            let storage = FileStorage::new(dir.path()).await.unwrap();
            storage.put_json("config/value", &vec![1u32, 2, 3]).await.unwrap();
        }

        let reopened = FileStorage::new(dir.path()).await.unwrap();
        let value: Vec<u32> = reopened.get_json("config/value").await.unwrap();
        assert_eq!(value, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_keys_resembling_temp_files_are_listed() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::new(dir.path()).await.unwrap()
            .with_options(StorageOptions { sync_write: false, use_cache: false });

        storage.put("governance/positions/p1/eve.partial", b"block").await.unwrap();
        storage.put("governance/positions/p1/eve.partial.partial", b"support").await.unwrap();
        storage.put("governance/positions/p1/eve.tmp", b"oppose").await.unwrap();

        let keys = storage.list("governance/positions/p1/").await.unwrap();
        assert_eq!(keys, vec![
            "governance/positions/p1/eve.partial".to_string(),
            "governance/positions/p1/eve.partial.partial".to_string(),
            "governance/positions/p1/eve.tmp".to_string(),
        ]);
        assert_eq!(storage.get("governance/positions/p1/eve.partial").await.unwrap(), b"block");
        assert_eq!(storage.get("governance/positions/p1/eve.partial.partial").await.unwrap(), b"support");

        // A leftover in-flight file is not a key
        tokio::fs::write(dir.path().join("governance/positions/p1/~eve"), b"torn").await.unwrap();
        assert_eq!(storage.list("governance/positions/p1/").await.unwrap().len(), 3);
        assert!(matches!(
            storage.put("governance/positions/p1/~eve", b"x").await,
            Err(StorageError::InvalidKey(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_key_without_cache() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::new(dir.path()).await.unwrap()
            .with_options(StorageOptions { sync_write: false, use_cache: false });

        assert!(matches!(storage.get("nothing/here").await, Err(StorageError::KeyNotFound(_))));
    }
}
