use std::{collections::HashMap, path::PathBuf};

use parking_lot::Mutex;

/// Persistent-store failures never cross the public pipeline API; the frame
/// cache degrades to memory-only instead.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("store quota exceeded")]
    QuotaExceeded,

    #[error("store i/o error: {0}")]
    Io(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Minimal persistent key-value capability backing the tier-2 frame cache.
#[async_trait::async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// May fail with [`StoreError::QuotaExceeded`] when the backing store is
    /// size-bounded and full.
    async fn set(&self, key: &str, value: &[u8]) -> StoreResult<()>;

    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Remove every key. Used when a quota failure forces a purge.
    async fn clear(&self) -> StoreResult<()>;
}

/// In-process store with an optional byte quota. Used in tests and as the
/// degraded fallback when no durable backing is available.
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
    quota_bytes: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            quota_bytes: None,
        }
    }

    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            quota_bytes: Some(quota_bytes),
        }
    }

    fn used(entries: &HashMap<String, Vec<u8>>) -> usize {
        entries.values().map(Vec::len).sum()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        let mut entries = self.entries.lock();
        if let Some(quota) = self.quota_bytes {
            let without_key = Self::used(&entries)
                - entries.get(key).map(Vec::len).unwrap_or(0);
            if without_key + value.len() > quota {
                return Err(StoreError::QuotaExceeded);
            }
        }
        entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn clear(&self) -> StoreResult<()> {
        self.entries.lock().clear();
        Ok(())
    }
}

/// Directory-backed store: one file per key, atomic tmp+rename writes, an
/// explicit byte quota across all keys.
pub struct DirStore {
    root: PathBuf,
    quota_bytes: u64,
}

impl DirStore {
    pub async fn open(root: impl Into<PathBuf>, quota_bytes: u64) -> StoreResult<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| StoreError::Io(format!("failed to create store root: {e}")))?;
        Ok(Self { root, quota_bytes })
    }

    fn key_path(&self, key: &str) -> PathBuf {
        // Keys are caller-controlled identifiers, not paths; flatten
        // anything that is not filename-safe.
        let safe: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                c
            } else {
                '_'
            })
            .collect();
        self.root.join(format!("{safe}.bin"))
    }

    async fn used_bytes(&self) -> StoreResult<u64> {
        let mut total = 0u64;
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| StoreError::Io(format!("failed to read store root: {e}")))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::Io(format!("failed to scan store root: {e}")))?
        {
            if let Ok(meta) = entry.metadata().await {
                if meta.is_file() {
                    total += meta.len();
                }
            }
        }
        Ok(total)
    }
}

#[async_trait::async_trait]
impl KeyValueStore for DirStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        match tokio::fs::read(self.key_path(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(format!("failed to read '{key}': {e}"))),
        }
    }

    async fn set(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        let path = self.key_path(key);
        let prior = tokio::fs::metadata(&path).await.map(|m| m.len()).unwrap_or(0);
        let used = self.used_bytes().await?;
        if used - prior + value.len() as u64 > self.quota_bytes {
            return Err(StoreError::QuotaExceeded);
        }

        let tmp = path.with_extension("bin.tmp");
        tokio::fs::write(&tmp, value)
            .await
            .map_err(|e| StoreError::Io(format!("failed to write '{key}': {e}")))?;
        tokio::fs::rename(&tmp, &path).await.map_err(|e| {
            StoreError::Io(format!("failed to commit '{key}': {e}"))
        })?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        match tokio::fs::remove_file(self.key_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(format!("failed to delete '{key}': {e}"))),
        }
    }

    async fn clear(&self) -> StoreResult<()> {
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| StoreError::Io(format!("failed to read store root: {e}")))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::Io(format!("failed to scan store root: {e}")))?
        {
            let _ = tokio::fs::remove_file(entry.path()).await;
        }
        Ok(())
    }
}
