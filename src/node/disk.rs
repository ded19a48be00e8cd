//! Local directory storage node - one file per part plus a JSON index

use super::{NodeError, PartKey, StorageNode};
use crate::storage::PartChecksum;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use uuid::Uuid;

const INDEX_FILE: &str = "index.json";
const PARTS_DIR: &str = "parts";

/// Information about a part stored on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredPart {
    /// Display form of the part key
    pub part_key: String,

    /// File the part belongs to
    pub file_id: String,

    /// Size in bytes
    pub size_bytes: u64,

    /// BLAKE3 hash of the payload (hex)
    pub content_hash: String,

    /// Creation timestamp
    pub created_at: i64,

    /// Path relative to the node root
    pub local_path: String,

    /// Read count
    pub access_count: u64,

    /// Last read timestamp
    pub last_accessed: i64,
}

#[derive(Debug, Default)]
struct DiskIndex {
    parts: HashMap<String, StoredPart>,
    used_bytes: u64,
    /// Bytes of writes that passed the capacity check but are not indexed yet
    reserved_bytes: u64,
    generation: u64,
}

impl DiskIndex {
    /// Serialized index tagged with a new generation number
    fn snapshot(&mut self) -> Result<(u64, String), NodeError> {
        self.generation += 1;
        let raw = serde_json::to_string(&self.parts)
            .map_err(|e| NodeError::Rejected(format!("Failed to serialize index: {}", e)))?;
        Ok((self.generation, raw))
    }
}

/// Stores parts as files below a root directory.
///
/// The index lock only guards in-memory bookkeeping; part files and the index
/// file are written without it. Index writes are ordered by generation so an
/// older snapshot never replaces a newer one.
#[derive(Debug)]
pub struct DiskNode {
    root: PathBuf,
    max_bytes: Option<u64>,
    index: Mutex<DiskIndex>,
    persisted: Mutex<u64>,
}

impl DiskNode {
    /// Open (or create) a node rooted at `root`, loading any existing index
    pub async fn open(root: impl AsRef<Path>) -> Result<Self, NodeError> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(root.join(PARTS_DIR)).await?;

        let index_path = root.join(INDEX_FILE);
        let mut index = DiskIndex::default();
        if tokio::fs::try_exists(&index_path).await? {
            let raw = tokio::fs::read_to_string(&index_path).await?;
            index.parts = serde_json::from_str(&raw)
                .map_err(|e| NodeError::Rejected(format!("Failed to parse index: {}", e)))?;
            index.used_bytes = index.parts.values().map(|p| p.size_bytes).sum();
        }

        tracing::debug!(
            root = %root.display(),
            parts = index.parts.len(),
            "opened disk node"
        );

        Ok(Self {
            root,
            max_bytes: None,
            index: Mutex::new(index),
            persisted: Mutex::new(0),
        })
    }

    /// Refuse writes that would take the node above `max_bytes`
    pub fn with_capacity(mut self, max_bytes: u64) -> Self {
        self.max_bytes = Some(max_bytes);
        self
    }

    pub async fn used_bytes(&self) -> u64 {
        self.index.lock().await.used_bytes
    }

    pub async fn part_count(&self) -> usize {
        self.index.lock().await.parts.len()
    }

    /// Path of a part relative to the root, sharded by the first hash byte
    fn relative_path(key: &PartKey) -> String {
        let digest = PartChecksum::hash(key.to_string().as_bytes()).to_hex();
        format!("{}/{}/{}", PARTS_DIR, &digest[..2], digest)
    }

    async fn write_part(&self, local_path: &str, data: Vec<u8>) -> Result<(), NodeError> {
        let full_path = self.root.join(local_path);
        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write then rename so a crash never leaves a torn part behind
        let tmp_path = full_path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
        tokio::fs::write(&tmp_path, data).await?;
        if let Err(e) = tokio::fs::rename(&tmp_path, &full_path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn persist(&self, generation: u64, raw: String) -> Result<(), NodeError> {
        let mut persisted = self.persisted.lock().await;
        if *persisted >= generation {
            return Ok(());
        }

        let tmp = self.root.join(format!("{}.tmp", INDEX_FILE));
        tokio::fs::write(&tmp, raw).await?;
        tokio::fs::rename(&tmp, self.root.join(INDEX_FILE)).await?;
        *persisted = generation;
        Ok(())
    }
}

#[async_trait]
impl StorageNode for DiskNode {
    async fn put(&self, key: &PartKey, data: Vec<u8>) -> Result<(), NodeError> {
        let size = data.len() as u64;
        let key_str = key.to_string();

        {
            let mut index = self.index.lock().await;
            let previous = index.parts.get(&key_str).map(|p| p.size_bytes).unwrap_or(0);
            if let Some(max) = self.max_bytes {
                let claimed = index.used_bytes + index.reserved_bytes;
                if claimed.saturating_sub(previous) + size > max {
                    return Err(NodeError::Rejected("Insufficient storage space".into()));
                }
            }
            index.reserved_bytes += size;
        }

        let local_path = Self::relative_path(key);
        let content_hash = PartChecksum::hash(&data).to_hex();
        if let Err(e) = self.write_part(&local_path, data).await {
            self.index.lock().await.reserved_bytes -= size;
            return Err(e);
        }

        let now = chrono::Utc::now().timestamp();
        let (generation, raw) = {
            let mut index = self.index.lock().await;
            index.reserved_bytes -= size;
            let replaced = index.parts.insert(
                key_str.clone(),
                StoredPart {
                    part_key: key_str,
                    file_id: key.file_id.clone(),
                    size_bytes: size,
                    content_hash,
                    created_at: now,
                    local_path,
                    access_count: 0,
                    last_accessed: now,
                },
            );
            let replaced_bytes = replaced.map_or(0, |p| p.size_bytes);
            index.used_bytes = index.used_bytes.saturating_sub(replaced_bytes) + size;
            index.snapshot()?
        };

        self.persist(generation, raw).await
    }

    async fn get(&self, key: &PartKey) -> Result<Vec<u8>, NodeError> {
        let key_str = key.to_string();
        let (full_path, expected_hash) = {
            let mut index = self.index.lock().await;
            let part = index
                .parts
                .get_mut(&key_str)
                .ok_or_else(|| NodeError::NotFound(key_str.clone()))?;

            part.access_count += 1;
            part.last_accessed = chrono::Utc::now().timestamp();
            (self.root.join(&part.local_path), part.content_hash.clone())
        };

        let data = tokio::fs::read(&full_path).await?;

        if PartChecksum::hash(&data).to_hex() != expected_hash {
            return Err(NodeError::Integrity(key_str));
        }

        Ok(data)
    }

    async fn delete(&self, key: &PartKey) -> Result<(), NodeError> {
        let (part, generation, raw) = {
            let mut index = self.index.lock().await;
            let Some(part) = index.parts.remove(&key.to_string()) else {
                return Ok(());
            };
            index.used_bytes = index.used_bytes.saturating_sub(part.size_bytes);
            let (generation, raw) = index.snapshot()?;
            (part, generation, raw)
        };

        match tokio::fs::remove_file(self.root.join(&part.local_path)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        self.persist(generation, raw).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_store_retrieve_part() {
        let temp_dir = TempDir::new().unwrap();
        let node = DiskNode::open(temp_dir.path()).await.unwrap();
        let key = PartKey::new("notes/today.txt", Uuid::new_v4(), 2);

        node.put(&key, b"Test part data".to_vec()).await.unwrap();

        assert_eq!(node.get(&key).await.unwrap(), b"Test part data".to_vec());
        assert_eq!(node.used_bytes().await, 14);
    }

    #[tokio::test]
    async fn test_index_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let key = PartKey::new("a.bin", Uuid::new_v4(), 0);

        {
            let node = DiskNode::open(temp_dir.path()).await.unwrap();
            node.put(&key, vec![7u8; 32]).await.unwrap();
        }

        let reopened = DiskNode::open(temp_dir.path()).await.unwrap();
        assert_eq!(reopened.part_count().await, 1);
        assert_eq!(reopened.get(&key).await.unwrap(), vec![7u8; 32]);
    }

    #[tokio::test]
    async fn test_delete_part() {
        let temp_dir = TempDir::new().unwrap();
        let node = DiskNode::open(temp_dir.path()).await.unwrap();
        let key = PartKey::new("a.bin", Uuid::new_v4(), 0);

        node.put(&key, b"gone soon".to_vec()).await.unwrap();
        node.delete(&key).await.unwrap();

        assert!(matches!(node.get(&key).await, Err(NodeError::NotFound(_))));
        assert_eq!(node.used_bytes().await, 0);
    }

    #[tokio::test]
    async fn test_detects_tampered_part() {
        let temp_dir = TempDir::new().unwrap();
        let node = DiskNode::open(temp_dir.path()).await.unwrap();
        let key = PartKey::new("a.bin", Uuid::new_v4(), 0);

        node.put(&key, b"original".to_vec()).await.unwrap();
        let path = temp_dir.path().join(DiskNode::relative_path(&key));
        tokio::fs::write(&path, b"tampered").await.unwrap();

        assert!(matches!(node.get(&key).await, Err(NodeError::Integrity(_))));
    }

    #[tokio::test]
    async fn test_capacity_limit() {
        let temp_dir = TempDir::new().unwrap();
        let node = DiskNode::open(temp_dir.path())
            .await
            .unwrap()
            .with_capacity(100);
        let key = PartKey::new("big.bin", Uuid::new_v4(), 0);

        let result = node.put(&key, vec![0u8; 200]).await;

        assert!(matches!(result, Err(NodeError::Rejected(_))));
    }

    #[tokio::test]
    async fn test_concurrent_puts_keep_index_consistent() {
        let temp_dir = TempDir::new().unwrap();
        let node = Arc::new(DiskNode::open(temp_dir.path()).await.unwrap());
        let upload_id = Uuid::new_v4();

        let puts = (0..16).map(|i| {
            let node = node.clone();
            tokio::spawn(async move {
                let key = PartKey::new("many.bin", upload_id, i);
                node.put(&key, vec![i as u8; 10]).await
            })
        });
        for result in futures::future::join_all(puts).await {
            result.unwrap().unwrap();
        }

        assert_eq!(node.part_count().await, 16);
        assert_eq!(node.used_bytes().await, 160);
        drop(node);

        let reopened = DiskNode::open(temp_dir.path()).await.unwrap();
        assert_eq!(reopened.part_count().await, 16);
        for i in 0..16 {
            let key = PartKey::new("many.bin", upload_id, i);
            assert_eq!(reopened.get(&key).await.unwrap(), vec![i as u8; 10]);
        }
    }

    #[tokio::test]
    async fn test_capacity_counts_writes_in_progress() {
        let temp_dir = TempDir::new().unwrap();
        let node = Arc::new(
            DiskNode::open(temp_dir.path())
                .await
                .unwrap()
                .with_capacity(100),
        );
        let upload_id = Uuid::new_v4();

        let puts = (0..4).map(|i| {
            let node = node.clone();
            tokio::spawn(async move {
                node.put(&PartKey::new("big.bin", upload_id, i), vec![0u8; 40])
                    .await
            })
        });
        let results: Vec<_> = futures::future::join_all(puts)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 2);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, NodeError::Rejected(_))));
        assert_eq!(node.used_bytes().await, 80);
    }

    #[tokio::test]
    async fn test_overwrite_replaces_size() {
        let temp_dir = TempDir::new().unwrap();
        let node = DiskNode::open(temp_dir.path())
            .await
            .unwrap()
            .with_capacity(30);
        let key = PartKey::new("a.bin", Uuid::new_v4(), 0);

        node.put(&key, vec![1u8; 20]).await.unwrap();
        node.put(&key, vec![2u8; 25]).await.unwrap();

        assert_eq!(node.used_bytes().await, 25);
        assert_eq!(node.get(&key).await.unwrap(), vec![2u8; 25]);

        let index = tokio::fs::read_to_string(temp_dir.path().join(INDEX_FILE))
            .await
            .unwrap();
        assert!(!index.contains('\n'));
    }
}
