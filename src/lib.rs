//! ChunkVault Core - chunked object store front-end
//!
//! This crate accepts whole files, splits them into contiguous parts, spreads
//! the parts over a growable set of storage nodes and reassembles them on
//! download. A file only becomes downloadable once every part is stored.

pub mod api;
pub mod cli;
pub mod node;
pub mod storage;
pub mod telemetry;

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use node::StorageNode;
use storage::{
    ChunkDirectory, ConflictPolicy, DistributionEngine, FileLayout, NodeConnector, NodeHandle,
    NodeIo, NodeRegistry, NodeSnapshot, PartitionPolicy, RetrievalEngine,
};

/// Main error type for ChunkVault operations
#[derive(Error, Debug)]
pub enum ChunkVaultError {
    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),
}

pub type Result<T> = std::result::Result<T, ChunkVaultError>;

/// Core configuration for a ChunkVault front-end
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ChunkVaultConfig {
    /// Name reported in logs and metrics
    pub service_name: String,

    /// What a second concurrent upload of the same file does
    pub conflict_policy: ConflictPolicy,

    /// Upper bound for a single part operation against a node
    pub node_timeout: Duration,

    /// Part operations allowed in flight at once, across all requests
    pub io_concurrency: usize,

    /// Parts per node for each upload
    pub stripes_per_node: usize,

    /// Largest accepted upload (in bytes)
    pub max_upload_bytes: usize,
}

impl Default for ChunkVaultConfig {
    fn default() -> Self {
        Self {
            service_name: "chunk-vault".to_string(),
            conflict_policy: ConflictPolicy::FailFast,
            node_timeout: Duration::from_secs(10),
            io_concurrency: 16,
            stripes_per_node: 1,
            max_upload_bytes: 64 * 1024 * 1024, // 64 MiB
        }
    }
}

/// The storage core: registry, directory and the two engines sharing them
pub struct ChunkVault {
    pub config: ChunkVaultConfig,
    registry: Arc<NodeRegistry>,
    directory: Arc<ChunkDirectory>,
    distributor: DistributionEngine,
    retriever: RetrievalEngine,
}

impl ChunkVault {
    /// Create a vault with no nodes; nodes are attached through `connector`
    pub fn new(config: ChunkVaultConfig, connector: Arc<dyn NodeConnector>) -> Result<Self> {
        let policy = PartitionPolicy::new(config.stripes_per_node)?;
        let io = NodeIo::new(config.io_concurrency, config.node_timeout);

        let registry = Arc::new(NodeRegistry::new(connector));
        let directory = Arc::new(ChunkDirectory::new(config.conflict_policy));

        Ok(Self {
            distributor: DistributionEngine::new(
                registry.clone(),
                directory.clone(),
                policy,
                io.clone(),
            ),
            retriever: RetrievalEngine::new(directory.clone(), io),
            registry,
            directory,
            config,
        })
    }

    /// Create a vault and attach the initial node set, in order
    pub async fn bootstrap(
        config: ChunkVaultConfig,
        connector: Arc<dyn NodeConnector>,
        addresses: &[String],
    ) -> Result<Self> {
        let vault = Self::new(config, connector)?;
        for address in addresses {
            vault.add_node(address).await?;
        }

        tracing::info!(
            service = %vault.config.service_name,
            nodes = vault.registry.len(),
            "vault ready"
        );
        Ok(vault)
    }

    /// Store `data` under `file_id`, replacing any earlier version on success
    pub async fn upload(&self, file_id: &str, data: &[u8]) -> Result<Arc<FileLayout>> {
        Ok(self.distributor.distribute(file_id, data).await?)
    }

    pub async fn upload_until_cancelled(
        &self,
        file_id: &str,
        data: &[u8],
        cancel: &CancellationToken,
    ) -> Result<Arc<FileLayout>> {
        Ok(self
            .distributor
            .distribute_until_cancelled(file_id, data, cancel)
            .await?)
    }

    /// Reassemble the committed version of `file_id`
    pub async fn download(&self, file_id: &str) -> Result<Vec<u8>> {
        Ok(self.retriever.retrieve(file_id).await?)
    }

    pub async fn delete(&self, file_id: &str) -> Result<Arc<FileLayout>> {
        Ok(self.distributor.remove(file_id).await?)
    }

    /// Attach a node by address; existing uploads keep their layouts
    pub async fn add_node(&self, address: &str) -> Result<NodeHandle> {
        Ok(self.registry.add_node(address).await?)
    }

    /// Attach an already constructed node
    pub fn attach_node(&self, address: &str, node: Arc<dyn StorageNode>) -> Result<NodeHandle> {
        Ok(self.registry.add_node_with(address, node)?)
    }

    pub fn nodes(&self) -> NodeSnapshot {
        self.registry.snapshot()
    }

    pub fn files(&self) -> Vec<Arc<FileLayout>> {
        self.directory.list()
    }

    pub fn directory(&self) -> &ChunkDirectory {
        &self.directory
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{MemoryNode, NodeError, PartKey};
    use crate::storage::{DefaultConnector, StorageError};
    use tokio::sync::{mpsc, Semaphore};

    fn connector() -> Arc<dyn NodeConnector> {
        Arc::new(DefaultConnector::new(Duration::from_secs(5)).unwrap())
    }

    fn memory_nodes(count: usize) -> Vec<String> {
        (1..=count).map(|i| format!("memory://storage{}", i)).collect()
    }

    #[tokio::test]
    async fn test_upload_download_round_trip() {
        let vault = ChunkVault::bootstrap(ChunkVaultConfig::default(), connector(), &memory_nodes(3))
            .await
            .unwrap();

        let layout = vault.upload("ten.bin", b"0123456789").await.unwrap();
        assert_eq!(layout.parts.len(), 3);
        assert_eq!(vault.download("ten.bin").await.unwrap(), b"0123456789");
        assert_eq!(vault.files().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_upload_is_not_downloadable() {
        let vault = ChunkVault::new(ChunkVaultConfig::default(), connector()).unwrap();
        let nodes: Vec<_> = (1..=3)
            .map(|i| {
                let node = Arc::new(MemoryNode::new(format!("storage{}", i)));
                vault
                    .attach_node(&format!("memory://storage{}", i), node.clone())
                    .unwrap();
                node
            })
            .collect();
        nodes[1].fail_put_on(1);

        let err = vault.upload("a.txt", b"0123456789").await.unwrap_err();
        assert!(matches!(
            err,
            ChunkVaultError::Storage(StorageError::NodeWrite { .. })
        ));
        assert!(matches!(
            vault.download("a.txt").await,
            Err(ChunkVaultError::Storage(StorageError::NotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_node_growth() {
        let vault = ChunkVault::bootstrap(ChunkVaultConfig::default(), connector(), &memory_nodes(3))
            .await
            .unwrap();
        vault.upload("a.txt", b"0123456789").await.unwrap();
        vault.upload("b.txt", b"abcdefghij").await.unwrap();

        vault.add_node("memory://storage4").await.unwrap();

        // Untouched files still read through their original layout
        assert_eq!(vault.directory().lookup("b.txt").unwrap().node_count, 3);
        assert_eq!(vault.download("b.txt").await.unwrap(), b"abcdefghij");

        let layout = vault.upload("a.txt", b"0123456789").await.unwrap();
        assert_eq!(layout.node_count, 4);
        assert_eq!(layout.parts.len(), 4);
        assert_eq!(vault.download("a.txt").await.unwrap(), b"0123456789");
    }

    /// Memory node whose writes wait for a permit from a shared gate
    #[derive(Debug)]
    struct GatedNode {
        inner: MemoryNode,
        gate: Arc<Semaphore>,
        started: mpsc::UnboundedSender<PartKey>,
    }

    #[async_trait::async_trait]
    impl StorageNode for GatedNode {
        async fn put(&self, key: &PartKey, data: Vec<u8>) -> std::result::Result<(), NodeError> {
            let _ = self.started.send(key.clone());
            self.gate.acquire().await.unwrap().forget();
            self.inner.put(key, data).await
        }

        async fn get(&self, key: &PartKey) -> std::result::Result<Vec<u8>, NodeError> {
            self.inner.get(key).await
        }

        async fn delete(&self, key: &PartKey) -> std::result::Result<(), NodeError> {
            self.inner.delete(key).await
        }
    }

    #[tokio::test]
    async fn test_download_during_upload_sees_committed_version() {
        let vault = Arc::new(ChunkVault::new(ChunkVaultConfig::default(), connector()).unwrap());
        let gate = Arc::new(Semaphore::new(0));
        let (started_tx, mut started) = mpsc::unbounded_channel();
        for i in 1..=3 {
            let node = GatedNode {
                inner: MemoryNode::new(format!("gated{}", i)),
                gate: gate.clone(),
                started: started_tx.clone(),
            };
            vault
                .attach_node(&format!("memory://gated{}", i), Arc::new(node))
                .unwrap();
        }

        gate.add_permits(3);
        let old = vault.upload("a.txt", b"old contents").await.unwrap();

        let writer = {
            let vault = vault.clone();
            tokio::spawn(async move { vault.upload("a.txt", b"new contents!").await })
        };
        // Block until the new upload is writing its parts
        loop {
            let key = started.recv().await.unwrap();
            if key.upload_id != old.upload_id {
                break;
            }
        }

        assert_eq!(vault.download("a.txt").await.unwrap(), b"old contents");
        assert_eq!(vault.directory().in_progress(), vec!["a.txt".to_string()]);

        gate.add_permits(3);
        let new = writer.await.unwrap().unwrap();

        assert_ne!(new.upload_id, old.upload_id);
        assert_eq!(vault.download("a.txt").await.unwrap(), b"new contents!");
    }

    #[tokio::test]
    async fn test_invalid_stripes_rejected() {
        let config = ChunkVaultConfig {
            stripes_per_node: 0,
            ..Default::default()
        };

        assert!(ChunkVault::new(config, connector()).is_err());
    }
}
