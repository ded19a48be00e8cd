//! Node registry - the ordered, append-only set of storage nodes
//!
//! Readers take a [`NodeSnapshot`], a frozen copy that stays valid however
//! many nodes are added afterwards. Growth swaps in a new snapshot under a
//! short write lock; the lock is never held while talking to a node.

use super::StorageError;
use crate::node::{DiskNode, HttpNode, MemoryNode, NodeError, StorageNode};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

/// A registered node. The index is assigned once and never reused.
#[derive(Debug, Clone, Serialize)]
pub struct NodeHandle {
    pub index: usize,
    pub address: String,
    pub added_at: i64,
    #[serde(skip)]
    pub node: Arc<dyn StorageNode>,
}

/// Immutable view of the registry at one point in time
#[derive(Debug, Clone)]
pub struct NodeSnapshot(Arc<[NodeHandle]>);

impl Default for NodeSnapshot {
    fn default() -> Self {
        Self(Arc::from(Vec::new()))
    }
}

impl Deref for NodeSnapshot {
    type Target = [NodeHandle];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Turns a node address into a storage capability
#[async_trait]
pub trait NodeConnector: Send + Sync {
    async fn connect(&self, address: &str) -> Result<Arc<dyn StorageNode>, NodeError>;
}

/// Resolves `memory://`, `file://`, `http(s)://` and bare `:port` addresses
pub struct DefaultConnector {
    client: reqwest::Client,
}

impl DefaultConnector {
    pub fn new(request_timeout: Duration) -> Result<Self, NodeError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| NodeError::Transport(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl NodeConnector for DefaultConnector {
    async fn connect(&self, address: &str) -> Result<Arc<dyn StorageNode>, NodeError> {
        if let Some(name) = address.strip_prefix("memory://") {
            return Ok(Arc::new(MemoryNode::new(name)));
        }
        if let Some(path) = address.strip_prefix("file://") {
            return Ok(Arc::new(DiskNode::open(path).await?));
        }
        if address.starts_with("http://") || address.starts_with("https://") {
            return Ok(Arc::new(HttpNode::new(address, self.client.clone())));
        }
        if address.starts_with(':') {
            return Ok(Arc::new(HttpNode::new(
                format!("http://localhost{}", address),
                self.client.clone(),
            )));
        }

        Err(NodeError::Rejected(format!(
            "unsupported node address: {}",
            address
        )))
    }
}

pub struct NodeRegistry {
    nodes: RwLock<NodeSnapshot>,
    connector: Arc<dyn NodeConnector>,
}

impl NodeRegistry {
    pub fn new(connector: Arc<dyn NodeConnector>) -> Self {
        Self {
            nodes: RwLock::new(NodeSnapshot::default()),
            connector,
        }
    }

    /// Frozen copy of the current node list
    pub fn snapshot(&self) -> NodeSnapshot {
        self.nodes.read().clone()
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn find(&self, address: &str) -> Option<NodeHandle> {
        self.nodes
            .read()
            .iter()
            .find(|h| h.address == address)
            .cloned()
    }

    /// Register a node by address. Adding a known address returns its handle.
    pub async fn add_node(&self, address: &str) -> Result<NodeHandle, StorageError> {
        let address = address.trim();
        if address.is_empty() {
            return Err(StorageError::Configuration(
                "node address must not be empty".into(),
            ));
        }

        if let Some(existing) = self.find(address) {
            return Ok(existing);
        }

        let node = self.connector.connect(address).await.map_err(|e| {
            StorageError::Configuration(format!("cannot attach node {}: {}", address, e))
        })?;

        Ok(self.insert(address, node))
    }

    /// Register an already constructed node under `address`
    pub fn add_node_with(
        &self,
        address: &str,
        node: Arc<dyn StorageNode>,
    ) -> Result<NodeHandle, StorageError> {
        let address = address.trim();
        if address.is_empty() {
            return Err(StorageError::Configuration(
                "node address must not be empty".into(),
            ));
        }
        Ok(self.insert(address, node))
    }

    fn insert(&self, address: &str, node: Arc<dyn StorageNode>) -> NodeHandle {
        let mut nodes = self.nodes.write();

        // Lost a race against another add of the same address
        if let Some(existing) = nodes.iter().find(|h| h.address == address) {
            return existing.clone();
        }

        let handle = NodeHandle {
            index: nodes.len(),
            address: address.to_string(),
            added_at: chrono::Utc::now().timestamp(),
            node,
        };

        let mut grown = Vec::with_capacity(nodes.len() + 1);
        grown.extend(nodes.iter().cloned());
        grown.push(handle.clone());
        *nodes = NodeSnapshot(grown.into());

        tracing::info!(
            index = handle.index,
            address = %handle.address,
            total = nodes.len(),
            "storage node added"
        );

        handle
    }
}
