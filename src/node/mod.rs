//! Storage Node Module - the capability every storage backend offers
//!
//! A node stores opaque part payloads by [`PartKey`]. The core never cares
//! whether the bytes end up in memory, on a local disk or behind HTTP.

mod disk;
mod http;
mod memory;
mod server;

pub use disk::{DiskNode, StoredPart};
pub use http::{HttpNode, PartUpload};
pub use memory::MemoryNode;
pub use server::{node_router, NodeServerState};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum NodeError {
    #[error("Part not found: {0}")]
    NotFound(String),

    #[error("Node rejected the request: {0}")]
    Rejected(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Part integrity check failed: {0}")]
    Integrity(String),

    #[error("Timeout after {0:?}")]
    Timeout(std::time::Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Identity of one stored part.
///
/// Keys are scoped by the upload that produced them, so a re-upload of the
/// same file never overwrites the parts of the layout readers are using.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartKey {
    /// File the part belongs to
    pub file_id: String,

    /// Upload that wrote the part
    pub upload_id: Uuid,

    /// Position of the part inside the file
    pub index: usize,
}

impl PartKey {
    pub fn new(file_id: impl Into<String>, upload_id: Uuid, index: usize) -> Self {
        Self {
            file_id: file_id.into(),
            upload_id,
            index,
        }
    }
}

impl fmt::Display for PartKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}#{}", self.file_id, self.upload_id, self.index)
    }
}

/// A storage endpoint capable of storing and returning parts by identity
#[async_trait]
pub trait StorageNode: Send + Sync + fmt::Debug {
    /// Durably store `data` under `key`, replacing any previous payload
    async fn put(&self, key: &PartKey, data: Vec<u8>) -> Result<(), NodeError>;

    /// Return the payload stored under `key`
    async fn get(&self, key: &PartKey) -> Result<Vec<u8>, NodeError>;

    /// Forget `key`; deleting a missing key is not an error
    async fn delete(&self, key: &PartKey) -> Result<(), NodeError>;
}
