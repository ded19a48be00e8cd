//! Storage Module - chunk directory plus the distribution and retrieval engines
//!
//! Files are split into parts by a [`PartitionPolicy`], the parts are written
//! to the nodes of a [`NodeRegistry`] snapshot, and the resulting layout only
//! becomes readable once the [`ChunkDirectory`] commits it.

mod checksum;
mod directory;
mod distribution;
mod node_io;
mod partition;
mod reclaim;
mod registry;
mod retrieval;

pub use checksum::PartChecksum;
pub use directory::{
    ChunkDirectory, ConflictPolicy, FileLayout, LayoutState, PartDescriptor, UploadTicket,
};
pub use distribution::DistributionEngine;
pub use node_io::NodeIo;
pub use partition::{plan, ByteRange, PartitionPolicy, PlannedPart};
pub use registry::{DefaultConnector, NodeConnector, NodeHandle, NodeRegistry, NodeSnapshot};
pub use retrieval::RetrievalEngine;

use crate::node::NodeError;
use std::fmt;
use thiserror::Error;

/// A single part operation that a node failed
#[derive(Debug)]
pub struct PartFailure {
    pub part_index: usize,
    pub node_index: usize,
    pub address: String,
    pub source: NodeError,
}

impl fmt::Display for PartFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "part {} on node {} ({}): {}",
            self.part_index, self.node_index, self.address, self.source
        )
    }
}

fn join_failures(failures: &[PartFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Upload already in progress for {0}")]
    Conflict(String),

    #[error("Failed to write {file_id}: {}", join_failures(.failures))]
    NodeWrite {
        file_id: String,
        failures: Vec<PartFailure>,
    },

    #[error("Failed to read {file_id}: {failure}")]
    NodeRead {
        file_id: String,
        failure: PartFailure,
    },

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Upload of {0} was cancelled")]
    Cancelled(String),

    #[error("Ticket does not match layout: {0}")]
    InvalidTicket(String),
}

impl StorageError {
    /// Part indices a node failed on, if this error came from node I/O
    pub fn failed_parts(&self) -> Vec<usize> {
        match self {
            StorageError::NodeWrite { failures, .. } => {
                failures.iter().map(|f| f.part_index).collect()
            }
            StorageError::NodeRead { failure, .. } => vec![failure.part_index],
            _ => vec![],
        }
    }
}
