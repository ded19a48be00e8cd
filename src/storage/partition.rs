//! Partition policy - how a byte stream is cut into parts and placed on nodes

use super::StorageError;
use serde::{Deserialize, Serialize};

/// Half-open byte range `[start, end)` of the original file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(start <= end);
        Self { start, end }
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Borrow this range out of `data`
    pub fn slice<'a>(&self, data: &'a [u8]) -> &'a [u8] {
        &data[self.start as usize..self.end as usize]
    }
}

/// Cut `[0, total_bytes)` into exactly `node_count` contiguous ranges.
///
/// Every range is `ceil(total_bytes / node_count)` long, clamped at the end
/// of the data, so trailing ranges can be short or empty.
pub fn plan(total_bytes: u64, node_count: usize) -> Result<Vec<ByteRange>, StorageError> {
    if node_count == 0 {
        return Err(StorageError::Configuration(
            "cannot partition across zero nodes".into(),
        ));
    }

    let count = node_count as u64;
    let part_size = total_bytes.div_ceil(count);

    Ok((0..count)
        .map(|i| {
            let start = (i * part_size).min(total_bytes);
            let end = ((i + 1) * part_size).min(total_bytes);
            ByteRange::new(start, end)
        })
        .collect())
}

/// One planned part and the snapshot slot of the node that will hold it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedPart {
    pub part_index: usize,
    pub node_slot: usize,
    pub range: ByteRange,
}

/// Decides how many parts a file gets for a given node count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionPolicy {
    /// Parts placed on every node; 1 means one part per node
    pub stripes_per_node: usize,
}

impl PartitionPolicy {
    pub fn new(stripes_per_node: usize) -> Result<Self, StorageError> {
        if stripes_per_node == 0 {
            return Err(StorageError::Configuration(
                "stripes_per_node must be at least 1".into(),
            ));
        }
        Ok(Self { stripes_per_node })
    }

    /// Number of parts a file is split into
    pub fn part_count(&self, node_count: usize) -> usize {
        node_count * self.stripes_per_node
    }

    /// Plan a file of `total_bytes` over `node_count` nodes.
    ///
    /// Part `i` lands on snapshot slot `i % node_count`.
    pub fn plan(
        &self,
        total_bytes: u64,
        node_count: usize,
    ) -> Result<Vec<PlannedPart>, StorageError> {
        if node_count == 0 {
            return Err(StorageError::Configuration(
                "no storage nodes registered".into(),
            ));
        }

        let ranges = plan(total_bytes, self.part_count(node_count))?;

        Ok(ranges
            .into_iter()
            .enumerate()
            .map(|(part_index, range)| PlannedPart {
                part_index,
                node_slot: part_index % node_count,
                range,
            })
            .collect())
    }
}

impl Default for PartitionPolicy {
    fn default() -> Self {
        Self { stripes_per_node: 1 }
    }
}
