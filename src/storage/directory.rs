//! Chunk directory - the authoritative file → layout mapping
//!
//! Two maps, both sharded by [`DashMap`]:
//! - `committed` holds the readable layouts. Readers only ever see this map,
//!   so a pending or failed upload is structurally invisible to them.
//! - `in_flight` holds the write right for each file being uploaded. An
//!   [`UploadTicket`] owns that right until it is committed, aborted or
//!   dropped.
//!
//! No operation holds a shard lock of one map while locking the other, so
//! operations on different files never wait on each other.

use super::reclaim::PartReclaim;
use super::{ByteRange, NodeHandle, NodeIo, PartChecksum, StorageError};
use crate::node::PartKey;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LayoutState {
    Pending,
    Committed,
    Failed,
}

/// Where one part of a file lives
#[derive(Debug, Clone, Serialize)]
pub struct PartDescriptor {
    /// Position of the part; parts are concatenated in this order
    pub part_index: usize,

    /// Node holding the part
    pub node: NodeHandle,

    /// Slice of the original file
    pub range: ByteRange,

    /// Key the part was stored under
    pub key: PartKey,

    /// Checksum of the part payload
    pub checksum: PartChecksum,
}

/// The parts that together reconstruct one file
#[derive(Debug, Clone, Serialize)]
pub struct FileLayout {
    pub file_id: String,

    /// Upload that produced this layout
    pub upload_id: Uuid,

    /// Original file size (bytes)
    pub size: u64,

    /// Registry size when the upload took its snapshot
    pub node_count: usize,

    /// Parts ordered by `part_index`
    pub parts: Vec<PartDescriptor>,

    pub state: LayoutState,

    pub created_at: i64,

    pub committed_at: Option<i64>,

    #[serde(skip)]
    reclaim: Arc<PartReclaim>,
}

impl FileLayout {
    /// Empty pending layout owned by `ticket`
    pub fn pending(ticket: &UploadTicket, size: u64, node_count: usize) -> Self {
        Self {
            file_id: ticket.file_id.clone(),
            upload_id: ticket.upload_id,
            size,
            node_count,
            parts: Vec::new(),
            state: LayoutState::Pending,
            created_at: chrono::Utc::now().timestamp(),
            committed_at: None,
            reclaim: Arc::new(PartReclaim::default()),
        }
    }

    /// Track the current `parts` so they are deleted once this layout is
    /// dropped without being committed, or after it is superseded
    pub fn track_parts(&mut self, io: NodeIo) {
        let parts = self
            .parts
            .iter()
            .map(|p| (p.node.node.clone(), p.key.clone()))
            .collect();
        self.reclaim = Arc::new(PartReclaim::new(parts, io));
    }

    /// Delete the tracked parts now instead of on drop
    pub async fn discard_parts(&self) {
        self.reclaim.hold();
        self.reclaim.reclaim_now().await;
    }

    /// Whether the parts will be deleted when the last reference drops
    pub fn is_reclaimable(&self) -> bool {
        self.reclaim.is_reclaimable()
    }

    pub fn is_committed(&self) -> bool {
        self.state == LayoutState::Committed
    }
}

/// What `begin_upload` does when the file already has a writer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictPolicy {
    /// Reject the second writer immediately
    FailFast,

    /// Wait up to `timeout` for the current writer to finish
    Queue { timeout: Duration },
}

impl Default for ConflictPolicy {
    fn default() -> Self {
        ConflictPolicy::FailFast
    }
}

#[derive(Debug)]
struct InFlight {
    upload_id: Uuid,
    started_at: Instant,
}

#[derive(Debug)]
pub struct ChunkDirectory {
    committed: DashMap<String, Arc<FileLayout>>,
    in_flight: DashMap<String, InFlight>,
    released: Notify,
    policy: ConflictPolicy,
}

impl ChunkDirectory {
    pub fn new(policy: ConflictPolicy) -> Self {
        Self {
            committed: DashMap::new(),
            in_flight: DashMap::new(),
            released: Notify::new(),
            policy,
        }
    }

    /// Acquire the exclusive write right for `file_id`
    pub async fn begin_upload(
        self: &Arc<Self>,
        file_id: &str,
    ) -> Result<UploadTicket, StorageError> {
        let deadline = match self.policy {
            ConflictPolicy::FailFast => None,
            ConflictPolicy::Queue { timeout } => Some(Instant::now() + timeout),
        };

        loop {
            // Register for wake-ups before checking, so a release between the
            // check and the wait is not missed.
            let released = self.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            if let Some(ticket) = self.try_acquire(file_id) {
                return Ok(ticket);
            }

            let Some(deadline) = deadline else {
                tracing::debug!(file_id, "rejecting concurrent upload");
                return Err(StorageError::Conflict(file_id.to_string()));
            };

            if tokio::time::timeout_at(deadline, released).await.is_err() {
                tracing::debug!(file_id, "gave up waiting for concurrent upload");
                return Err(StorageError::Conflict(file_id.to_string()));
            }
        }
    }

    fn try_acquire(self: &Arc<Self>, file_id: &str) -> Option<UploadTicket> {
        match self.in_flight.entry(file_id.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                let upload_id = Uuid::new_v4();
                let started_at = Instant::now();
                slot.insert(InFlight {
                    upload_id,
                    started_at,
                });

                tracing::debug!(file_id, %upload_id, "upload started");
                Some(UploadTicket {
                    directory: self.clone(),
                    file_id: file_id.to_string(),
                    upload_id,
                    started_at,
                    finished: false,
                })
            }
        }
    }

    fn release(&self, file_id: &str, upload_id: Uuid) {
        self.in_flight
            .remove_if(file_id, |_, current| current.upload_id == upload_id);
        self.released.notify_waiters();
    }

    fn owns(&self, ticket: &UploadTicket) -> Result<(), StorageError> {
        if !std::ptr::eq(Arc::as_ptr(&ticket.directory), self) {
            return Err(StorageError::InvalidTicket(format!(
                "ticket for {} belongs to another directory",
                ticket.file_id
            )));
        }
        Ok(())
    }

    /// Install `layout` as the readable version of its file and release the ticket
    pub fn commit(
        &self,
        mut ticket: UploadTicket,
        mut layout: FileLayout,
    ) -> Result<Arc<FileLayout>, StorageError> {
        self.owns(&ticket)?;
        if layout.file_id != ticket.file_id || layout.upload_id != ticket.upload_id {
            return Err(StorageError::InvalidTicket(format!(
                "ticket {}/{} cannot commit layout {}/{}",
                ticket.file_id, ticket.upload_id, layout.file_id, layout.upload_id
            )));
        }

        layout.state = LayoutState::Committed;
        layout.committed_at = Some(chrono::Utc::now().timestamp());
        layout.reclaim.hold();
        let layout = Arc::new(layout);

        let replaced = self
            .committed
            .insert(layout.file_id.clone(), layout.clone());
        if let Some(old) = &replaced {
            old.reclaim.release();
        }

        tracing::info!(
            file_id = %layout.file_id,
            upload_id = %layout.upload_id,
            parts = layout.parts.len(),
            bytes = layout.size,
            replaced = ?replaced.map(|old| old.upload_id),
            elapsed_ms = ticket.elapsed().as_millis() as u64,
            "layout committed"
        );

        ticket.finish();
        Ok(layout)
    }

    /// Give up the upload; the previously committed layout stays readable
    pub fn abort(&self, mut ticket: UploadTicket) {
        tracing::info!(
            file_id = %ticket.file_id,
            upload_id = %ticket.upload_id,
            "upload aborted"
        );
        ticket.finish();
    }

    /// Drop the committed layout of the ticket's file and release the ticket
    pub fn remove(&self, mut ticket: UploadTicket) -> Result<Option<Arc<FileLayout>>, StorageError> {
        self.owns(&ticket)?;
        let removed = self
            .committed
            .remove(&ticket.file_id)
            .map(|(_, layout)| layout);
        if let Some(layout) = &removed {
            layout.reclaim.release();
        }
        ticket.finish();
        Ok(removed)
    }

    /// Current committed layout for `file_id`
    pub fn lookup(&self, file_id: &str) -> Result<Arc<FileLayout>, StorageError> {
        self.committed
            .get(file_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StorageError::NotFound(file_id.to_string()))
    }

    pub fn contains(&self, file_id: &str) -> bool {
        self.committed.contains_key(file_id)
    }

    /// All committed layouts, ordered by file id
    pub fn list(&self) -> Vec<Arc<FileLayout>> {
        let mut layouts: Vec<_> = self
            .committed
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        layouts.sort_by(|a, b| a.file_id.cmp(&b.file_id));
        layouts
    }

    /// Files with an upload holding the write right, oldest first
    pub fn in_progress(&self) -> Vec<String> {
        let mut uploads: Vec<_> = self
            .in_flight
            .iter()
            .map(|entry| (entry.value().started_at, entry.key().clone()))
            .collect();
        uploads.sort();
        uploads.into_iter().map(|(_, file_id)| file_id).collect()
    }

    pub fn len(&self) -> usize {
        self.committed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.committed.is_empty()
    }
}

impl Default for ChunkDirectory {
    fn default() -> Self {
        Self::new(ConflictPolicy::default())
    }
}

/// Exclusive write right for one file.
///
/// Dropping a ticket that was neither committed nor aborted releases the
/// right without touching the committed layout.
#[derive(Debug)]
pub struct UploadTicket {
    directory: Arc<ChunkDirectory>,
    file_id: String,
    upload_id: Uuid,
    started_at: Instant,
    finished: bool,
}

impl UploadTicket {
    pub fn file_id(&self) -> &str {
        &self.file_id
    }

    pub fn upload_id(&self) -> Uuid {
        self.upload_id
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    fn finish(&mut self) {
        if !self.finished {
            self.finished = true;
            self.directory.release(&self.file_id, self.upload_id);
        }
    }
}

impl Drop for UploadTicket {
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!(
                file_id = %self.file_id,
                upload_id = %self.upload_id,
                "upload ticket dropped without commit, releasing"
            );
            self.finish();
        }
    }
}
