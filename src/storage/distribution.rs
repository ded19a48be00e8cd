//! Distribution engine - writes a file's parts to nodes and commits the layout
//!
//! An upload is all or nothing: the layout only reaches the directory when
//! every part write succeeded. Parts already written by a failed upload are
//! deleted again, best effort. A cancelled upload and a superseded version
//! leave their parts to the layout's reclaim guard.

use super::{
    ChunkDirectory, FileLayout, LayoutState, NodeIo, NodeRegistry, PartChecksum, PartDescriptor,
    PartFailure, PartitionPolicy, StorageError,
};
use crate::node::PartKey;

use futures::future::join_all;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct DistributionEngine {
    registry: Arc<NodeRegistry>,
    directory: Arc<ChunkDirectory>,
    policy: PartitionPolicy,
    io: NodeIo,
}

impl DistributionEngine {
    pub fn new(
        registry: Arc<NodeRegistry>,
        directory: Arc<ChunkDirectory>,
        policy: PartitionPolicy,
        io: NodeIo,
    ) -> Self {
        Self {
            registry,
            directory,
            policy,
            io,
        }
    }

    /// Split `data`, store every part and commit the layout under `file_id`
    pub async fn distribute(
        &self,
        file_id: &str,
        data: &[u8],
    ) -> Result<Arc<FileLayout>, StorageError> {
        let ticket = self.directory.begin_upload(file_id).await?;

        let snapshot = self.registry.snapshot();
        let planned = match self.policy.plan(data.len() as u64, snapshot.len()) {
            Ok(planned) => planned,
            Err(err) => {
                self.directory.abort(ticket);
                return Err(err);
            }
        };

        let mut layout = FileLayout::pending(&ticket, data.len() as u64, snapshot.len());
        layout.parts = planned
            .iter()
            .map(|p| PartDescriptor {
                part_index: p.part_index,
                node: snapshot[p.node_slot].clone(),
                range: p.range,
                key: PartKey::new(file_id, ticket.upload_id(), p.part_index),
                checksum: PartChecksum::hash(p.range.slice(data)),
            })
            .collect();
        // Dropping the layout before commit deletes whatever already landed
        layout.track_parts(self.io.clone());

        tracing::debug!(
            file_id,
            upload_id = %ticket.upload_id(),
            bytes = data.len(),
            parts = layout.parts.len(),
            nodes = snapshot.len(),
            "distributing parts"
        );

        let writes = layout.parts.iter().map(|part| {
            let payload = part.range.slice(data).to_vec();
            async move {
                let result = self.io.run(part.node.node.put(&part.key, payload)).await;
                (part, result)
            }
        });

        let failures: Vec<_> = join_all(writes)
            .await
            .into_iter()
            .filter_map(|(part, result)| {
                result.err().map(|source| PartFailure {
                    part_index: part.part_index,
                    node_index: part.node.index,
                    address: part.node.address.clone(),
                    source,
                })
            })
            .collect();

        if failures.is_empty() {
            return self.directory.commit(ticket, layout);
        }

        layout.state = LayoutState::Failed;
        for failure in &failures {
            tracing::warn!(
                file_id,
                upload_id = %layout.upload_id,
                part = failure.part_index,
                node = failure.node_index,
                address = %failure.address,
                error = %failure.source,
                "part write failed"
            );
        }
        tracing::warn!(
            file_id,
            upload_id = %layout.upload_id,
            state = ?layout.state,
            failed_parts = failures.len(),
            parts = layout.parts.len(),
            "upload failed"
        );

        self.directory.abort(ticket);
        layout.discard_parts().await;

        Err(StorageError::NodeWrite {
            file_id: file_id.to_string(),
            failures,
        })
    }

    /// Like [`Self::distribute`], but aborts if `cancel` fires before the commit
    pub async fn distribute_until_cancelled(
        &self,
        file_id: &str,
        data: &[u8],
        cancel: &CancellationToken,
    ) -> Result<Arc<FileLayout>, StorageError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                // Dropping the in-flight upload drops its ticket, which
                // releases the write right without committing.
                tracing::info!(file_id, "upload cancelled");
                Err(StorageError::Cancelled(file_id.to_string()))
            }
            result = self.distribute(file_id, data) => result,
        }
    }

    /// Delete a file. The layout goes first; its parts are deleted once the
    /// last reader of the layout is done with it.
    pub async fn remove(&self, file_id: &str) -> Result<Arc<FileLayout>, StorageError> {
        let ticket = self.directory.begin_upload(file_id).await?;
        let layout = self
            .directory
            .remove(ticket)?
            .ok_or_else(|| StorageError::NotFound(file_id.to_string()))?;

        tracing::info!(file_id, upload_id = %layout.upload_id, "file removed");
        Ok(layout)
    }
}
