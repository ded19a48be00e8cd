//! Retrieval engine - reassembles a file from its committed layout

use super::{ChunkDirectory, NodeIo, PartDescriptor, PartFailure, StorageError};
use crate::node::NodeError;

use futures::future::try_join_all;
use std::sync::Arc;

pub struct RetrievalEngine {
    directory: Arc<ChunkDirectory>,
    io: NodeIo,
}

impl RetrievalEngine {
    pub fn new(directory: Arc<ChunkDirectory>, io: NodeIo) -> Self {
        Self { directory, io }
    }

    /// Fetch every part of `file_id` and concatenate them in part order.
    ///
    /// Reads follow the layout that was committed when the call started, even
    /// if the registry has grown or the file is re-uploaded meanwhile.
    pub async fn retrieve(&self, file_id: &str) -> Result<Vec<u8>, StorageError> {
        let layout = self.directory.lookup(file_id)?;

        let fetches = layout.parts.iter().map(|part| async move {
            self.fetch(part)
                .await
                .map(|data| (part.part_index, data))
                .map_err(|source| StorageError::NodeRead {
                    file_id: file_id.to_string(),
                    failure: PartFailure {
                        part_index: part.part_index,
                        node_index: part.node.index,
                        address: part.node.address.clone(),
                        source,
                    },
                })
        });

        let mut parts = match try_join_all(fetches).await {
            Ok(parts) => parts,
            Err(err) => {
                tracing::warn!(file_id, error = %err, "retrieval failed");
                return Err(err);
            }
        };
        parts.sort_by_key(|(index, _)| *index);

        let mut file = Vec::with_capacity(layout.size as usize);
        for (_, data) in parts {
            file.extend_from_slice(&data);
        }

        tracing::debug!(
            file_id,
            upload_id = %layout.upload_id,
            bytes = file.len(),
            "file reassembled"
        );
        Ok(file)
    }

    async fn fetch(&self, part: &PartDescriptor) -> Result<Vec<u8>, NodeError> {
        let data = self.io.run(part.node.node.get(&part.key)).await?;

        if data.len() as u64 != part.range.len() {
            return Err(NodeError::Integrity(format!(
                "{}: expected {} bytes, got {}",
                part.key,
                part.range.len(),
                data.len()
            )));
        }
        if !part.checksum.verify(&data) {
            return Err(NodeError::Integrity(format!(
                "{}: checksum mismatch",
                part.key
            )));
        }

        Ok(data)
    }
}
