//! Part reclamation - deleting the parts of layouts nobody can read anymore
//!
//! Every layout carries a shared [`PartReclaim`] listing where its parts live.
//! While the layout is readable the parts are held. Once the directory lets
//! go of it (replaced by a newer upload, removed, or never committed) the
//! parts become reclaimable and are deleted when the last reference to the
//! layout drops, so a download still reading an old version finishes first.

use super::NodeIo;
use crate::node::{PartKey, StorageNode};

use futures::future::join_all;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

type PartLocation = (Arc<dyn StorageNode>, PartKey);

pub struct PartReclaim {
    parts: Mutex<Vec<PartLocation>>,
    io: NodeIo,
    reclaimable: AtomicBool,
}

impl PartReclaim {
    /// Track `parts`; they are deleted on drop unless [`Self::hold`] is called
    pub fn new(parts: Vec<PartLocation>, io: NodeIo) -> Self {
        Self {
            parts: Mutex::new(parts),
            io,
            reclaimable: AtomicBool::new(true),
        }
    }

    /// Keep the parts when the last reference drops
    pub fn hold(&self) {
        self.reclaimable.store(false, Ordering::Release);
    }

    /// Delete the parts when the last reference drops
    pub fn release(&self) {
        self.reclaimable.store(true, Ordering::Release);
    }

    pub fn is_reclaimable(&self) -> bool {
        self.reclaimable.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.parts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.lock().is_empty()
    }

    /// Delete every tracked part now and stop tracking them
    pub async fn reclaim_now(&self) {
        let parts = std::mem::take(&mut *self.parts.lock());
        delete_parts(&self.io, parts).await;
    }
}

impl Default for PartReclaim {
    fn default() -> Self {
        Self::new(Vec::new(), NodeIo::default())
    }
}

impl fmt::Debug for PartReclaim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartReclaim")
            .field("parts", &self.len())
            .field("reclaimable", &self.is_reclaimable())
            .finish()
    }
}

impl Drop for PartReclaim {
    fn drop(&mut self) {
        if !self.is_reclaimable() {
            return;
        }
        let parts = std::mem::take(self.parts.get_mut());
        if parts.is_empty() {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let io = self.io.clone();
                handle.spawn(async move { delete_parts(&io, parts).await });
            }
            Err(_) => {
                tracing::warn!(parts = parts.len(), "no runtime to reclaim parts, leaving them");
            }
        }
    }
}

async fn delete_parts(io: &NodeIo, parts: Vec<PartLocation>) {
    if parts.is_empty() {
        return;
    }

    let count = parts.len();
    let deletes = parts.iter().map(|(node, key)| async move {
        match io.run(node.delete(key)).await {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(part = %key, error = %err, "failed to delete part");
                false
            }
        }
    });
    let deleted = join_all(deletes).await.into_iter().filter(|ok| *ok).count();

    tracing::debug!(parts = count, deleted, "parts reclaimed");
}
