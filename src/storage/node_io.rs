//! Shared limits for part I/O against storage nodes

use crate::node::NodeError;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Caps how many part operations run at once and how long each may take.
/// Cloned handles share the same permit pool.
#[derive(Debug, Clone)]
pub struct NodeIo {
    permits: Arc<Semaphore>,
    timeout: Duration,
}

impl NodeIo {
    pub fn new(concurrency: usize, timeout: Duration) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            timeout,
        }
    }

    /// Run one node operation under the concurrency and time limits
    pub async fn run<T, F>(&self, op: F) -> Result<T, NodeError>
    where
        F: Future<Output = Result<T, NodeError>>,
    {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| NodeError::Transport("node I/O pool closed".into()))?;

        tokio::time::timeout(self.timeout, op)
            .await
            .unwrap_or(Err(NodeError::Timeout(self.timeout)))
    }
}

impl Default for NodeIo {
    fn default() -> Self {
        Self::new(16, Duration::from_secs(10))
    }
}
