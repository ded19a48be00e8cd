//! In-process storage node
//!
//! Backs the `memory://` addresses the service starts with when no real
//! nodes are configured. Latency and per-part failures can be injected so
//! distribution and retrieval can be exercised against a misbehaving node.

use super::{NodeError, PartKey, StorageNode};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::time::Duration;

#[derive(Debug, Default)]
pub struct MemoryNode {
    name: String,
    parts: DashMap<PartKey, Vec<u8>>,
    latency: Option<Duration>,
    failing_puts: Mutex<HashSet<usize>>,
    failing_gets: Mutex<HashSet<usize>>,
}

impl MemoryNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Delay every operation by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make writes of the given part index fail
    pub fn fail_put_on(&self, part_index: usize) {
        self.failing_puts.lock().insert(part_index);
    }

    /// Make reads of the given part index fail
    pub fn fail_get_on(&self, part_index: usize) {
        self.failing_gets.lock().insert(part_index);
    }

    /// Clear all injected failures
    pub fn heal(&self) {
        self.failing_puts.lock().clear();
        self.failing_gets.lock().clear();
    }

    /// Overwrite a stored payload without going through `put`
    pub fn corrupt(&self, key: &PartKey, data: Vec<u8>) {
        self.parts.insert(key.clone(), data);
    }

    pub fn contains(&self, key: &PartKey) -> bool {
        self.parts.contains_key(key)
    }

    pub fn part_count(&self) -> usize {
        self.parts.len()
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl StorageNode for MemoryNode {
    async fn put(&self, key: &PartKey, data: Vec<u8>) -> Result<(), NodeError> {
        self.simulate_latency().await;

        if self.failing_puts.lock().contains(&key.index) {
            return Err(NodeError::Rejected(format!(
                "{} refused to store {}",
                self.name, key
            )));
        }

        self.parts.insert(key.clone(), data);
        Ok(())
    }

    async fn get(&self, key: &PartKey) -> Result<Vec<u8>, NodeError> {
        self.simulate_latency().await;

        if self.failing_gets.lock().contains(&key.index) {
            return Err(NodeError::Transport(format!(
                "{} dropped the read of {}",
                self.name, key
            )));
        }

        self.parts
            .get(key)
            .map(|data| data.value().clone())
            .ok_or_else(|| NodeError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &PartKey) -> Result<(), NodeError> {
        self.simulate_latency().await;
        self.parts.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_put_get_delete() {
        let node = MemoryNode::new("storage1");
        let key = PartKey::new("report.pdf", Uuid::new_v4(), 0);

        node.put(&key, b"part zero".to_vec()).await.unwrap();
        assert!(node.contains(&key));
        assert_eq!(node.get(&key).await.unwrap(), b"part zero".to_vec());

        node.delete(&key).await.unwrap();
        assert!(matches!(node.get(&key).await, Err(NodeError::NotFound(_))));

        // Deleting twice is fine
        node.delete(&key).await.unwrap();
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let node = MemoryNode::new("storage2");
        let upload = Uuid::new_v4();
        let good = PartKey::new("a.txt", upload, 0);
        let bad = PartKey::new("a.txt", upload, 1);

        node.fail_put_on(1);
        assert!(node.put(&good, vec![1]).await.is_ok());
        assert!(matches!(
            node.put(&bad, vec![2]).await,
            Err(NodeError::Rejected(_))
        ));

        node.fail_get_on(0);
        assert!(matches!(node.get(&good).await, Err(NodeError::Transport(_))));

        node.heal();
        assert_eq!(node.get(&good).await.unwrap(), vec![1]);
        node.put(&bad, vec![2]).await.unwrap();
        assert!(node.contains(&bad));
    }
}
