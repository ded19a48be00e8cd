//! Remote storage node reached over HTTP
//!
//! Speaks the protocol served by [`super::node_router`].

use super::{NodeError, PartKey, StorageNode};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

/// Body of a part write
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartUpload {
    #[serde(flatten)]
    pub key: PartKey,

    /// Part payload, base64 encoded
    pub data: String,
}

impl PartUpload {
    pub fn new(key: PartKey, data: &[u8]) -> Self {
        Self {
            key,
            data: STANDARD.encode(data),
        }
    }

    pub fn decode(&self) -> Result<Vec<u8>, NodeError> {
        STANDARD
            .decode(&self.data)
            .map_err(|e| NodeError::Rejected(format!("Invalid part payload: {}", e)))
    }
}

#[derive(Debug, Clone)]
pub struct HttpNode {
    base_url: String,
    client: reqwest::Client,
}

impl HttpNode {
    pub fn new(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    fn parts_url(&self) -> String {
        format!("{}/parts", self.base_url)
    }

    async fn rejection(response: reqwest::Response) -> NodeError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        NodeError::Rejected(format!("{}: {}", status, body.trim_end()))
    }
}

fn transport(e: reqwest::Error) -> NodeError {
    NodeError::Transport(e.to_string())
}

#[async_trait]
impl StorageNode for HttpNode {
    async fn put(&self, key: &PartKey, data: Vec<u8>) -> Result<(), NodeError> {
        let response = self
            .client
            .post(self.parts_url())
            .json(&PartUpload::new(key.clone(), &data))
            .send()
            .await
            .map_err(transport)?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::rejection(response).await)
        }
    }

    async fn get(&self, key: &PartKey) -> Result<Vec<u8>, NodeError> {
        let response = self
            .client
            .get(self.parts_url())
            .query(key)
            .send()
            .await
            .map_err(transport)?;

        match response.status() {
            StatusCode::OK => Ok(response.bytes().await.map_err(transport)?.to_vec()),
            StatusCode::NOT_FOUND => Err(NodeError::NotFound(key.to_string())),
            _ => Err(Self::rejection(response).await),
        }
    }

    async fn delete(&self, key: &PartKey) -> Result<(), NodeError> {
        let response = self
            .client
            .delete(self.parts_url())
            .query(key)
            .send()
            .await
            .map_err(transport)?;

        if response.status().is_success() || response.status() == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(Self::rejection(response).await)
        }
    }
}
