//! Cloud provider node replacement
//!
//! Replacement is fire-and-forget from the executor's point of view: the
//! call result is reported, and the node's actual removal is observed later
//! by its disappearance from the cluster.

use crate::error::{HealerError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Ask the provider to replace the instance backing the node
    async fn replace_node(&self, node: &str) -> Result<()>;

    /// Current number of instances in the pool
    async fn node_pool_size(&self, pool: &str) -> Result<u32>;
}

/// Provider for fleets without automated replacement; the node stays
/// cordoned and drained for an operator to recycle.
#[derive(Debug, Clone, Default)]
pub struct NoopCloudProvider;

#[async_trait]
impl CloudProvider for NoopCloudProvider {
    async fn replace_node(&self, node: &str) -> Result<()> {
        warn!(node = %node, "Node replacement is disabled, leaving drained node in place");
        Ok(())
    }

    async fn node_pool_size(&self, pool: &str) -> Result<u32> {
        Err(HealerError::CloudProvider(format!(
            "pool size unavailable for {pool}: no cloud provider configured"
        )))
    }
}

#[derive(Debug, Deserialize)]
struct PoolSizeResponse {
    size: u32,
}

/// Provider speaking to a replacement service over HTTP
///
/// `POST {base}/nodes/{node}/replace` and `GET {base}/pools/{pool}/size`.
pub struct HttpCloudProvider {
    client: Client,
    base_url: Url,
}

impl HttpCloudProvider {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HealerError::CloudProvider(format!("failed to create HTTP client: {e}")))?;
        let base_url = Url::parse(base_url)
            .map_err(|e| HealerError::CloudProvider(format!("invalid endpoint {base_url}: {e}")))?;

        Ok(Self { client, base_url })
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| HealerError::CloudProvider(format!("invalid path {path}: {e}")))
    }
}

#[async_trait]
impl CloudProvider for HttpCloudProvider {
    async fn replace_node(&self, node: &str) -> Result<()> {
        let url = self.url(&format!("nodes/{node}/replace"))?;
        let response = self
            .client
            .post(url)
            .send()
            .await
            .map_err(|e| HealerError::CloudProvider(format!("replace request for {node} failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(HealerError::CloudProvider(format!(
                "replace request for {node} returned {status}: {body}"
            )));
        }

        info!(node = %node, "Node replacement requested");
        Ok(())
    }

    async fn node_pool_size(&self, pool: &str) -> Result<u32> {
        let url = self.url(&format!("pools/{pool}/size"))?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| HealerError::CloudProvider(format!("pool size request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(HealerError::CloudProvider(format!(
                "pool size request for {pool} returned {}",
                response.status()
            )));
        }

        let body: PoolSizeResponse = response
            .json()
            .await
            .map_err(|e| HealerError::CloudProvider(format!("invalid pool size response: {e}")))?;
        Ok(body.size)
    }
}
