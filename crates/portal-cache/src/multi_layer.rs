//! Composite cache over an ordered list of layers

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::future::join_all;

use crate::{
    cache::{Cache, ValueFactory},
    error::Result,
};

/// Cache fronting slower layers with faster ones
///
/// Layer order is precedence order. Reads stop at the first hit and do not
/// copy a lower-layer hit into the layers above it. Writes, removals and
/// clears fan out to every layer and fail if any layer fails.
pub struct MultiLayerCache {
    layers: Vec<Arc<dyn Cache>>,
    staleness_timeout: Duration,
}

impl MultiLayerCache {
    /// Create a composite cache from `layers`, fastest first
    pub fn new(staleness_timeout: Duration, layers: Vec<Arc<dyn Cache>>) -> Self {
        Self {
            layers,
            staleness_timeout,
        }
    }

    /// The composed layers in precedence order
    pub fn layers(&self) -> &[Arc<dyn Cache>] {
        &self.layers
    }
}

/// Wait for every result, then surface the first failure
fn all_ok(results: Vec<Result<()>>) -> Result<()> {
    results.into_iter().collect()
}

#[async_trait]
impl Cache for MultiLayerCache {
    async fn has_key(&self, key: &str) -> Result<bool> {
        for layer in &self.layers {
            if layer.has_key(key).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn add_value(&self, key: &str, value: serde_json::Value) -> Result<()> {
        let writes = self
            .layers
            .iter()
            .map(|layer| layer.add_value(key, value.clone()));
        all_ok(join_all(writes).await)
    }

    async fn get_value(&self, key: &str) -> Result<Option<serde_json::Value>> {
        for layer in &self.layers {
            if let Some(value) = layer.get_value(key).await? {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    async fn get_or_add_value(
        &self,
        key: &str,
        factory: ValueFactory,
    ) -> Result<serde_json::Value> {
        if let Some(value) = self.get_value(key).await? {
            return Ok(value);
        }

        let value = factory().await?;
        self.add_value(key, value.clone()).await?;
        Ok(value)
    }

    async fn remove(&self, key: &str) -> Result<()> {
        all_ok(join_all(self.layers.iter().map(|layer| layer.remove(key))).await)
    }

    async fn clear(&self) -> Result<()> {
        all_ok(join_all(self.layers.iter().map(|layer| layer.clear())).await)
    }

    fn staleness_timeout(&self) -> Duration {
        self.staleness_timeout
    }
}
