//! The cache contract shared by every cache flavor
//!
//! [`Cache`] is object-safe and moves values as `serde_json::Value`, so
//! flavors can be stacked behind `Arc<dyn Cache>` (see
//! [`MultiLayerCache`](crate::MultiLayerCache)). Callers normally go through
//! [`CacheExt`], which serializes typed values at the boundary.

use std::{future::Future, time::Duration};

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use serde::{de::DeserializeOwned, Serialize};

use crate::{
    error::{CacheError, Result},
    item::CacheItem,
};

/// Future produced by a [`ValueFactory`]
pub type ValueFuture = BoxFuture<'static, Result<serde_json::Value>>;

/// Expensive recomputation invoked on a cache miss
pub type ValueFactory = Box<dyn FnOnce() -> ValueFuture + Send>;

/// Operations every cache flavor supports
///
/// Backing-store errors propagate to the caller; there is no retry at this
/// level. `get_or_add_value` is not required to deduplicate concurrent
/// factory calls, only [`GlobalAtomicCache`](crate::GlobalAtomicCache)
/// promises that.
#[async_trait]
pub trait Cache: Send + Sync {
    /// True iff a fresh item exists for `key`
    async fn has_key(&self, key: &str) -> Result<bool>;

    /// Unconditionally (over)write the item for `key`
    async fn add_value(&self, key: &str, value: serde_json::Value) -> Result<()>;

    /// The value for `key` if present and fresh
    async fn get_value(&self, key: &str) -> Result<Option<serde_json::Value>>;

    /// The fresh value for `key`, or the factory's result after storing it
    async fn get_or_add_value(&self, key: &str, factory: ValueFactory)
        -> Result<serde_json::Value>;

    /// Delete any item for `key`. Idempotent.
    async fn remove(&self, key: &str) -> Result<()>;

    /// Delete every item owned by this cache
    async fn clear(&self) -> Result<()>;

    /// How long items stay fresh
    fn staleness_timeout(&self) -> Duration;

    /// Stamp a value with this cache's expiration
    fn create_item(&self, value: serde_json::Value) -> CacheItem {
        CacheItem::new(value, self.staleness_timeout())
    }
}

/// Typed helpers over any [`Cache`]
#[async_trait]
pub trait CacheExt: Cache {
    /// Store a typed value
    async fn add<T>(&self, key: &str, value: &T) -> Result<()>
    where
        T: Serialize + Send + Sync + ?Sized,
    {
        self.add_value(key, to_json(value)?).await
    }

    /// Retrieve a typed value
    async fn get<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        match self.get_value(key).await? {
            Some(value) => from_json(value).map(Some),
            None => Ok(None),
        }
    }

    /// Retrieve a typed value, computing and storing it on a miss
    async fn get_or_add<T, F, Fut>(&self, key: &str, factory: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let value = self.get_or_add_value(key, value_factory(factory)).await?;
        from_json(value)
    }
}

impl<C: Cache + ?Sized> CacheExt for C {}

/// Erase a typed factory into a [`ValueFactory`]
pub fn value_factory<T, F, Fut>(factory: F) -> ValueFactory
where
    T: Serialize + Send + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    Box::new(move || {
        async move {
            let value = factory().await?;
            to_json(&value)
        }
        .boxed()
    })
}

pub(crate) fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| CacheError::Serialization {
        message: e.to_string(),
    })
}

pub(crate) fn from_json<T: DeserializeOwned>(value: serde_json::Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| CacheError::Deserialization {
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_value_factory_serializes_result() {
        let factory = value_factory(|| async { Ok(vec![1u32, 2, 3]) });
        let value = factory().await.unwrap();
        assert_eq!(value, serde_json::json!([1, 2, 3]));
    }

    #[tokio::test]
    async fn test_value_factory_propagates_error() {
        let factory = value_factory(|| async {
            Err::<String, _>(CacheError::factory("upstream unavailable"))
        });
        let err = factory().await.unwrap_err();
        assert!(matches!(err, CacheError::Factory { .. }));
    }

    #[test]
    fn test_from_json_type_mismatch() {
        let err = from_json::<u32>(serde_json::json!("not a number")).unwrap_err();
        assert!(matches!(err, CacheError::Deserialization { .. }));
    }
}
