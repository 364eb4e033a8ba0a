//! Secret-store cache flavor
//!
//! [`SecretCache`] keeps each item as a JSON-encoded [`CacheItem`] under
//! `/<cache_domain>/<store_name>/<key>` in a [`SecretStore`]. A missing
//! secret, a stale item or an unreadable payload is a miss; any other
//! adapter error propagates. Wrap it with [`SecretCache::atomic`] to get
//! cross-process single-flight.

use std::{
    collections::BTreeMap,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use tokio::{fs, sync::RwLock};
use tracing::{debug, info, warn};

use crate::{
    atomic::GlobalAtomicCache,
    cache::{Cache, ValueFactory},
    config::AtomicCacheConfig,
    error::{CacheError, Result},
    file::encode_file_stem,
    item::{caches_anything, CacheItem},
};

/// Request/response adapter over a remote secret or parameter store
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Raw value stored under `name`, `None` when absent
    async fn get(&self, name: &str) -> Result<Option<String>>;

    /// Create or overwrite `name`
    async fn put(&self, name: &str, value: String) -> Result<()>;

    /// Delete `name`; deleting an absent name succeeds
    async fn delete(&self, name: &str) -> Result<()>;

    /// Names starting with `prefix`
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Process-local secret store; clones share the same contents
#[derive(Debug, Clone, Default)]
pub struct MemorySecretStore {
    secrets: Arc<RwLock<BTreeMap<String, String>>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn get(&self, name: &str) -> Result<Option<String>> {
        Ok(self.secrets.read().await.get(name).cloned())
    }

    async fn put(&self, name: &str, value: String) -> Result<()> {
        self.secrets.write().await.insert(name.to_string(), value);
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.secrets.write().await.remove(name);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .secrets
            .read()
            .await
            .range(prefix.to_string()..)
            .take_while(|(name, _)| name.starts_with(prefix))
            .map(|(name, _)| name.clone())
            .collect())
    }
}

/// Secret store kept as files in a directory, usable from several processes
/// sharing a mount
///
/// Each file holds the secret's full name next to its value, so names of
/// any length map to bounded file names and `list` never decodes them.
pub struct FileSecretStore {
    base_path: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredSecret {
    name: String,
    value: String,
}

impl FileSecretStore {
    pub fn new<P: AsRef<Path>>(base_path: P) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
        }
    }

    fn secret_path(&self, name: &str) -> PathBuf {
        self.base_path
            .join(format!("{}.secret", encode_file_stem(name)))
    }

    async fn read_secret(path: &Path) -> Result<Option<StoredSecret>> {
        let data = match fs::read(path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        serde_json::from_slice(&data)
            .map(Some)
            .map_err(|e| CacheError::Deserialization {
                message: format!("{}: {}", path.display(), e),
            })
    }
}

#[async_trait]
impl SecretStore for FileSecretStore {
    async fn get(&self, name: &str) -> Result<Option<String>> {
        Ok(Self::read_secret(&self.secret_path(name))
            .await?
            .map(|secret| secret.value))
    }

    async fn put(&self, name: &str, value: String) -> Result<()> {
        fs::create_dir_all(&self.base_path).await?;

        let data = serde_json::to_vec(&StoredSecret {
            name: name.to_string(),
            value,
        })
        .map_err(|e| CacheError::Serialization {
            message: e.to_string(),
        })?;

        let path = self.secret_path(name);
        let tmp_path = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4()));
        fs::write(&tmp_path, data).await?;
        fs::rename(&tmp_path, &path).await?;
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        match fs::remove_file(self.secret_path(name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut entries = match fs::read_dir(&self.base_path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map_or(true, |ext| ext != "secret") {
                continue;
            }

            match Self::read_secret(&path).await {
                Ok(Some(secret)) if secret.name.starts_with(prefix) => names.push(secret.name),
                Ok(_) => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable secret file");
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Cache flavor storing items in a [`SecretStore`]
pub struct SecretCache<S> {
    secrets: S,
    store_name: String,
    cache_domain: String,
    staleness_timeout: Duration,
}

/// Secret cache with cross-process single-flight
pub type AtomicSecretCache<S> = GlobalAtomicCache<SecretCache<S>>;

impl<S: SecretStore> SecretCache<S> {
    pub fn new(
        secrets: S,
        store_name: impl Into<String>,
        cache_domain: impl Into<String>,
        staleness_timeout: Duration,
    ) -> Self {
        Self {
            secrets,
            store_name: store_name.into(),
            cache_domain: cache_domain.into(),
            staleness_timeout,
        }
    }

    /// Build the flavor from `config` and wrap it in lock-file coordination
    pub fn atomic(secrets: S, config: &AtomicCacheConfig) -> Result<AtomicSecretCache<S>>
    where
        S: 'static,
    {
        let cache = Self::new(
            secrets,
            config.store_name.clone(),
            config.cache_domain.clone(),
            config.staleness_timeout,
        );
        GlobalAtomicCache::new(cache, config)
    }

    /// The underlying adapter
    pub fn secrets(&self) -> &S {
        &self.secrets
    }

    /// Namespace every name of this cache starts with
    pub fn namespace(&self) -> String {
        format!("/{}/{}/", self.cache_domain, self.store_name)
    }

    /// Full secret name for `key`
    pub fn full_name(&self, key: &str) -> String {
        format!("{}{}", self.namespace(), key)
    }

    async fn read_item(&self, key: &str) -> Result<Option<CacheItem>> {
        let name = self.full_name(key);
        debug!(name = %name, "Fetching secret");

        let Some(raw) = self.secrets.get(&name).await? else {
            return Ok(None);
        };

        match serde_json::from_str::<CacheItem>(&raw) {
            Ok(item) => Ok(Some(item)),
            Err(e) => {
                warn!(name = %name, error = %e, "Ignoring unreadable cached secret");
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl<S: SecretStore> Cache for SecretCache<S> {
    async fn has_key(&self, key: &str) -> Result<bool> {
        Ok(self.get_value(key).await?.is_some())
    }

    async fn add_value(&self, key: &str, value: serde_json::Value) -> Result<()> {
        if !caches_anything(self.staleness_timeout) {
            return self.remove(key).await;
        }

        let item = self.create_item(value);
        let raw = serde_json::to_string(&item).map_err(|e| CacheError::Serialization {
            message: e.to_string(),
        })?;

        let name = self.full_name(key);
        info!(name = %name, expiration = %item.expiration, "Saving secret");
        self.secrets.put(&name, raw).await
    }

    async fn get_value(&self, key: &str) -> Result<Option<serde_json::Value>> {
        Ok(self
            .read_item(key)
            .await?
            .filter(CacheItem::is_valid)
            .map(|item| item.value))
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
        self.secrets.delete(&self.full_name(key)).await
    }

    async fn clear(&self) -> Result<()> {
        let names = self.secrets.list(&self.namespace()).await?;
        debug!(count = names.len(), store = %self.store_name, "Clearing secrets");

        try_join_all(names.iter().map(|name| self.secrets.delete(name))).await?;
        Ok(())
    }

    fn staleness_timeout(&self) -> Duration {
        self.staleness_timeout
    }
}
