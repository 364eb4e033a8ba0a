//! File-per-key cache on the local filesystem

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{debug, warn};

use crate::{
    cache::{Cache, ValueFactory},
    error::{CacheError, Result},
    item::{caches_anything, CacheItem},
};

/// Longest encoded stem kept verbatim
const MAX_STEM_LEN: usize = 100;

/// Encode `key` as a file-name stem; distinct keys never share a stem
pub(crate) fn encode_file_stem(key: &str) -> String {
    encode_stem(key, b"-.")
}

/// ASCII letters, digits and `kept` bytes pass through, every other byte
/// becomes `_` and two hex digits. Stems over [`MAX_STEM_LEN`] are cut and
/// suffixed with `~` and the SHA-256 of `raw`, which never occurs in a
/// verbatim stem.
pub(crate) fn encode_stem(raw: &str, kept: &[u8]) -> String {
    let mut stem = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        if byte.is_ascii_alphanumeric() || kept.contains(&byte) {
            stem.push(char::from(byte));
        } else {
            stem.push('_');
            stem.push_str(&hex::encode([byte]));
        }
    }

    if stem.len() <= MAX_STEM_LEN {
        return stem;
    }

    let digest = hex::encode(Sha256::digest(raw.as_bytes()));
    stem.truncate(MAX_STEM_LEN - digest.len() - 1);
    stem.push('~');
    stem.push_str(&digest);
    stem
}

/// Cache storing one JSON-encoded [`CacheItem`] per key under a scope directory
pub struct FileCache {
    store_path: PathBuf,
    staleness_timeout: Duration,
}

impl FileCache {
    /// Create a cache under the system temp directory with a random scope
    pub fn new(staleness_timeout: Duration) -> Self {
        Self::with_scope(staleness_timeout, None, std::env::temp_dir())
    }

    /// Create a cache under `base_path/scope`; a random scope is used when
    /// none is given
    pub fn with_scope<P: AsRef<Path>>(
        staleness_timeout: Duration,
        scope: Option<&str>,
        base_path: P,
    ) -> Self {
        let scope = scope
            .map(encode_file_stem)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        Self {
            store_path: base_path.as_ref().join(scope),
            staleness_timeout,
        }
    }

    /// Directory holding this cache's files
    pub fn store_path(&self) -> &Path {
        &self.store_path
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.store_path.join(format!("{}.cache", encode_file_stem(key)))
    }

    async fn ensure_store_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.store_path).await?;
        Ok(())
    }

    async fn read_item(&self, key: &str) -> Result<Option<CacheItem>> {
        let path = self.key_path(key);
        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_slice::<CacheItem>(&data) {
            Ok(item) => Ok(Some(item)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Discarding unreadable cache file");
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl Cache for FileCache {
    async fn has_key(&self, key: &str) -> Result<bool> {
        Ok(self
            .read_item(key)
            .await?
            .is_some_and(|item| item.is_valid()))
    }

    async fn add_value(&self, key: &str, value: serde_json::Value) -> Result<()> {
        if !caches_anything(self.staleness_timeout) {
            return self.remove(key).await;
        }

        self.ensure_store_dir().await?;

        let item = self.create_item(value);
        let data = serde_json::to_vec(&item).map_err(|e| CacheError::Serialization {
            message: e.to_string(),
        })?;

        // Write then rename so readers never observe a partial file
        let path = self.key_path(key);
        let tmp_path = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4()));
        fs::write(&tmp_path, data).await?;
        fs::rename(&tmp_path, &path).await?;

        debug!(key, path = %path.display(), "Stored cache file");
        Ok(())
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
        match fs::remove_file(self.key_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn clear(&self) -> Result<()> {
        match fs::remove_dir_all(&self.store_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        }
        self.ensure_store_dir().await
    }

    fn staleness_timeout(&self) -> Duration {
        self.staleness_timeout
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use tempfile::TempDir;

    use super::*;
    use crate::cache::CacheExt;

    #[tokio::test]
    async fn test_file_cache_basic_operations() {
        let temp_dir = TempDir::new().unwrap();
        let cache = FileCache::with_scope(Duration::from_secs(60), Some("emails"), temp_dir.path());

        cache.add("welcome", "Hello {{name}}").await.unwrap();
        let value: Option<String> = cache.get("welcome").await.unwrap();
        assert_eq!(value.as_deref(), Some("Hello {{name}}"));
        assert!(cache.has_key("welcome").await.unwrap());
        assert!(temp_dir.path().join("emails").join("welcome.cache").exists());

        cache.remove("welcome").await.unwrap();
        cache.remove("welcome").await.unwrap();
        assert!(!cache.has_key("welcome").await.unwrap());
    }

    #[tokio::test]
    async fn test_file_cache_expiration() {
        let temp_dir = TempDir::new().unwrap();
        let cache = FileCache::with_scope(Duration::from_millis(50), None, temp_dir.path());

        cache.add("key", &5u8).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let value: Option<u8> = cache.get("key").await.unwrap();
        assert_eq!(value, None);
        assert!(!cache.has_key("key").await.unwrap());
    }

    #[tokio::test]
    async fn test_file_cache_keys_are_encoded() {
        let temp_dir = TempDir::new().unwrap();
        let cache = FileCache::with_scope(Duration::from_secs(60), Some("s"), temp_dir.path());

        cache.add("tenant/a:b", &1u8).await.unwrap();
        assert!(temp_dir.path().join("s").join("tenant_2fa_3ab.cache").exists());
    }

    #[tokio::test]
    async fn test_file_cache_keeps_similar_keys_apart() {
        let temp_dir = TempDir::new().unwrap();
        let cache = FileCache::with_scope(Duration::from_secs(60), Some("s"), temp_dir.path());

        cache.add("tenant/a", "secret-of-a-slash").await.unwrap();

        let other: Option<String> = cache.get("tenant_a").await.unwrap();
        assert_eq!(other, None);
        assert!(!cache.has_key("tenant_a").await.unwrap());

        cache.add("tenant_a", "secret-of-an-underscore").await.unwrap();
        let slash: Option<String> = cache.get("tenant/a").await.unwrap();
        assert_eq!(slash.as_deref(), Some("secret-of-a-slash"));
    }

    #[tokio::test]
    async fn test_file_cache_accepts_long_keys() {
        let temp_dir = TempDir::new().unwrap();
        let cache = FileCache::with_scope(Duration::from_secs(60), Some("s"), temp_dir.path());
        let long_a = format!("{}a", "k/".repeat(200));
        let long_b = format!("{}b", "k/".repeat(200));

        cache.add(&long_a, &1u8).await.unwrap();
        cache.add(&long_b, &2u8).await.unwrap();

        let a: Option<u8> = cache.get(&long_a).await.unwrap();
        let b: Option<u8> = cache.get(&long_b).await.unwrap();
        assert_eq!(a, Some(1));
        assert_eq!(b, Some(2));
    }

    #[tokio::test]
    async fn test_file_cache_clear_recreates_scope() {
        let temp_dir = TempDir::new().unwrap();
        let cache = FileCache::with_scope(Duration::from_secs(60), Some("s"), temp_dir.path());

        cache.clear().await.unwrap();
        cache.add("a", &1u8).await.unwrap();
        cache.add("b", &2u8).await.unwrap();
        cache.clear().await.unwrap();

        assert!(cache.store_path().exists());
        assert!(!cache.has_key("a").await.unwrap());
        assert!(!cache.has_key("b").await.unwrap());
    }

    #[tokio::test]
    async fn test_unreadable_file_is_a_miss() {
        let temp_dir = TempDir::new().unwrap();
        let cache = FileCache::with_scope(Duration::from_secs(60), Some("s"), temp_dir.path());
        std::fs::create_dir_all(cache.store_path()).unwrap();
        std::fs::write(cache.store_path().join("bad.cache"), b"{not json").unwrap();

        let value: Option<u8> = cache.get("bad").await.unwrap();
        assert_eq!(value, None);
    }

    #[test]
    fn test_encode_file_stem() {
        assert_eq!(encode_file_stem("plain-key.v1"), "plain-key.v1");
        assert_eq!(encode_file_stem("a/b"), "a_2fb");
        assert_eq!(encode_file_stem("a_b"), "a_5fb");
        assert_eq!(encode_stem("machine-tokens", b"."), "machine_2dtokens");
    }

    #[test]
    fn test_long_stems_are_bounded() {
        let stem = encode_file_stem(&"x".repeat(500));
        assert_eq!(stem.len(), MAX_STEM_LEN);
        assert!(stem.contains('~'));
        assert_ne!(stem, encode_file_stem(&"x".repeat(501)));
    }

    proptest! {
        #[test]
        fn prop_distinct_keys_get_distinct_stems(a in "\\PC{0,80}", b in "\\PC{0,80}") {
            prop_assume!(a != b);
            prop_assert_ne!(encode_file_stem(&a), encode_file_stem(&b));
        }
    }
}
