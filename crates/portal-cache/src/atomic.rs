//! Cross-process single-flight on top of a globally visible cache
//!
//! [`GlobalAtomicCache`] wraps any [`Cache`] whose backing store is reachable
//! from every cooperating process and makes `get_or_add` run the factory at
//! most once per key, best effort. Callers in the same process share one
//! in-flight attempt, which runs as its own task so that a caller giving up
//! never strands the lock file. Across processes, a lock file on a shared
//! mount decides who runs the factory; everyone else waits for the lock to
//! clear and then reads the store. A lock abandoned by a crashed holder is reclaimed after
//! the lock timeout, so duplicate factory runs are possible but rare.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::{
    cache::{Cache, ValueFactory},
    config::AtomicCacheConfig,
    error::{CacheError, Result},
    lock::{LockFile, LockRelease},
    metrics::{CacheMetrics, CacheStats, OperationTimer},
};

type Attempt = Shared<BoxFuture<'static, Result<serde_json::Value>>>;

/// Cache adding lock-file coordination to a shared-store cache flavor
pub struct GlobalAtomicCache<C> {
    inner: Arc<AtomicInner<C>>,
}

struct AtomicInner<C> {
    store: C,
    store_name: String,
    mount_path: PathBuf,
    lock_timeout: Duration,
    lock_poll_interval: Duration,
    max_lock_attempts: u32,
    /// In-flight attempts of this process, one per key
    fetchers: Mutex<HashMap<String, Attempt>>,
    metrics: CacheMetrics,
}

impl<C: Cache + 'static> GlobalAtomicCache<C> {
    /// Coordinate `store` using the lock settings of `config`
    ///
    /// The staleness timeout is owned by `store`; `config.staleness_timeout`
    /// is only used when building a flavor from the same config.
    pub fn new(store: C, config: &AtomicCacheConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            inner: Arc::new(AtomicInner {
                store,
                store_name: config.store_name.clone(),
                mount_path: config.mount_path.clone(),
                lock_timeout: config.lock_timeout,
                lock_poll_interval: config.lock_poll_interval,
                max_lock_attempts: config.max_lock_attempts,
                fetchers: Mutex::new(HashMap::new()),
                metrics: CacheMetrics::new(),
            }),
        })
    }

    /// The wrapped cache flavor
    pub fn store(&self) -> &C {
        &self.inner.store
    }

    pub fn store_name(&self) -> &str {
        &self.inner.store_name
    }

    pub fn mount_path(&self) -> &Path {
        &self.inner.mount_path
    }

    /// Path of the lock file guarding `key`
    pub fn lock_path(&self, key: &str) -> PathBuf {
        self.inner.lock_for(key).path().to_path_buf()
    }

    /// Number of keys with an attempt in flight in this process
    pub fn in_flight(&self) -> usize {
        self.inner.fetchers.lock().len()
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        self.inner.metrics.snapshot()
    }
}

impl<C: Cache + 'static> AtomicInner<C> {
    fn lock_for(&self, key: &str) -> LockFile {
        LockFile::new(&self.mount_path, &self.store_name, key)
    }

    /// One attempt: lock check, store read, lock acquisition, factory
    async fn execute_atomically(
        &self,
        key: &str,
        factory: ValueFactory,
    ) -> Result<serde_json::Value> {
        let lock = self.lock_for(key);

        for attempt in 1..=self.max_lock_attempts {
            if lock.is_present().await? {
                debug!(key, attempt, "Lock file present");
                self.wait_for_lock(key, &lock).await?;
                continue;
            }

            if let Some(value) = self.store.get_value(key).await? {
                self.metrics.record_hit();
                return Ok(value);
            }
            self.metrics.record_miss();

            if !lock.try_acquire().await? {
                debug!(key, attempt, "Lost the race for the lock file");
                self.wait_for_lock(key, &lock).await?;
                continue;
            }

            return self.run_as_holder(key, &lock, factory).await;
        }

        warn!(
            key,
            store = %self.store_name,
            attempts = self.max_lock_attempts,
            "Giving up on contended lock"
        );
        Err(CacheError::LockContention {
            key: key.to_string(),
            attempts: self.max_lock_attempts,
        })
    }

    /// Run the factory under a held lock; the lock is released on every path
    async fn run_as_holder(
        &self,
        key: &str,
        lock: &LockFile,
        factory: ValueFactory,
    ) -> Result<serde_json::Value> {
        let result: Result<serde_json::Value> = async {
            // Another process may have stored the value between our read and
            // our acquire
            if let Some(value) = self.store.get_value(key).await? {
                return Ok(value);
            }

            info!(key, store = %self.store_name, "Running factory under lock");
            let timer = OperationTimer::start();
            let produced = factory().await;
            self.metrics
                .record_factory_run(timer.elapsed_ms(), produced.is_ok());

            let value = produced?;
            self.store.add_value(key, value.clone()).await?;
            Ok(value)
        }
        .await;

        let released = lock.release().await;

        match (result, released) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(release_err)) => Err(release_err),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(release_err)) => {
                warn!(key, error = %release_err, "Failed to release lock after factory error");
                Err(err)
            }
        }
    }

    async fn wait_for_lock(&self, key: &str, lock: &LockFile) -> Result<()> {
        self.metrics.record_lock_wait();
        info!(
            key,
            lock_path = %lock.path().display(),
            "Lock held elsewhere, waiting"
        );

        match lock
            .wait_for_release(self.lock_timeout, self.lock_poll_interval)
            .await?
        {
            LockRelease::Released => {
                debug!(key, "Lock released by holder");
            }
            LockRelease::TakenOver => {
                self.metrics.record_lock_takeover();
                warn!(
                    key,
                    lock_path = %lock.path().display(),
                    timeout_ms = self.lock_timeout.as_millis() as u64,
                    "Reclaimed lock file that outlived the wait timeout"
                );
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<C: Cache + 'static> Cache for GlobalAtomicCache<C> {
    async fn has_key(&self, key: &str) -> Result<bool> {
        self.inner.store.has_key(key).await
    }

    async fn add_value(&self, key: &str, value: serde_json::Value) -> Result<()> {
        self.inner.store.add_value(key, value).await
    }

    async fn get_value(&self, key: &str) -> Result<Option<serde_json::Value>> {
        self.inner.store.get_value(key).await
    }

    async fn get_or_add_value(
        &self,
        key: &str,
        factory: ValueFactory,
    ) -> Result<serde_json::Value> {
        let attempt = {
            let mut fetchers = self.inner.fetchers.lock();
            match fetchers.get(key) {
                Some(existing) => {
                    self.inner.metrics.record_dedup_join();
                    debug!(key, "Joining in-flight attempt");
                    existing.clone()
                }
                None => {
                    let inner = Arc::clone(&self.inner);
                    let owned_key = key.to_string();
                    // Runs to completion even if every caller drops its future
                    let task = tokio::spawn(async move {
                        let result = inner.execute_atomically(&owned_key, factory).await;
                        // Settled either way; later callers start a new attempt
                        inner.fetchers.lock().remove(&owned_key);
                        result
                    });

                    let attempt = task
                        .map(|joined| {
                            joined.unwrap_or_else(|e| {
                                Err(CacheError::factory(format!("attempt task failed: {e}")))
                            })
                        })
                        .boxed()
                        .shared();

                    fetchers.insert(key.to_string(), attempt.clone());
                    attempt
                }
            }
        };

        attempt.await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.inner.store.remove(key).await
    }

    async fn clear(&self) -> Result<()> {
        self.inner.store.clear().await
    }

    fn staleness_timeout(&self) -> Duration {
        self.inner.store.staleness_timeout()
    }
}
