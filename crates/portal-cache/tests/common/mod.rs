#![allow(dead_code)]

use std::{
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use portal_cache::{AtomicCacheConfig, AtomicSecretCache, FileSecretStore, SecretCache};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// One simulated process: its own fetcher table, shared mount and store
pub fn process(mount: &Path, store_dir: &Path, lock_timeout: Duration) -> AtomicSecretCache<FileSecretStore> {
    let config = AtomicCacheConfig::new("machine-tokens", mount, Duration::from_secs(60))
        .with_lock_timeout(lock_timeout)
        .with_lock_poll_interval(Duration::from_millis(20));
    SecretCache::atomic(FileSecretStore::new(store_dir), &config).unwrap()
}

/// Factory counter shared by every simulated process
#[derive(Clone, Default)]
pub struct Counter(Arc<AtomicUsize>);

impl Counter {
    pub fn bump(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}
