//! # Portal Cache
//!
//! Pluggable caching for expensive remote reads (secrets, machine tokens,
//! email templates) with a globally atomic flavor that runs a factory at
//! most once per key across processes sharing only a filesystem mount.
//!
//! ## Features
//!
//! - **One contract**: [`Cache`] plus typed helpers in [`CacheExt`]
//! - **Local flavors**: [`MemoryCache`] and [`FileCache`]
//! - **Layering**: [`MultiLayerCache`] fronts slow layers with fast ones
//! - **Cross-process single-flight**: [`GlobalAtomicCache`] coordinates
//!   through lock files with timeout-based recovery of abandoned locks
//! - **Secret-store flavor**: [`SecretCache`] over any [`SecretStore`] adapter

pub mod atomic;
pub mod cache;
pub mod config;
pub mod error;
pub mod file;
pub mod item;
pub mod lock;
pub mod memory;
pub mod metrics;
pub mod multi_layer;
pub mod secret;

pub use atomic::GlobalAtomicCache;
pub use cache::{value_factory, Cache, CacheExt, ValueFactory, ValueFuture};
pub use config::AtomicCacheConfig;
pub use error::{CacheError, Result};
pub use file::FileCache;
pub use item::CacheItem;
pub use lock::{LockFile, LockRelease};
pub use memory::MemoryCache;
pub use metrics::{CacheMetrics, CacheStats};
pub use multi_layer::MultiLayerCache;
pub use secret::{AtomicSecretCache, FileSecretStore, MemorySecretStore, SecretCache, SecretStore};
