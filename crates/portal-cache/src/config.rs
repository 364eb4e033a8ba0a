//! Configuration for globally atomic caches

use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};

/// Default wait for a competing lock to clear
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(3000);

/// Default interval for re-checking a lock file while waiting
pub const DEFAULT_LOCK_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Default bound on lock-check rounds per `get_or_add`
pub const DEFAULT_MAX_LOCK_ATTEMPTS: u32 = 10;

/// Per-instance settings a deployment supplies for an atomic cache
///
/// Durations are (de)serialized as milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtomicCacheConfig {
    /// Logical namespace shared by cooperating processes
    pub store_name: String,
    /// Directory visible to every cooperating process
    pub mount_path: PathBuf,
    /// How long stored values stay fresh
    #[serde(with = "duration_ms")]
    pub staleness_timeout: Duration,
    /// How long to wait on someone else's lock before reclaiming it
    #[serde(with = "duration_ms", default = "default_lock_timeout")]
    pub lock_timeout: Duration,
    /// How often a waiting process re-checks the lock file
    #[serde(with = "duration_ms", default = "default_lock_poll_interval")]
    pub lock_poll_interval: Duration,
    /// Lock-check rounds before giving up with `LockContention`
    #[serde(default = "default_max_lock_attempts")]
    pub max_lock_attempts: u32,
    /// Top-level namespace of the backing store
    #[serde(default = "default_cache_domain")]
    pub cache_domain: String,
}

fn default_lock_timeout() -> Duration {
    DEFAULT_LOCK_TIMEOUT
}

fn default_lock_poll_interval() -> Duration {
    DEFAULT_LOCK_POLL_INTERVAL
}

fn default_max_lock_attempts() -> u32 {
    DEFAULT_MAX_LOCK_ATTEMPTS
}

fn default_cache_domain() -> String {
    "cache".to_string()
}

impl AtomicCacheConfig {
    pub fn new(
        store_name: impl Into<String>,
        mount_path: impl Into<PathBuf>,
        staleness_timeout: Duration,
    ) -> Self {
        Self {
            store_name: store_name.into(),
            mount_path: mount_path.into(),
            staleness_timeout,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            lock_poll_interval: DEFAULT_LOCK_POLL_INTERVAL,
            max_lock_attempts: DEFAULT_MAX_LOCK_ATTEMPTS,
            cache_domain: default_cache_domain(),
        }
    }

    /// Machine-token cache: values stay fresh for 23 hours
    pub fn daily_token(store_name: impl Into<String>, mount_path: impl Into<PathBuf>) -> Self {
        Self::new(store_name, mount_path, Duration::from_secs(23 * 3600))
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    pub fn with_lock_poll_interval(mut self, interval: Duration) -> Self {
        self.lock_poll_interval = interval;
        self
    }

    pub fn with_max_lock_attempts(mut self, attempts: u32) -> Self {
        self.max_lock_attempts = attempts;
        self
    }

    pub fn with_cache_domain(mut self, cache_domain: impl Into<String>) -> Self {
        self.cache_domain = cache_domain.into();
        self
    }

    /// Reject settings that would break lock reclamation
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: &str| {
            Err(CacheError::InvalidConfig {
                message: message.to_string(),
            })
        };

        if self.store_name.trim().is_empty() {
            return invalid("store_name must not be empty");
        }
        if self.mount_path.as_os_str().is_empty() {
            return invalid("mount_path must not be empty");
        }
        if self.lock_timeout.is_zero() {
            return invalid("lock_timeout must be greater than zero");
        }
        if self.lock_poll_interval.is_zero() {
            return invalid("lock_poll_interval must be greater than zero");
        }
        if self.max_lock_attempts == 0 {
            return invalid("max_lock_attempts must be at least 1");
        }
        Ok(())
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AtomicCacheConfig::new("tokens", "/mnt/efs", Duration::from_secs(60));
        assert_eq!(config.lock_timeout, Duration::from_millis(3000));
        assert_eq!(config.max_lock_attempts, 10);
        assert_eq!(config.cache_domain, "cache");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_daily_token_preset() {
        let config = AtomicCacheConfig::daily_token("machine", "/mnt/efs");
        assert_eq!(config.staleness_timeout, Duration::from_secs(82_800));
    }

    #[test]
    fn test_validation_failures() {
        let base = AtomicCacheConfig::new("tokens", "/mnt/efs", Duration::from_secs(60));

        let mut empty_store = base.clone();
        empty_store.store_name = "  ".to_string();
        assert!(matches!(
            empty_store.validate(),
            Err(CacheError::InvalidConfig { .. })
        ));

        assert!(base.clone().with_lock_timeout(Duration::ZERO).validate().is_err());
        assert!(base.clone().with_max_lock_attempts(0).validate().is_err());
        assert!(base.with_lock_poll_interval(Duration::ZERO).validate().is_err());
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let json = r#"{
            "store_name": "emails",
            "mount_path": "/mnt/efs",
            "staleness_timeout": 1500
        }"#;
        let config: AtomicCacheConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.staleness_timeout, Duration::from_millis(1500));
        assert_eq!(config.lock_timeout, DEFAULT_LOCK_TIMEOUT);
        assert_eq!(config.lock_poll_interval, DEFAULT_LOCK_POLL_INTERVAL);
        assert_eq!(config.cache_domain, "cache");
    }

    #[test]
    fn test_serialize_durations_as_millis() {
        let config = AtomicCacheConfig::new("s", "/m", Duration::from_secs(2));
        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["staleness_timeout"], 2000);
        assert_eq!(value["lock_timeout"], 3000);
    }
}
