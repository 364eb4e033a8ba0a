//! Cached items and the staleness check shared by every cache flavor

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A cached value with its absolute expiration time
///
/// Items are never mutated in place; a fresh item replaces an old one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheItem {
    /// The cached payload
    pub value: serde_json::Value,
    /// Point in time after which the item is stale
    pub expiration: DateTime<Utc>,
}

impl CacheItem {
    /// Create an item expiring `staleness_timeout` from now
    pub fn new(value: serde_json::Value, staleness_timeout: Duration) -> Self {
        let now = Utc::now();
        let expiration = chrono::Duration::from_std(staleness_timeout)
            .ok()
            .and_then(|timeout| now.checked_add_signed(timeout))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        Self { value, expiration }
    }

    /// Whether the item is still fresh
    pub fn is_valid(&self) -> bool {
        is_valid(self.expiration)
    }

    /// Time left before the item goes stale
    pub fn ttl_remaining(&self) -> Option<Duration> {
        (self.expiration - Utc::now()).to_std().ok()
    }
}

/// `now < expiration`
pub fn is_valid(expiration: DateTime<Utc>) -> bool {
    Utc::now() < expiration
}

/// A zero staleness timeout means "never cache"
pub fn caches_anything(staleness_timeout: Duration) -> bool {
    !staleness_timeout.is_zero()
}
