//! Cache counters and statistics snapshots

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, SystemTime},
};

use serde::{Deserialize, Serialize};

/// Point-in-time cache statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    /// Reads answered from the cache
    pub hits: u64,
    /// Reads that found nothing fresh
    pub misses: u64,
    /// Factory invocations made by this instance
    pub factory_runs: u64,
    /// Factory invocations that returned an error
    pub factory_failures: u64,
    /// Callers that joined an attempt already in flight in this process
    pub dedup_joins: u64,
    /// Times this instance found another holder's lock and waited
    pub lock_waits: u64,
    /// Lock files deleted after the wait timed out
    pub lock_takeovers: u64,
    /// Average factory duration (milliseconds)
    pub avg_factory_time_ms: f64,
    /// Timestamp of metrics creation
    pub created_at: SystemTime,
}

impl CacheStats {
    /// Calculate hit rate as a percentage (0.0 to 100.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }

    /// Calculate miss rate as a percentage (0.0 to 100.0)
    pub fn miss_rate(&self) -> f64 {
        100.0 - self.hit_rate()
    }

    /// Get uptime since metrics creation
    pub fn uptime(&self) -> Duration {
        SystemTime::now()
            .duration_since(self.created_at)
            .unwrap_or(Duration::from_secs(0))
    }
}

/// Thread-safe counters, cheap to clone and share
#[derive(Debug, Clone)]
pub struct CacheMetrics {
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
    factory_runs: Arc<AtomicU64>,
    factory_failures: Arc<AtomicU64>,
    total_factory_time_ms: Arc<AtomicU64>,
    dedup_joins: Arc<AtomicU64>,
    lock_waits: Arc<AtomicU64>,
    lock_takeovers: Arc<AtomicU64>,
    created_at: SystemTime,
}

impl CacheMetrics {
    /// Create zeroed metrics
    pub fn new() -> Self {
        Self {
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
            factory_runs: Arc::new(AtomicU64::new(0)),
            factory_failures: Arc::new(AtomicU64::new(0)),
            total_factory_time_ms: Arc::new(AtomicU64::new(0)),
            dedup_joins: Arc::new(AtomicU64::new(0)),
            lock_waits: Arc::new(AtomicU64::new(0)),
            lock_takeovers: Arc::new(AtomicU64::new(0)),
            created_at: SystemTime::now(),
        }
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a finished factory call with its duration
    pub fn record_factory_run(&self, elapsed_ms: f64, succeeded: bool) {
        self.factory_runs.fetch_add(1, Ordering::Relaxed);
        self.total_factory_time_ms
            .fetch_add(elapsed_ms as u64, Ordering::Relaxed);
        if !succeeded {
            self.factory_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_dedup_join(&self) {
        self.dedup_joins.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lock_wait(&self) {
        self.lock_waits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lock_takeover(&self) {
        self.lock_takeovers.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current statistics snapshot
    pub fn snapshot(&self) -> CacheStats {
        let factory_runs = self.factory_runs.load(Ordering::Relaxed);
        let total_factory_time_ms = self.total_factory_time_ms.load(Ordering::Relaxed);

        let avg_factory_time_ms = if factory_runs > 0 {
            total_factory_time_ms as f64 / factory_runs as f64
        } else {
            0.0
        };

        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            factory_runs,
            factory_failures: self.factory_failures.load(Ordering::Relaxed),
            dedup_joins: self.dedup_joins.load(Ordering::Relaxed),
            lock_waits: self.lock_waits.load(Ordering::Relaxed),
            lock_takeovers: self.lock_takeovers.load(Ordering::Relaxed),
            avg_factory_time_ms,
            created_at: self.created_at,
        }
    }

    /// Reset all counters
    pub fn reset(&self) {
        for counter in [
            &self.hits,
            &self.misses,
            &self.factory_runs,
            &self.factory_failures,
            &self.total_factory_time_ms,
            &self.dedup_joins,
            &self.lock_waits,
            &self.lock_takeovers,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl Default for CacheMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Operation timing helper
#[derive(Debug)]
pub struct OperationTimer {
    start_time: std::time::Instant,
}

impl OperationTimer {
    /// Start timing an operation
    pub fn start() -> Self {
        Self {
            start_time: std::time::Instant::now(),
        }
    }

    /// Get elapsed time in milliseconds
    pub fn elapsed_ms(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64() * 1000.0
    }
}
