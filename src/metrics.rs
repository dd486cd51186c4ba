//! Metrics collection for the offline cache engine
//!
//! Thread-safe counters using atomic operations. They track routing
//! decisions, network attempts, cache reads and writes, and fallbacks.

use crate::strategy::Strategy;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Metrics collector for the engine
#[derive(Debug, Default)]
pub struct EngineMetrics {
    // Routing
    total_requests: AtomicU64,
    passthrough_requests: AtomicU64,
    network_first_requests: AtomicU64,
    cache_first_requests: AtomicU64,
    local_image_requests: AtomicU64,

    // Network
    network_fetches: AtomicU64,
    network_failures: AtomicU64,
    bytes_from_network: AtomicU64,

    // Cache
    cache_reads: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    cache_writes: AtomicU64,
    cache_write_errors: AtomicU64,
    bytes_from_cache: AtomicU64,

    // Fallbacks
    shell_fallbacks: AtomicU64,
    unavailable_fallbacks: AtomicU64,
    rethrown_errors: AtomicU64,

    total_request_duration_us: AtomicU64,
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub passthrough_requests: u64,
    pub network_first_requests: u64,
    pub cache_first_requests: u64,
    pub local_image_requests: u64,

    pub network_fetches: u64,
    pub network_failures: u64,
    pub bytes_from_network: u64,

    pub cache_reads: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_writes: u64,
    pub cache_write_errors: u64,
    pub bytes_from_cache: u64,

    pub shell_fallbacks: u64,
    pub unavailable_fallbacks: u64,
    pub rethrown_errors: u64,

    pub total_request_duration_us: u64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request that the engine left to default network handling
    pub fn record_passthrough(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.passthrough_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a request dispatched to a strategy
    pub fn record_dispatch(&self, strategy: Strategy) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let counter = match strategy {
            Strategy::NetworkFirst => &self.network_first_requests,
            Strategy::CacheFirst => &self.cache_first_requests,
            Strategy::LocalImage => &self.local_image_requests,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a network attempt and its outcome
    pub fn record_network_fetch(&self, success: bool, bytes: u64) {
        self.network_fetches.fetch_add(1, Ordering::Relaxed);
        if success {
            self.bytes_from_network.fetch_add(bytes, Ordering::Relaxed);
        } else {
            self.network_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_cache_hit(&self, bytes: u64) {
        self.cache_reads.fetch_add(1, Ordering::Relaxed);
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
        self.bytes_from_cache.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_reads.fetch_add(1, Ordering::Relaxed);
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the outcome of a cache write
    pub fn record_cache_write(&self, success: bool) {
        if success {
            self.cache_writes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.cache_write_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_shell_fallback(&self) {
        self.shell_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unavailable_fallback(&self) {
        self.unavailable_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rethrow(&self) {
        self.rethrown_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_request_duration(&self, duration: Duration) {
        self.total_request_duration_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Get a snapshot of current metrics
    ///
    /// Fields are loaded one by one, so a snapshot taken under load may not
    /// be perfectly consistent across fields.
    pub fn get_stats(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            passthrough_requests: self.passthrough_requests.load(Ordering::Relaxed),
            network_first_requests: self.network_first_requests.load(Ordering::Relaxed),
            cache_first_requests: self.cache_first_requests.load(Ordering::Relaxed),
            local_image_requests: self.local_image_requests.load(Ordering::Relaxed),
            network_fetches: self.network_fetches.load(Ordering::Relaxed),
            network_failures: self.network_failures.load(Ordering::Relaxed),
            bytes_from_network: self.bytes_from_network.load(Ordering::Relaxed),
            cache_reads: self.cache_reads.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            cache_writes: self.cache_writes.load(Ordering::Relaxed),
            cache_write_errors: self.cache_write_errors.load(Ordering::Relaxed),
            bytes_from_cache: self.bytes_from_cache.load(Ordering::Relaxed),
            shell_fallbacks: self.shell_fallbacks.load(Ordering::Relaxed),
            unavailable_fallbacks: self.unavailable_fallbacks.load(Ordering::Relaxed),
            rethrown_errors: self.rethrown_errors.load(Ordering::Relaxed),
            total_request_duration_us: self.total_request_duration_us.load(Ordering::Relaxed),
        }
    }
}

impl MetricsSnapshot {
    /// Cache hit rate as a percentage (0.0 to 100.0)
    pub fn cache_hit_rate(&self) -> f64 {
        if self.cache_reads == 0 {
            0.0
        } else {
            (self.cache_hits as f64 / self.cache_reads as f64) * 100.0
        }
    }

    /// Network failure rate as a percentage (0.0 to 100.0)
    pub fn network_failure_rate(&self) -> f64 {
        if self.network_fetches == 0 {
            0.0
        } else {
            (self.network_failures as f64 / self.network_fetches as f64) * 100.0
        }
    }

    /// Average request duration in milliseconds
    pub fn avg_request_duration_ms(&self) -> f64 {
        let handled = self.total_requests - self.passthrough_requests;
        if handled == 0 {
            0.0
        } else {
            (self.total_request_duration_us as f64 / handled as f64) / 1000.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_record_routing() {
        let metrics = EngineMetrics::new();

        metrics.record_passthrough();
        metrics.record_dispatch(Strategy::NetworkFirst);
        metrics.record_dispatch(Strategy::CacheFirst);
        metrics.record_dispatch(Strategy::LocalImage);
        metrics.record_dispatch(Strategy::NetworkFirst);

        let stats = metrics.get_stats();
        assert_eq!(stats.total_requests, 5);
        assert_eq!(stats.passthrough_requests, 1);
        assert_eq!(stats.network_first_requests, 2);
        assert_eq!(stats.cache_first_requests, 1);
        assert_eq!(stats.local_image_requests, 1);
    }

    #[test]
    fn test_record_cache_operations() {
        let metrics = EngineMetrics::new();

        metrics.record_cache_hit(100);
        metrics.record_cache_hit(50);
        metrics.record_cache_miss();
        metrics.record_cache_write(true);
        metrics.record_cache_write(false);

        let stats = metrics.get_stats();
        assert_eq!(stats.cache_reads, 3);
        assert_eq!(stats.cache_hits, 2);
        assert_eq!(stats.cache_misses, 1);
        assert_eq!(stats.bytes_from_cache, 150);
        assert_eq!(stats.cache_writes, 1);
        assert_eq!(stats.cache_write_errors, 1);
    }

    #[test]
    fn test_network_failure_rate() {
        let metrics = EngineMetrics::new();

        metrics.record_network_fetch(true, 10);
        metrics.record_network_fetch(false, 0);

        let stats = metrics.get_stats();
        assert_eq!(stats.network_fetches, 2);
        assert_eq!(stats.bytes_from_network, 10);
        assert_eq!(stats.network_failure_rate(), 50.0);
    }

    #[test]
    fn test_rates_without_operations() {
        let stats = EngineMetrics::new().get_stats();
        assert_eq!(stats.cache_hit_rate(), 0.0);
        assert_eq!(stats.network_failure_rate(), 0.0);
        assert_eq!(stats.avg_request_duration_ms(), 0.0);
    }

    #[test]
    fn test_avg_request_duration_excludes_passthrough() {
        let metrics = EngineMetrics::new();

        metrics.record_passthrough();
        metrics.record_dispatch(Strategy::CacheFirst);
        metrics.record_request_duration(Duration::from_millis(100));
        metrics.record_dispatch(Strategy::CacheFirst);
        metrics.record_request_duration(Duration::from_millis(200));

        assert_eq!(metrics.get_stats().avg_request_duration_ms(), 150.0);
    }

    #[test]
    fn test_thread_safety() {
        let metrics = Arc::new(EngineMetrics::new());
        let mut handles = vec![];

        for _ in 0..10 {
            let metrics_clone = Arc::clone(&metrics);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    metrics_clone.record_dispatch(Strategy::NetworkFirst);
                    metrics_clone.record_cache_hit(1);
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        let stats = metrics.get_stats();
        assert_eq!(stats.total_requests, 1000);
        assert_eq!(stats.cache_hits, 1000);
    }
}
