use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;

const LATENCY_WINDOW: usize = 512;

/// Rolling request counters. Latency percentiles cover the last 512 requests.
#[derive(Default)]
pub struct Metrics {
    requests: AtomicU64,
    failures: AtomicU64,
    degraded: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    latencies_ms: Mutex<VecDeque<f64>>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct MetricsSnapshot {
    pub requests: u64,
    pub failures: u64,
    pub degraded: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_hit_rate: f64,
    pub latency_mean_ms: f64,
    pub latency_p50_ms: f64,
    pub latency_p95_ms: f64,
}

impl Metrics {
    pub fn new() -> Self { Self::default() }

    pub fn record(&self, latency: Duration, failed: bool, degraded: bool) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        if failed { self.failures.fetch_add(1, Ordering::Relaxed); }
        if degraded { self.degraded.fetch_add(1, Ordering::Relaxed); }
        let mut window = self.latencies_ms.lock().unwrap_or_else(PoisonError::into_inner);
        if window.len() == LATENCY_WINDOW { window.pop_front(); }
        window.push_back(latency.as_secs_f64() * 1000.0);
    }

    pub fn record_cache(&self, hit: bool) {
        let counter = if hit { &self.cache_hits } else { &self.cache_misses };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut lat: Vec<f64> = self.latencies_ms.lock().unwrap_or_else(PoisonError::into_inner).iter().copied().collect();
        lat.sort_by(f64::total_cmp);
        let hits = self.cache_hits.load(Ordering::Relaxed);
        let misses = self.cache_misses.load(Ordering::Relaxed);
        MetricsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            degraded: self.degraded.load(Ordering::Relaxed),
            cache_hits: hits,
            cache_misses: misses,
            cache_hit_rate: if hits + misses == 0 { 0.0 } else { hits as f64 / (hits + misses) as f64 },
            latency_mean_ms: if lat.is_empty() { 0.0 } else { lat.iter().sum::<f64>() / lat.len() as f64 },
            latency_p50_ms: percentile(&lat, 0.50),
            latency_p95_ms: percentile(&lat, 0.95),
        }
    }
}

/// Nearest-rank percentile over sorted values.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() { return 0.0; }
    let rank = (p * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentiles_and_hit_rate() {
        let m = Metrics::new();
        for ms in 1..=100u64 { m.record(Duration::from_millis(ms), ms == 100, ms % 10 == 0); }
        m.record_cache(true);
        m.record_cache(false);
        m.record_cache(false);
        m.record_cache(true);
        let s = m.snapshot();
        assert_eq!(s.requests, 100);
        assert_eq!(s.failures, 1);
        assert_eq!(s.degraded, 10);
        assert!((s.latency_p50_ms - 50.0).abs() < 1e-6);
        assert!((s.latency_p95_ms - 95.0).abs() < 1e-6);
        assert!((s.latency_mean_ms - 50.5).abs() < 1e-6);
        assert!((s.cache_hit_rate - 0.5).abs() < 1e-9);
    }

    #[test]
    fn window_keeps_latest_samples() {
        let m = Metrics::new();
        for _ in 0..LATENCY_WINDOW { m.record(Duration::from_millis(1000), false, false); }
        for _ in 0..LATENCY_WINDOW { m.record(Duration::from_millis(2), false, false); }
        assert!((m.snapshot().latency_p95_ms - 2.0).abs() < 1e-6);
    }
}
