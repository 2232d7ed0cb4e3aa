use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use vg_types::MetricSample;

use crate::window::RollingWindow;

/// Default per-series buffer capacity.
pub const DEFAULT_CAPACITY: usize = 100;

/// Store-wide counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub series: usize,
    pub samples_recorded: u64,
    pub samples_evicted: u64,
}

/// Rolling sample buffers keyed by series name.
///
/// Each series sits behind its own lock, so a writer on one series never
/// stalls readers of another and a reader never sees a half-applied push.
#[derive(Debug)]
pub struct TelemetryStore {
    windows: DashMap<String, RwLock<RollingWindow<MetricSample>>>,
    capacity: usize,
    recorded: AtomicU64,
    evicted: AtomicU64,
}

impl Default for TelemetryStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl TelemetryStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            windows: DashMap::new(),
            capacity: capacity.max(1),
            recorded: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a sample. Unknown series are created on first write.
    pub fn record(&self, series: &str, value: f64, timestamp: DateTime<Utc>) {
        self.record_sample(MetricSample::new(series, value, timestamp));
    }

    pub fn record_sample(&self, sample: MetricSample) {
        let existing = self.windows.get(&sample.series);
        let evicted = match &existing {
            Some(window) => {
                let evicted = window.write().push(sample);
                evicted
            }
            None => {
                debug!(series = %sample.series, "creating series buffer");
                let entry = self
                    .windows
                    .entry(sample.series.clone())
                    .or_insert_with(|| RwLock::new(RollingWindow::new(self.capacity)));
                let evicted = entry.write().push(sample);
                evicted
            }
        };
        drop(existing);
        self.recorded.fetch_add(1, Ordering::Relaxed);
        if evicted.is_some() {
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Time-ordered copy of a series. Samples with equal timestamps keep
    /// their arrival order.
    pub fn snapshot(&self, series: &str) -> Vec<MetricSample> {
        let mut samples = match self.windows.get(series) {
            Some(window) => window.read().to_vec(),
            None => return Vec::new(),
        };
        samples.sort_by_key(|s| s.timestamp);
        samples
    }

    /// Values of [`TelemetryStore::snapshot`], oldest first.
    pub fn values(&self, series: &str) -> Vec<f64> {
        self.snapshot(series).into_iter().map(|s| s.value).collect()
    }

    /// Most recently recorded value.
    pub fn latest(&self, series: &str) -> Option<f64> {
        self.latest_sample(series).map(|s| s.value)
    }

    pub fn latest_sample(&self, series: &str) -> Option<MetricSample> {
        self.windows
            .get(series)
            .and_then(|window| window.read().latest().cloned())
    }

    pub fn len(&self, series: &str) -> usize {
        self.windows
            .get(series)
            .map(|window| window.read().len())
            .unwrap_or(0)
    }

    pub fn contains(&self, series: &str) -> bool {
        self.len(series) > 0
    }

    /// Known series names, sorted.
    pub fn series(&self) -> Vec<String> {
        let mut names: Vec<String> = self.windows.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            series: self.windows.len(),
            samples_recorded: self.recorded.load(Ordering::Relaxed),
            samples_evicted: self.evicted.load(Ordering::Relaxed),
        }
    }

    pub fn clear(&self) {
        self.windows.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;
    use std::sync::Arc;

    #[test]
    fn unknown_series_is_created_lazily() {
        let store = TelemetryStore::default();
        assert!(store.snapshot("system.latency").is_empty());
        assert_eq!(store.latest("system.latency"), None);

        store.record("system.latency", 42.0, Utc::now());
        assert_eq!(store.latest("system.latency"), Some(42.0));
        assert_eq!(store.series(), vec!["system.latency".to_string()]);
    }

    #[test]
    fn evicts_oldest_per_series() {
        let store = TelemetryStore::new(3);
        let base = Utc::now();
        for i in 0..5 {
            store.record("market.volume", i as f64, base + Duration::seconds(i));
        }
        assert_eq!(store.values("market.volume"), vec![2.0, 3.0, 4.0]);
        let stats = store.stats();
        assert_eq!(stats.samples_recorded, 5);
        assert_eq!(stats.samples_evicted, 2);
        assert_eq!(stats.series, 1);
    }

    #[test]
    fn snapshot_is_time_ordered() {
        let store = TelemetryStore::default();
        let base = Utc::now();
        store.record("trading.pnl", 3.0, base + Duration::seconds(3));
        store.record("trading.pnl", 1.0, base + Duration::seconds(1));
        store.record("trading.pnl", 2.0, base + Duration::seconds(2));

        assert_eq!(store.values("trading.pnl"), vec![1.0, 2.0, 3.0]);
        // latest is arrival order, not timestamp order
        assert_eq!(store.latest("trading.pnl"), Some(2.0));
    }

    #[test]
    fn series_are_independent() {
        let store = TelemetryStore::new(2);
        let now = Utc::now();
        store.record("a", 1.0, now);
        store.record("a", 2.0, now);
        store.record("a", 3.0, now);
        store.record("b", 9.0, now);
        assert_eq!(store.len("a"), 2);
        assert_eq!(store.len("b"), 1);
    }

    #[test]
    fn concurrent_writer_and_readers() {
        let store = Arc::new(TelemetryStore::new(50));
        let writer = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for i in 0..5_000 {
                    store.record("system.cpu_usage", i as f64, Utc::now());
                }
            })
        };
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for _ in 0..1_000 {
                        let snap = store.snapshot("system.cpu_usage");
                        assert!(snap.len() <= 50);
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(store.len("system.cpu_usage"), 50);
        assert_eq!(store.latest("system.cpu_usage"), Some(4_999.0));
    }

    proptest! {
        #[test]
        fn prop_series_len_bounded(capacity in 1usize..32, values in proptest::collection::vec(-1e6..1e6f64, 0..200)) {
            let store = TelemetryStore::new(capacity);
            let now = Utc::now();
            for v in &values {
                store.record("s", *v, now);
                prop_assert!(store.len("s") <= capacity);
            }
            if let Some(last) = values.last() {
                prop_assert_eq!(store.latest("s"), Some(*last));
            }
        }
    }
}
