use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Type of metric.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    Counter,
    Gauge,
}

/// Point-in-time value of one metric.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MetricValue {
    pub name: String,
    pub metric_type: MetricType,
    pub value: i64,
}

/// Process-local counters and gauges.
///
/// Lookups take a read lock; only the first touch of a name takes the write
/// lock to insert it. Updates themselves are atomic.
#[derive(Default)]
pub struct MetricsRecorder {
    counters: RwLock<HashMap<String, AtomicU64>>,
    gauges: RwLock<HashMap<String, AtomicI64>>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment a counter by n.
    pub fn counter_inc(&self, name: &str, n: u64) {
        let counters = self.counters.read();
        if let Some(c) = counters.get(name) {
            c.fetch_add(n, Ordering::Relaxed);
            return;
        }
        drop(counters);
        self.counters
            .write()
            .entry(name.to_string())
            .or_default()
            .fetch_add(n, Ordering::Relaxed);
    }

    /// Set a gauge to a specific value.
    pub fn gauge_set(&self, name: &str, value: i64) {
        let gauges = self.gauges.read();
        if let Some(g) = gauges.get(name) {
            g.store(value, Ordering::Relaxed);
            return;
        }
        drop(gauges);
        self.gauges
            .write()
            .entry(name.to_string())
            .or_default()
            .store(value, Ordering::Relaxed);
    }

    pub fn counter_get(&self, name: &str) -> u64 {
        self.counters
            .read()
            .get(name)
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }

    pub fn gauge_get(&self, name: &str) -> i64 {
        self.gauges
            .read()
            .get(name)
            .map_or(0, |g| g.load(Ordering::Relaxed))
    }

    /// Every metric touched so far, sorted by name.
    pub fn snapshot(&self) -> Vec<MetricValue> {
        let mut values: Vec<MetricValue> = self
            .counters
            .read()
            .iter()
            .map(|(name, c)| MetricValue {
                name: name.clone(),
                metric_type: MetricType::Counter,
                value: i64::try_from(c.load(Ordering::Relaxed)).unwrap_or(i64::MAX),
            })
            .collect();
        values.extend(self.gauges.read().iter().map(|(name, g)| MetricValue {
            name: name.clone(),
            metric_type: MetricType::Gauge,
            value: g.load(Ordering::Relaxed),
        }));
        values.sort_by(|a, b| a.name.cmp(&b.name));
        values
    }
}
