use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

/// Observations kept per histogram; older ones are dropped first.
const HISTOGRAM_WINDOW: usize = 4096;

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
struct MetricKey {
    name: String,
    labels: Vec<(String, String)>,
}

impl MetricKey {
    fn new(name: &str, labels: &[(&str, &str)]) -> Self {
        let mut labels: Vec<(String, String)> = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        labels.sort();
        Self {
            name: name.to_string(),
            labels,
        }
    }
}

#[derive(Default)]
struct Histogram {
    observations: Mutex<VecDeque<f64>>,
}

impl Histogram {
    fn observe(&self, value: f64) {
        let mut obs = self.observations.lock();
        if obs.len() == HISTOGRAM_WINDOW {
            obs.pop_front();
        }
        obs.push_back(value);
    }

    fn summary(&self) -> HistogramSummary {
        let mut obs: Vec<f64> = self.observations.lock().iter().copied().collect();
        if obs.is_empty() {
            return HistogramSummary::default();
        }
        obs.sort_by(|a, b| a.total_cmp(b));
        let count = obs.len();
        let at = |q: f64| obs[((count as f64 * q) as usize).min(count - 1)];
        HistogramSummary {
            count: count as u64,
            sum: obs.iter().sum(),
            p50: at(0.5),
            p95: at(0.95),
            max: obs[count - 1],
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct HistogramSummary {
    pub count: u64,
    pub sum: f64,
    pub p50: f64,
    pub p95: f64,
    pub max: f64,
}

/// One metric value at snapshot time.
#[derive(Clone, Debug, Serialize)]
pub struct MetricSample {
    pub name: String,
    pub labels: HashMap<String, String>,
    #[serde(flatten)]
    pub value: SampleValue,
    pub timestamp: String,
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "metric_type", rename_all = "snake_case")]
pub enum SampleValue {
    Counter { value: u64 },
    Histogram { summary: HistogramSummary },
}

/// In-process counters and histograms for job and batch accounting.
#[derive(Default)]
pub struct MetricsRecorder {
    counters: RwLock<HashMap<MetricKey, AtomicU64>>,
    histograms: RwLock<HashMap<MetricKey, Histogram>>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter_inc(&self, name: &str, labels: &[(&str, &str)], n: u64) {
        let key = MetricKey::new(name, labels);
        if let Some(c) = self.counters.read().get(&key) {
            c.fetch_add(n, Ordering::Relaxed);
            return;
        }
        self.counters
            .write()
            .entry(key)
            .or_default()
            .fetch_add(n, Ordering::Relaxed);
    }

    pub fn counter_get(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        let key = MetricKey::new(name, labels);
        self.counters
            .read()
            .get(&key)
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }

    pub fn histogram_observe(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        let key = MetricKey::new(name, labels);
        if let Some(h) = self.histograms.read().get(&key) {
            h.observe(value);
            return;
        }
        self.histograms.write().entry(key).or_default().observe(value);
    }

    pub fn histogram_summary(&self, name: &str, labels: &[(&str, &str)]) -> HistogramSummary {
        let key = MetricKey::new(name, labels);
        self.histograms
            .read()
            .get(&key)
            .map(Histogram::summary)
            .unwrap_or_default()
    }

    /// Current value of every metric, sorted by name.
    pub fn snapshot(&self) -> Vec<MetricSample> {
        let now = Utc::now().to_rfc3339();
        let labels_of = |key: &MetricKey| key.labels.iter().cloned().collect::<HashMap<_, _>>();

        let mut samples: Vec<MetricSample> = self
            .counters
            .read()
            .iter()
            .map(|(key, c)| MetricSample {
                name: key.name.clone(),
                labels: labels_of(key),
                value: SampleValue::Counter {
                    value: c.load(Ordering::Relaxed),
                },
                timestamp: now.clone(),
            })
            .collect();
        samples.extend(self.histograms.read().iter().map(|(key, h)| MetricSample {
            name: key.name.clone(),
            labels: labels_of(key),
            value: SampleValue::Histogram { summary: h.summary() },
            timestamp: now.clone(),
        }));
        samples.sort_by(|a, b| a.name.cmp(&b.name));
        samples
    }
}
