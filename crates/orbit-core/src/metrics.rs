//! In-process metrics: counters, gauges, and latency histograms, exported in
//! Prometheus text format.
//!
//! The teacher has no metrics module of its own; the counter/gauge/
//! histogram shapes and the nearest-rank percentile formula are grounded on
//! `original_source/monitoring/metrics.py`. Kept as a small `Mutex`-guarded
//! struct rather than pulling in a metrics crate: the contract (§6 of
//! SPEC_FULL.md) is narrow enough that hand-rolling it is the simpler,
//! dependency-light choice, consistent with how the teacher avoids
//! heavyweight crates for things this small.

use std::collections::HashMap;
use std::sync::Mutex;

/// Cap on samples retained per histogram; oldest samples are evicted first.
/// Bounds memory for long-running processes while keeping percentiles
/// reasonably representative of recent behavior.
const MAX_HISTOGRAM_SAMPLES: usize = 10_000;

#[derive(Default)]
struct Inner {
    counters: HashMap<String, u64>,
    gauges: HashMap<String, f64>,
    histograms: HashMap<String, Vec<f64>>,
}

/// Thread-safe in-process metrics store.
pub struct MetricsCollector {
    inner: Mutex<Inner>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Increment a named counter by `delta`.
    pub fn increment(&self, name: &str, delta: u64) {
        let mut inner = self.inner.lock().unwrap();
        *inner.counters.entry(name.to_string()).or_insert(0) += delta;
    }

    /// Set a named gauge to an absolute value.
    pub fn set_gauge(&self, name: &str, value: f64) {
        let mut inner = self.inner.lock().unwrap();
        inner.gauges.insert(name.to_string(), value);
    }

    /// Record one observation into a named histogram (e.g. a latency in
    /// milliseconds).
    pub fn record(&self, name: &str, value: f64) {
        let mut inner = self.inner.lock().unwrap();
        let samples = inner.histograms.entry(name.to_string()).or_default();
        samples.push(value);
        if samples.len() > MAX_HISTOGRAM_SAMPLES {
            samples.remove(0);
        }
    }

    pub fn get_counter(&self, name: &str) -> u64 {
        self.inner.lock().unwrap().counters.get(name).copied().unwrap_or(0)
    }

    pub fn get_gauge(&self, name: &str) -> Option<f64> {
        self.inner.lock().unwrap().gauges.get(name).copied()
    }

    /// p50/p95/p99 and count/min/max for a histogram, using the nearest-rank
    /// method: `index = floor(percentile / 100 * len)`, clamped to `len - 1`.
    pub fn histogram_stats(&self, name: &str) -> Option<HistogramStats> {
        let inner = self.inner.lock().unwrap();
        let samples = inner.histograms.get(name)?;
        if samples.is_empty() {
            return None;
        }

        let mut sorted = samples.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());

        let percentile = |p: f64| -> f64 {
            let idx = ((p / 100.0) * sorted.len() as f64) as usize;
            sorted[idx.min(sorted.len() - 1)]
        };

        Some(HistogramStats {
            count: sorted.len(),
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            p50: percentile(50.0),
            p95: percentile(95.0),
            p99: percentile(99.0),
        })
    }

    /// Render all counters, gauges, and histogram summaries in Prometheus
    /// text exposition format.
    pub fn export_prometheus_text(&self) -> String {
        let inner = self.inner.lock().unwrap();
        let mut out = String::new();

        for (name, value) in sorted(&inner.counters) {
            out.push_str(&format!("# TYPE {name} counter\n{name} {value}\n"));
        }
        for (name, value) in sorted(&inner.gauges) {
            out.push_str(&format!("# TYPE {name} gauge\n{name} {value}\n"));
        }
        for name in inner.histograms.keys().collect::<std::collections::BTreeSet<_>>() {
            let samples = &inner.histograms[name];
            if samples.is_empty() {
                continue;
            }
            let mut sorted_samples = samples.clone();
            sorted_samples.sort_by(|a, b| a.partial_cmp(b).unwrap());
            let percentile = |p: f64| -> f64 {
                let idx = ((p / 100.0) * sorted_samples.len() as f64) as usize;
                sorted_samples[idx.min(sorted_samples.len() - 1)]
            };
            out.push_str(&format!("# TYPE {name} summary\n"));
            out.push_str(&format!("{name}{{quantile=\"0.5\"}} {}\n", percentile(50.0)));
            out.push_str(&format!("{name}{{quantile=\"0.95\"}} {}\n", percentile(95.0)));
            out.push_str(&format!("{name}{{quantile=\"0.99\"}} {}\n", percentile(99.0)));
            out.push_str(&format!("{name}_count {}\n", sorted_samples.len()));
        }

        out
    }
}

fn sorted<'a>(
    map: &'a HashMap<String, impl Copy + std::fmt::Display + 'a>,
) -> Vec<(&'a str, impl Copy + std::fmt::Display + 'a)> {
    let mut entries: Vec<(&str, _)> = map.iter().map(|(k, v)| (k.as_str(), *v)).collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    entries
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistogramStats {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

/// The three SLA checks spec.md §4.2 documents, each independently true or
/// false.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlaCompliance {
    pub latency_p95_under_500ms: bool,
    pub error_rate_under_1_percent: bool,
    pub success_rate_above_99_percent: bool,
}

impl SlaCompliance {
    pub fn is_compliant(&self) -> bool {
        self.latency_p95_under_500ms && self.error_rate_under_1_percent && self.success_rate_above_99_percent
    }
}

impl MetricsCollector {
    /// `checkSlaCompliance()`: latency p95 under 500ms, error rate under 1%,
    /// success rate at or above 99%, derived from the `tasks_completed`/
    /// `tasks_failed`/`tasks_cancelled` gauges (absolute task-status counts,
    /// refreshed by the health monitor) and the `task_execution_time_ms`
    /// histogram. An SLA with no terminal tasks yet reports 0% success/error
    /// rate, matching a freshly started collector.
    pub fn check_sla_compliance(&self) -> SlaCompliance {
        let completed = self.get_gauge("tasks_completed").unwrap_or(0.0);
        let failed = self.get_gauge("tasks_failed").unwrap_or(0.0);
        let cancelled = self.get_gauge("tasks_cancelled").unwrap_or(0.0);
        let total_terminal = completed + failed + cancelled;

        let success_rate = if total_terminal > 0.0 {
            completed / total_terminal * 100.0
        } else {
            0.0
        };
        let error_rate = if total_terminal > 0.0 {
            failed / total_terminal * 100.0
        } else {
            0.0
        };

        let p95 = self
            .histogram_stats("task_execution_time_ms")
            .map(|stats| stats.p95)
            .unwrap_or(0.0);

        SlaCompliance {
            latency_p95_under_500ms: p95 < 500.0,
            error_rate_under_1_percent: error_rate < 1.0,
            success_rate_above_99_percent: success_rate >= 99.0,
        }
    }
}
