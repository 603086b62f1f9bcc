//! In-process metrics recorder
//!
//! The crate emits `metrics` counters (`consumer.messages`,
//! `consumer.poll_failures`, `circuit_breaker.transitions`, `aggregates.*`).
//! `CounterRecorder` keeps their totals in memory so the binary can log them
//! when it stops. An embedding application that exports metrics installs its
//! own recorder instead.
//!
//! Only counters are kept; gauges and histograms are not emitted by this crate
//! and register as no-ops.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use metrics::{Counter, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit};

/// Counter totals keyed by metric name and labels
#[derive(Debug, Clone, Default)]
pub struct CounterRecorder {
    counters: Arc<DashMap<Key, Arc<AtomicU64>>>,
}

impl CounterRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a clone of this recorder as the process-wide recorder
    ///
    /// Fails if a recorder was already installed.
    pub fn install(&self) -> Result<(), String> {
        metrics::set_global_recorder(self.clone()).map_err(|e| e.to_string())
    }

    /// Current value of one counter, zero if it was never incremented
    ///
    /// `labels` must be given in the order the counter was emitted with.
    pub fn counter(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        self.snapshot()
            .into_iter()
            .find(|(rendered, _)| *rendered == render(name, labels.iter().copied()))
            .map(|(_, value)| value)
            .unwrap_or(0)
    }

    /// Every counter as `name{label=value,...}`, sorted by name
    pub fn snapshot(&self) -> Vec<(String, u64)> {
        let mut totals: Vec<(String, u64)> = self
            .counters
            .iter()
            .map(|entry| {
                let key = entry.key();
                let labels = key.labels().map(|label| (label.key(), label.value()));
                (
                    render(key.name(), labels),
                    entry.value().load(Ordering::Relaxed),
                )
            })
            .collect();

        totals.sort();
        totals
    }

    /// Log every counter at info level
    pub fn log_totals(&self) {
        for (counter, value) in self.snapshot() {
            tracing::info!(counter = %counter, value, "metric total");
        }
    }
}

fn render<'a>(name: &str, labels: impl Iterator<Item = (&'a str, &'a str)>) -> String {
    let labels: Vec<String> = labels.map(|(key, value)| format!("{}={}", key, value)).collect();

    if labels.is_empty() {
        name.to_string()
    } else {
        format!("{}{{{}}}", name, labels.join(","))
    }
}

impl Recorder for CounterRecorder {
    fn describe_counter(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn describe_gauge(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn describe_histogram(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn register_counter(&self, key: &Key, _metadata: &Metadata<'_>) -> Counter {
        let total = self
            .counters
            .entry(key.clone())
            .or_insert_with(|| Arc::new(AtomicU64::new(0)))
            .value()
            .clone();

        Counter::from_arc(total)
    }

    fn register_gauge(&self, _key: &Key, _metadata: &Metadata<'_>) -> Gauge {
        Gauge::noop()
    }

    fn register_histogram(&self, _key: &Key, _metadata: &Metadata<'_>) -> Histogram {
        Histogram::noop()
    }
}
