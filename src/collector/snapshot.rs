//! Samples and the swappable snapshot served to scrapers.

use arc_swap::ArcSwap;
use prometheus::core::{Collector, Desc};
use prometheus::proto::{Gauge, LabelPair, Metric, MetricFamily, MetricType};
use prometheus::{Encoder, TextEncoder};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

/// A single exported value.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub value: f64,
    pub timestamp: Option<SystemTime>,
}

/// An immutable set of samples.
#[derive(Debug, Default)]
pub struct Snapshot {
    samples: Vec<Sample>,
}

impl Snapshot {
    pub fn new(samples: Vec<Sample>) -> Self {
        Self { samples }
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Group samples into gauge families, one per metric name.
    ///
    /// A label set seen twice within a family is exported once.
    pub fn families(&self) -> Vec<MetricFamily> {
        let mut by_name: BTreeMap<&str, Vec<&Sample>> = BTreeMap::new();
        for sample in &self.samples {
            by_name.entry(sample.name.as_str()).or_default().push(sample);
        }

        by_name
            .into_iter()
            .map(|(name, samples)| {
                let mut family = MetricFamily::default();
                family.set_name(name.to_string());
                family.set_help(format!("CloudWatch metric {}", name));
                family.set_field_type(MetricType::GAUGE);

                let mut seen: HashSet<&BTreeMap<String, String>> = HashSet::new();
                for sample in samples {
                    if !seen.insert(&sample.labels) {
                        warn!(metric = %name, labels = ?sample.labels, "dropping duplicate series");
                        continue;
                    }
                    family.mut_metric().push(to_metric(sample));
                }
                family
            })
            .collect()
    }
}

fn to_metric(sample: &Sample) -> Metric {
    let mut metric = Metric::default();
    for (name, value) in &sample.labels {
        let mut pair = LabelPair::default();
        pair.set_name(name.clone());
        pair.set_value(value.clone());
        metric.mut_label().push(pair);
    }

    let mut gauge = Gauge::default();
    gauge.set_value(sample.value);
    metric.set_gauge(gauge);

    if let Some(timestamp) = sample.timestamp {
        let millis = timestamp
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default();
        metric.set_timestamp_ms(millis);
    }
    metric
}

/// Accumulates the samples of one collection cycle.
#[derive(Debug, Default)]
pub struct SnapshotBuilder {
    samples: Vec<Sample>,
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, sample: Sample) {
        self.samples.push(sample);
    }

    /// Discard everything added so far.
    pub fn reset(&mut self) {
        self.samples.clear();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn build(self) -> Snapshot {
        Snapshot::new(self.samples)
    }
}

/// Holds the snapshot currently visible to scrapers.
///
/// Readers always see a complete snapshot: a new one replaces the old with
/// a single atomic store.
pub struct SnapshotCollector {
    current: ArcSwap<Snapshot>,
}

impl SnapshotCollector {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(Snapshot::default()),
        }
    }

    /// Get the current snapshot.
    pub fn load(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    /// Replace the current snapshot, returning the previous one.
    pub fn publish(&self, snapshot: Snapshot) -> Arc<Snapshot> {
        self.current.swap(Arc::new(snapshot))
    }

    /// Drop all visible samples. No-op when already empty.
    pub fn reset(&self) {
        if !self.current.load().is_empty() {
            self.current.store(Arc::new(Snapshot::default()));
        }
    }

    /// Encode the current snapshot in the Prometheus text format.
    pub fn encode(&self) -> Result<Vec<u8>, prometheus::Error> {
        let families = self.collect();
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&families, &mut buffer)?;
        Ok(buffer)
    }
}

impl Default for SnapshotCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector for SnapshotCollector {
    /// The metric set changes on every cycle, so nothing is described up front.
    fn desc(&self) -> Vec<&Desc> {
        Vec::new()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        self.current.load().families()
    }
}
