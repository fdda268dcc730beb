//! Exporter self-telemetry using prometheus-client.
//!
//! Tracks scrapes, cycle durations, remote calls and configuration loads.

use crate::cloudwatch::Operation;
use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;
use std::sync::Arc;
use std::time::Duration;

/// Labels for remote call metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ApiCallLabels {
    pub operation: ApiOperation,
    pub region: String,
    pub outcome: Outcome,
}

/// Labels for configuration load metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct LoadLabels {
    pub outcome: Outcome,
}

/// Remote operation label value.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum ApiOperation {
    ListMetrics,
    GetMetricData,
}

impl From<Operation> for ApiOperation {
    fn from(operation: Operation) -> Self {
        match operation {
            Operation::ListMetrics => ApiOperation::ListMetrics,
            Operation::GetMetricData => ApiOperation::GetMetricData,
        }
    }
}

/// Result of a call or load.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    fn of(success: bool) -> Self {
        if success {
            Outcome::Success
        } else {
            Outcome::Failure
        }
    }
}

/// Collects the exporter's own metrics.
#[derive(Clone)]
pub struct ExporterMetrics {
    inner: Arc<ExporterMetricsInner>,
}

struct ExporterMetricsInner {
    /// Scrapes served on the metrics path.
    scrapes_total: Counter,
    /// Collection cycles run.
    cycles_total: Counter,
    /// Collection cycle duration histogram (in seconds).
    cycle_duration_seconds: Histogram,
    /// Remote calls by operation, region and outcome.
    api_calls_total: Family<ApiCallLabels, Counter>,
    /// Samples in the current snapshot.
    snapshot_samples: Gauge,
    /// Configuration loads by outcome.
    config_loads_total: Family<LoadLabels, Counter>,
    /// 1 while the historical walk is in progress.
    walk_active: Gauge,
    /// The prometheus registry.
    registry: Registry,
}

impl ExporterMetrics {
    /// Create a new telemetry collector.
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let scrapes_total = Counter::default();
        let cycles_total = Counter::default();
        // Buckets: 50ms .. ~100s
        let cycle_duration_seconds = Histogram::new(exponential_buckets(0.05, 2.0, 12));
        let api_calls_total = Family::<ApiCallLabels, Counter>::default();
        let snapshot_samples = Gauge::default();
        let config_loads_total = Family::<LoadLabels, Counter>::default();
        let walk_active = Gauge::default();

        registry.register(
            "cwexporter_scrapes",
            "Total number of scrapes served",
            scrapes_total.clone(),
        );
        registry.register(
            "cwexporter_collection_cycles",
            "Total number of collection cycles run",
            cycles_total.clone(),
        );
        registry.register(
            "cwexporter_collection_duration_seconds",
            "Collection cycle duration in seconds",
            cycle_duration_seconds.clone(),
        );
        registry.register(
            "cwexporter_api_calls",
            "Total number of CloudWatch API calls",
            api_calls_total.clone(),
        );
        registry.register(
            "cwexporter_snapshot_samples",
            "Number of samples in the current snapshot",
            snapshot_samples.clone(),
        );
        registry.register(
            "cwexporter_config_loads",
            "Total number of configuration loads",
            config_loads_total.clone(),
        );
        registry.register(
            "cwexporter_walk_active",
            "Whether the historical walk is in progress (1=walking, 0=live)",
            walk_active.clone(),
        );

        Self {
            inner: Arc::new(ExporterMetricsInner {
                scrapes_total,
                cycles_total,
                cycle_duration_seconds,
                api_calls_total,
                snapshot_samples,
                config_loads_total,
                walk_active,
                registry,
            }),
        }
    }

    /// Get the prometheus registry for encoding.
    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// Encode all telemetry in the OpenMetrics text format.
    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut buffer = String::new();
        prometheus_client::encoding::text::encode(&mut buffer, &self.inner.registry)?;
        Ok(buffer)
    }

    /// Record a scrape of the metrics path.
    pub fn record_scrape(&self) {
        self.inner.scrapes_total.inc();
    }

    /// Record a finished collection cycle.
    pub fn record_cycle(&self, duration: Duration, samples: usize) {
        self.inner.cycles_total.inc();
        self.inner
            .cycle_duration_seconds
            .observe(duration.as_secs_f64());
        self.inner
            .snapshot_samples
            .set(i64::try_from(samples).unwrap_or(i64::MAX));
    }

    /// Record a remote call.
    pub fn record_api_call(&self, operation: Operation, region: &str, success: bool) {
        let labels = ApiCallLabels {
            operation: operation.into(),
            region: region.to_string(),
            outcome: Outcome::of(success),
        };
        self.inner.api_calls_total.get_or_create(&labels).inc();
    }

    /// Record a configuration load attempt.
    pub fn record_load(&self, success: bool) {
        let labels = LoadLabels {
            outcome: Outcome::of(success),
        };
        self.inner.config_loads_total.get_or_create(&labels).inc();
    }

    /// Update the walk status.
    pub fn set_walk_active(&self, active: bool) {
        self.inner.walk_active.set(if active { 1 } else { 0 });
    }
}

impl Default for ExporterMetrics {
    fn default() -> Self {
        Self::new()
    }
}
