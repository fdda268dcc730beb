//! Configuration data types.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// Default aggregation period in seconds.
pub const DEFAULT_PERIOD_SECONDS: u32 = 60;

/// Default lag behind "now" in seconds.
pub const DEFAULT_DELAY_SECONDS: u32 = 600;

/// Default CloudWatch statistic.
pub const DEFAULT_STATISTIC: &str = "Average";

/// Root metric configuration, rebuilt on every load.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Configuration {
    /// Metric definitions in configured order
    pub definitions: Vec<MetricDefinition>,

    /// Regions used by definitions that do not name their own
    pub default_regions: Vec<String>,
}

/// One CloudWatch namespace and the metrics exported from it.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricDefinition {
    /// CloudWatch namespace, e.g. `AWS/EC2`
    pub namespace: String,

    /// Metric specs in configured order
    pub specs: Vec<MetricSpec>,

    /// Aggregation period
    pub period_seconds: u32,

    /// How far behind "now" the query window ends
    pub delay_seconds: u32,

    /// Regions to query; empty means "use the defaults"
    pub regions: Vec<String>,

    /// Dimension names kept as labels; empty keeps none
    pub dimension_filter: BTreeSet<String>,
}

impl MetricDefinition {
    /// Create a definition with default timing and no specs.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            specs: Vec::new(),
            period_seconds: DEFAULT_PERIOD_SECONDS,
            delay_seconds: DEFAULT_DELAY_SECONDS,
            regions: Vec::new(),
            dimension_filter: BTreeSet::new(),
        }
    }

    /// Aggregation period as a duration.
    pub fn period(&self) -> Duration {
        Duration::from_secs(u64::from(self.period_seconds))
    }

    /// Query delay as a duration.
    pub fn delay(&self) -> Duration {
        Duration::from_secs(u64::from(self.delay_seconds))
    }

    /// Whether the series dimension `name` becomes a label.
    pub fn keeps_dimension(&self, name: &str) -> bool {
        self.dimension_filter.contains(name)
    }

    /// Whether every series of a spec ends up with the same label set.
    ///
    /// With no dimension kept, only one series per spec survives exposition.
    pub fn collapses_series(&self) -> bool {
        self.dimension_filter.is_empty() && !self.specs.is_empty()
    }
}

/// A single CloudWatch metric and how it is rendered.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSpec {
    /// CloudWatch metric name, e.g. `CPUUtilization`
    pub name: String,

    /// CloudWatch unit; unset lets CloudWatch pick
    pub unit: Option<String>,

    /// Aggregation statistic, e.g. `Average` or `p99`
    pub statistic: String,

    /// Name of the exported Prometheus metric
    pub exported_name: String,

    /// Attach the data point timestamp to the sample
    pub include_timestamp: bool,

    /// Static labels; they win over dimension labels with the same name
    pub custom_labels: BTreeMap<String, String>,
}

impl Configuration {
    /// Resolve the regions queried for `definition`.
    ///
    /// Precedence: the definition's own regions, then the configuration-level
    /// defaults, then the single process-wide `fallback` region.
    pub fn regions_for(&self, definition: &MetricDefinition, fallback: &str) -> Vec<String> {
        if !definition.regions.is_empty() {
            definition.regions.clone()
        } else if !self.default_regions.is_empty() {
            self.default_regions.clone()
        } else {
            vec![fallback.to_string()]
        }
    }

    /// Total number of metric specs across all definitions.
    pub fn spec_count(&self) -> usize {
        self.definitions.iter().map(|d| d.specs.len()).sum()
    }
}
