//! Conversion of `GetMetricData` results into samples.

use crate::cloudwatch::DataResult;
use crate::collector::{QueryBatch, Sample};
use crate::config::MetricSpec;
use crate::util::{is_valid_metric_name, sanitize_label_name};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};

/// Turns the results of one batch into samples.
///
/// Results may arrive over several pages. Since CloudWatch scans most
/// recent first, only the first occurrence of each result id is used.
pub struct ResultAssembler<'a> {
    spec: &'a MetricSpec,
    batch: &'a QueryBatch,
    seen: HashSet<String>,
    samples: Vec<Sample>,
}

impl<'a> ResultAssembler<'a> {
    pub fn new(spec: &'a MetricSpec, batch: &'a QueryBatch) -> Self {
        Self {
            spec,
            batch,
            seen: HashSet::new(),
            samples: Vec::new(),
        }
    }

    /// Consume one page of results.
    pub fn absorb(&mut self, results: impl IntoIterator<Item = DataResult>) {
        for result in results {
            if let Some(sample) = self.assemble_one(result) {
                self.samples.push(sample);
            }
        }
    }

    /// Samples assembled so far.
    pub fn finish(self) -> Vec<Sample> {
        self.samples
    }

    fn assemble_one(&mut self, result: DataResult) -> Option<Sample> {
        let value = *result.values.first()?;

        let Some(query) = self.batch.get(&result.id) else {
            debug!(id = %result.id, "ignoring result for unknown query id");
            return None;
        };

        if !self.seen.insert(result.id.clone()) {
            return None;
        }

        if !is_valid_metric_name(&query.label) {
            warn!(metric = %query.label, "dropping sample with invalid metric name");
            return None;
        }

        let mut labels: BTreeMap<String, String> = query
            .dimensions
            .iter()
            .map(|d| (sanitize_label_name(&d.name), d.value.clone()))
            .collect();
        for (name, value) in &self.spec.custom_labels {
            labels.insert(sanitize_label_name(name), value.clone());
        }

        let timestamp = if self.spec.include_timestamp {
            result.timestamps.first().copied()
        } else {
            None
        };

        Some(Sample {
            name: query.label.clone(),
            labels,
            value,
            timestamp,
        })
    }
}

/// Assemble a complete result list in one go.
pub fn assemble(spec: &MetricSpec, batch: &QueryBatch, results: Vec<DataResult>) -> Vec<Sample> {
    let mut assembler = ResultAssembler::new(spec, batch);
    assembler.absorb(results);
    assembler.finish()
}
