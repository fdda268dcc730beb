//! Grouping of discovered series into `GetMetricData` batches.

use crate::cloudwatch::{MetricQuery, Series, MAX_QUERIES_PER_REQUEST};
use crate::config::{MetricDefinition, MetricSpec};
use std::collections::HashMap;

/// Queries sent in one `GetMetricData` call.
///
/// Query ids are unique within the batch and only serve to map each result
/// back to the query, and so to the dimension set, it belongs to.
#[derive(Debug, Clone, Default)]
pub struct QueryBatch {
    queries: Vec<MetricQuery>,
    index: HashMap<String, usize>,
}

impl QueryBatch {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            queries: Vec::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
        }
    }

    fn push(&mut self, query: MetricQuery) {
        self.index.insert(query.id.clone(), self.queries.len());
        self.queries.push(query);
    }

    /// Queries in insertion order.
    pub fn queries(&self) -> &[MetricQuery] {
        &self.queries
    }

    /// Look up the query a result id belongs to.
    pub fn get(&self, id: &str) -> Option<&MetricQuery> {
        self.index.get(id).map(|&i| &self.queries[i])
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }
}

/// Builds batches for one (definition, spec, region) triple.
///
/// Series are pushed as listing pages arrive; a full batch is handed back
/// as soon as it reaches the limit, so batches span page boundaries.
pub struct QueryBatcher<'a> {
    definition: &'a MetricDefinition,
    spec: &'a MetricSpec,
    prefix: String,
    limit: usize,
    sequence: usize,
    current: QueryBatch,
}

impl<'a> QueryBatcher<'a> {
    /// Create a batcher with the CloudWatch request limit.
    ///
    /// `prefix` must start with a lowercase letter; query ids are
    /// `<prefix>_<n>`.
    pub fn new(definition: &'a MetricDefinition, spec: &'a MetricSpec, prefix: impl Into<String>) -> Self {
        Self::with_limit(definition, spec, prefix, MAX_QUERIES_PER_REQUEST)
    }

    pub fn with_limit(
        definition: &'a MetricDefinition,
        spec: &'a MetricSpec,
        prefix: impl Into<String>,
        limit: usize,
    ) -> Self {
        let limit = limit.clamp(1, MAX_QUERIES_PER_REQUEST);
        Self {
            definition,
            spec,
            prefix: prefix.into(),
            limit,
            sequence: 0,
            current: QueryBatch::with_capacity(limit),
        }
    }

    /// Add a series; returns the batch if it just became full.
    pub fn push(&mut self, series: &Series) -> Option<QueryBatch> {
        let query = self.query_for(series);
        self.current.push(query);

        if self.current.len() >= self.limit {
            let full = std::mem::replace(&mut self.current, QueryBatch::with_capacity(self.limit));
            Some(full)
        } else {
            None
        }
    }

    /// Return the remaining partial batch, if any.
    pub fn finish(self) -> Option<QueryBatch> {
        if self.current.is_empty() {
            None
        } else {
            Some(self.current)
        }
    }

    /// Number of series pushed so far.
    pub fn pushed(&self) -> usize {
        self.sequence
    }

    fn query_for(&mut self, series: &Series) -> MetricQuery {
        let id = format!("{}_{}", self.prefix, self.sequence);
        self.sequence += 1;

        let dimensions = series
            .dimensions
            .iter()
            .filter(|d| self.definition.keeps_dimension(&d.name))
            .cloned()
            .collect();

        MetricQuery {
            id,
            label: self.spec.exported_name.clone(),
            namespace: self.definition.namespace.clone(),
            metric_name: self.spec.name.clone(),
            statistic: self.spec.statistic.clone(),
            unit: self.spec.unit.clone(),
            period_seconds: self.definition.period_seconds,
            dimensions,
        }
    }
}

/// Split a complete series list into batches.
pub fn batch_series(
    definition: &MetricDefinition,
    spec: &MetricSpec,
    prefix: &str,
    series: &[Series],
) -> Vec<QueryBatch> {
    let mut batcher = QueryBatcher::new(definition, spec, prefix);
    let mut batches: Vec<QueryBatch> = series.iter().filter_map(|s| batcher.push(s)).collect();
    batches.extend(batcher.finish());
    batches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloudwatch::Dimension;
    use std::collections::{BTreeMap, HashSet};

    fn definition() -> MetricDefinition {
        let mut definition = MetricDefinition::new("AWS/EC2");
        definition.dimension_filter.insert("InstanceId".to_string());
        definition
    }

    fn spec() -> MetricSpec {
        MetricSpec {
            name: "CPUUtilization".to_string(),
            unit: Some("Percent".to_string()),
            statistic: "Average".to_string(),
            exported_name: "ec2_cpu".to_string(),
            include_timestamp: false,
            custom_labels: BTreeMap::new(),
        }
    }

    fn series(n: usize) -> Vec<Series> {
        (0..n)
            .map(|i| Series {
                dimensions: vec![
                    Dimension::new("InstanceId", format!("i-{:05}", i)),
                    Dimension::new("ImageId", "ami-1"),
                ],
            })
            .collect()
    }

    #[test]
    fn test_batch_counts() {
        let definition = definition();
        let spec = spec();

        for (n, expected) in [(0, 0), (1, 1), (499, 1), (500, 1), (501, 2), (1000, 2), (1001, 3)] {
            let all = series(n);
            let batches = batch_series(&definition, &spec, "cw_0_0_0", &all);
            assert_eq!(batches.len(), expected, "n = {}", n);
            assert!(batches.iter().all(|b| !b.is_empty() && b.len() <= MAX_QUERIES_PER_REQUEST));
            assert_eq!(batches.iter().map(QueryBatch::len).sum::<usize>(), n);
        }
    }

    #[test]
    fn test_batches_cover_every_series_once() {
        let definition = definition();
        let spec = spec();
        let all = series(1234);

        let batches = batch_series(&definition, &spec, "cw_0_0_0", &all);

        let mut instances = HashSet::new();
        let mut ids = HashSet::new();
        for batch in &batches {
            for query in batch.queries() {
                assert!(ids.insert(query.id.clone()), "duplicate id {}", query.id);
                assert!(instances.insert(query.dimensions[0].value.clone()));
            }
        }
        assert_eq!(instances.len(), 1234);
    }

    #[test]
    fn test_query_descriptor() {
        let definition = definition();
        let spec = spec();
        let batches = batch_series(&definition, &spec, "cw_1_2_3", &series(1));

        let query = &batches[0].queries()[0];
        assert_eq!(query.id, "cw_1_2_3_0");
        assert_eq!(query.label, "ec2_cpu");
        assert_eq!(query.namespace, "AWS/EC2");
        assert_eq!(query.metric_name, "CPUUtilization");
        assert_eq!(query.statistic, "Average");
        assert_eq!(query.unit.as_deref(), Some("Percent"));
        assert_eq!(query.period_seconds, 60);
        // ImageId is not in the dimension filter
        assert_eq!(query.dimensions, vec![Dimension::new("InstanceId", "i-00000")]);
        assert!(batches[0].get("cw_1_2_3_0").is_some());
        assert!(batches[0].get("cw_1_2_3_1").is_none());
    }

    #[test]
    fn test_empty_filter_keeps_no_dimensions() {
        let definition = MetricDefinition::new("AWS/EC2");
        let spec = spec();
        let batches = batch_series(&definition, &spec, "cw_0_0_0", &series(3));
        assert!(batches[0].queries().iter().all(|q| q.dimensions.is_empty()));
    }

    #[test]
    fn test_incremental_push_flushes_at_limit() {
        let definition = definition();
        let spec = spec();
        let all = series(7);
        let mut batcher = QueryBatcher::with_limit(&definition, &spec, "cw", 3);

        let flushed: Vec<usize> = all
            .iter()
            .enumerate()
            .filter_map(|(i, s)| batcher.push(s).map(|b| (i, b)))
            .map(|(i, b)| {
                assert_eq!(b.len(), 3);
                i
            })
            .collect();
        assert_eq!(flushed, vec![2, 5]);
        assert_eq!(batcher.pushed(), 7);

        let rest = batcher.finish().unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest.queries()[0].id, "cw_6");
    }
}
