//! Metric configuration parsing.
//!
//! The only structural requirement is that `exporter.metrics` is a list of
//! maps. Every other field is optional: a value of the wrong type is
//! treated as absent and its default applies.

use crate::config::{
    ConfigError, Configuration, MetricDefinition, MetricSpec, DEFAULT_DELAY_SECONDS,
    DEFAULT_PERIOD_SECONDS, DEFAULT_STATISTIC,
};
use crate::util::derive_metric_name;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_yaml::Value;
use std::collections::BTreeMap;
use tracing::warn;

/// Top-level key holding the exporter section.
pub const EXPORTER_KEY: &str = "exporter";

#[derive(Debug, Default, Deserialize)]
struct RawDefinition {
    #[serde(default, deserialize_with = "lenient")]
    namespace: Option<String>,

    #[serde(default, deserialize_with = "lenient")]
    period: Option<i64>,

    #[serde(default, deserialize_with = "lenient")]
    delay: Option<i64>,

    #[serde(default, deserialize_with = "string_list")]
    regions: Vec<String>,

    #[serde(default, deserialize_with = "string_list")]
    dimensions: Vec<String>,

    #[serde(default, deserialize_with = "value_list")]
    specs: Vec<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct RawSpec {
    #[serde(default, deserialize_with = "lenient")]
    name: Option<String>,

    #[serde(default, deserialize_with = "lenient")]
    unit: Option<String>,

    #[serde(default, deserialize_with = "lenient")]
    statistic: Option<String>,

    #[serde(default, rename = "promName", deserialize_with = "lenient")]
    prom_name: Option<String>,

    #[serde(default, deserialize_with = "lenient")]
    timestamp: Option<bool>,

    #[serde(default, rename = "customLabels", deserialize_with = "string_map")]
    custom_labels: BTreeMap<String, String>,
}

/// Parse a whole configuration document.
///
/// The document must contain an `exporter` section.
pub fn parse_configuration(document: &Value) -> Result<Configuration, ConfigError> {
    let section = document.get(EXPORTER_KEY).ok_or(ConfigError::Missing)?;
    parse_exporter_section(section)
}

/// Parse the `exporter` section of a configuration document.
pub fn parse_exporter_section(section: &Value) -> Result<Configuration, ConfigError> {
    let map = section
        .as_mapping()
        .ok_or_else(|| ConfigError::Invalid("`exporter` must be a map".to_string()))?;

    let default_regions = map
        .get("regions")
        .map(|v| strings_of(v, "regions"))
        .unwrap_or_default();

    let definitions = match map.get("metrics") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Sequence(entries)) => entries
            .iter()
            .enumerate()
            .map(|(index, entry)| parse_definition(index, entry))
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => {
            return Err(ConfigError::Invalid(
                "`exporter.metrics` must be a list".to_string(),
            ))
        }
    };

    Ok(Configuration {
        definitions,
        default_regions,
    })
}

fn parse_definition(index: usize, entry: &Value) -> Result<MetricDefinition, ConfigError> {
    if !entry.is_mapping() {
        return Err(ConfigError::Invalid(format!(
            "`exporter.metrics[{}]` must be a map",
            index
        )));
    }

    let raw: RawDefinition = serde_yaml::from_value(entry.clone()).map_err(|e| {
        ConfigError::Invalid(format!("`exporter.metrics[{}]`: {}", index, e))
    })?;

    let namespace = raw.namespace.unwrap_or_default();
    if namespace.is_empty() {
        warn!(definition = index, "metric definition has no namespace");
    }

    let mut definition = MetricDefinition::new(namespace);
    definition.period_seconds = positive_seconds(raw.period, DEFAULT_PERIOD_SECONDS, "period", index);
    definition.delay_seconds = non_negative_seconds(raw.delay, DEFAULT_DELAY_SECONDS, "delay", index);
    definition.regions = raw.regions;
    definition.dimension_filter = raw.dimensions.into_iter().collect();

    for (spec_index, value) in raw.specs.iter().enumerate() {
        if let Some(spec) = parse_spec(&definition.namespace, index, spec_index, value) {
            definition.specs.push(spec);
        }
    }

    if definition.collapses_series() {
        warn!(
            definition = index,
            namespace = %definition.namespace,
            "no dimensions configured, only one series per metric will be exported"
        );
    }

    Ok(definition)
}

fn parse_spec(namespace: &str, definition: usize, index: usize, value: &Value) -> Option<MetricSpec> {
    if !value.is_mapping() {
        warn!(definition, spec = index, "skipping metric spec that is not a map");
        return None;
    }

    let raw: RawSpec = match serde_yaml::from_value(value.clone()) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(definition, spec = index, error = %e, "skipping unreadable metric spec");
            return None;
        }
    };

    let Some(name) = raw.name.filter(|n| !n.is_empty()) else {
        warn!(definition, spec = index, "skipping metric spec without a name");
        return None;
    };

    let exported_name = raw
        .prom_name
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| derive_metric_name(namespace, &name));

    Some(MetricSpec {
        unit: raw.unit.filter(|u| !u.is_empty()),
        statistic: raw
            .statistic
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_STATISTIC.to_string()),
        exported_name,
        include_timestamp: raw.timestamp.unwrap_or(false),
        custom_labels: raw.custom_labels,
        name,
    })
}

fn positive_seconds(value: Option<i64>, default: u32, field: &str, definition: usize) -> u32 {
    match value {
        None => default,
        Some(v) if v > 0 && v <= i64::from(i32::MAX) => v as u32,
        Some(v) => {
            warn!(definition, field, value = v, "out of range, using default");
            default
        }
    }
}

fn non_negative_seconds(value: Option<i64>, default: u32, field: &str, definition: usize) -> u32 {
    match value {
        Some(0) => 0,
        other => positive_seconds(other, default, field, definition),
    }
}

/// Collect the string items of a list, dropping duplicates and other kinds.
fn strings_of(value: &Value, field: &str) -> Vec<String> {
    let Some(items) = value.as_sequence() else {
        if !value.is_null() {
            warn!(field, "expected a list of strings, ignoring");
        }
        return Vec::new();
    };

    let mut out: Vec<String> = Vec::with_capacity(items.len());
    for item in items {
        match item.as_str() {
            Some(s) if !out.iter().any(|existing| existing == s) => out.push(s.to_string()),
            Some(_) => {}
            None => warn!(field, item = ?item, "dropping non-string list item"),
        }
    }
    out
}

/// Deserialize an optional field, treating a type mismatch as absent.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    if value.is_null() {
        return Ok(None);
    }
    match serde_yaml::from_value(value.clone()) {
        Ok(v) => Ok(Some(v)),
        Err(e) => {
            warn!(value = ?value, error = %e, "ignoring configuration field with unexpected type");
            Ok(None)
        }
    }
}

fn string_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(strings_of(&value, "list"))
}

fn value_list<'de, D>(deserializer: D) -> Result<Vec<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Sequence(items) => Ok(items),
        Value::Null => Ok(Vec::new()),
        other => {
            warn!(value = ?other, "expected a list of metric specs, ignoring");
            Ok(Vec::new())
        }
    }
}

/// String-to-string map; entries with other key or value kinds are dropped.
fn string_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let Some(map) = value.as_mapping() else {
        if !value.is_null() {
            warn!(value = ?value, "expected a map of custom labels, ignoring");
        }
        return Ok(BTreeMap::new());
    };

    let mut labels = BTreeMap::new();
    for (k, v) in map {
        match (k.as_str(), v.as_str()) {
            (Some(k), Some(v)) => {
                labels.insert(k.to_string(), v.to_string());
            }
            _ => warn!(key = ?k, value = ?v, "dropping non-string custom label"),
        }
    }
    Ok(labels)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> Result<Configuration, ConfigError> {
        let document: Value = serde_yaml::from_str(yaml).unwrap();
        parse_configuration(&document)
    }

    #[test]
    fn test_full_definition() {
        let config = parse(
            r#"
exporter:
  regions: [eu-west-1]
  metrics:
    - namespace: AWS/EC2
      period: 300
      delay: 120
      regions: [us-east-1, us-west-2]
      dimensions: [InstanceId]
      specs:
        - name: CPUUtilization
          unit: Percent
          statistic: Maximum
          promName: ec2_cpu
          timestamp: true
          customLabels:
            team: infra
"#,
        )
        .unwrap();

        assert_eq!(config.default_regions, vec!["eu-west-1"]);
        assert_eq!(config.definitions.len(), 1);

        let definition = &config.definitions[0];
        assert_eq!(definition.namespace, "AWS/EC2");
        assert_eq!(definition.period_seconds, 300);
        assert_eq!(definition.delay_seconds, 120);
        assert_eq!(definition.regions, vec!["us-east-1", "us-west-2"]);
        assert!(definition.keeps_dimension("InstanceId"));

        let spec = &definition.specs[0];
        assert_eq!(spec.name, "CPUUtilization");
        assert_eq!(spec.unit.as_deref(), Some("Percent"));
        assert_eq!(spec.statistic, "Maximum");
        assert_eq!(spec.exported_name, "ec2_cpu");
        assert!(spec.include_timestamp);
        assert_eq!(spec.custom_labels.get("team").map(String::as_str), Some("infra"));
    }

    #[test]
    fn test_defaults_apply() {
        let config = parse(
            r#"
exporter:
  metrics:
    - namespace: AWS/EC2
      specs:
        - name: CPUUtilization
    - namespace: AWS/RDS
"#,
        )
        .unwrap();

        assert_eq!(config.definitions.len(), 2);
        assert!(config.default_regions.is_empty());

        let definition = &config.definitions[0];
        assert_eq!(definition.period_seconds, 60);
        assert_eq!(definition.delay_seconds, 600);
        assert!(definition.dimension_filter.is_empty());
        assert!(definition.collapses_series());

        let spec = &definition.specs[0];
        assert!(!spec.include_timestamp);
        assert_eq!(spec.statistic, "Average");
        assert_eq!(spec.unit, None);
        assert_eq!(spec.exported_name, "aws_ec2_cpuutilization");
        assert!(spec.custom_labels.is_empty());

        assert!(config.definitions[1].specs.is_empty());
    }

    #[test]
    fn test_wrong_field_types_fall_back() {
        let config = parse(
            r#"
exporter:
  regions: us-east-1
  metrics:
    - namespace: AWS/EC2
      period: "five minutes"
      delay: [1, 2]
      regions: [us-east-1, 42, us-east-1]
      dimensions: {InstanceId: true}
      specs:
        - name: CPUUtilization
          timestamp: "yes"
          customLabels:
            team: infra
            7: seven
            env: [prod]
"#,
        )
        .unwrap();

        assert!(config.default_regions.is_empty());
        let definition = &config.definitions[0];
        assert_eq!(definition.period_seconds, 60);
        assert_eq!(definition.delay_seconds, 600);
        assert_eq!(definition.regions, vec!["us-east-1"]);
        assert!(definition.dimension_filter.is_empty());

        let spec = &definition.specs[0];
        assert!(!spec.include_timestamp);
        assert_eq!(spec.custom_labels.len(), 1);
        assert_eq!(spec.custom_labels["team"], "infra");
    }

    #[test]
    fn test_out_of_range_timing_falls_back() {
        let config = parse(
            r#"
exporter:
  metrics:
    - namespace: AWS/EC2
      period: 0
      delay: -5
    - namespace: AWS/EC2
      period: 30
      delay: 0
"#,
        )
        .unwrap();

        assert_eq!(config.definitions[0].period_seconds, 60);
        assert_eq!(config.definitions[0].delay_seconds, 600);
        assert_eq!(config.definitions[1].period_seconds, 30);
        assert_eq!(config.definitions[1].delay_seconds, 0);
    }

    #[test]
    fn test_invalid_specs_are_skipped() {
        let config = parse(
            r#"
exporter:
  metrics:
    - namespace: AWS/EC2
      specs:
        - just-a-string
        - unit: Percent
        - name: NetworkIn
"#,
        )
        .unwrap();

        let specs = &config.definitions[0].specs;
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].name, "NetworkIn");
    }

    #[test]
    fn test_missing_exporter_section() {
        let result = parse("other: {}");
        assert!(matches!(result, Err(ConfigError::Missing)));
    }

    #[test]
    fn test_exporter_not_a_map() {
        let result = parse("exporter: [1, 2]");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_metrics_not_a_list() {
        let result = parse("exporter:\n  metrics: AWS/EC2\n");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_metric_entry_not_a_map() {
        let result = parse(
            r#"
exporter:
  metrics:
    - namespace: AWS/EC2
    - AWS/RDS
"#,
        );
        match result {
            Err(ConfigError::Invalid(message)) => assert!(message.contains("metrics[1]")),
            other => panic!("expected invalid config, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_metrics() {
        let config = parse("exporter:\n  regions: [us-east-1]\n").unwrap();
        assert!(config.definitions.is_empty());
        assert_eq!(config.default_regions, vec!["us-east-1"]);
    }
}
