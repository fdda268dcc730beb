//! CloudWatch access.
//!
//! The collection pipeline only talks to CloudWatch through [`CloudWatchApi`];
//! a [`Session`] hands out one client per region and a [`Connector`] builds
//! the session from credentials.

#[cfg(feature = "aws")]
mod aws;
mod clients;

#[cfg(feature = "aws")]
pub use aws::{AwsConnector, AwsSettings};
pub use clients::RegionalClients;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::SystemTime;
use thiserror::Error;

/// Maximum number of queries accepted by one `GetMetricData` call.
pub const MAX_QUERIES_PER_REQUEST: usize = 500;

/// A named dimension value of a series.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Dimension {
    pub name: String,
    pub value: String,
}

impl Dimension {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A series discovered by `ListMetrics`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Series {
    pub dimensions: Vec<Dimension>,
}

/// One page of `ListMetrics` output.
#[derive(Debug, Clone, Default)]
pub struct SeriesPage {
    pub series: Vec<Series>,
    pub next_token: Option<String>,
}

/// One entry of a `GetMetricData` request.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricQuery {
    /// Identifier unique within the request
    pub id: String,
    /// Exported metric name, echoed back as the result label
    pub label: String,
    pub namespace: String,
    pub metric_name: String,
    pub statistic: String,
    pub unit: Option<String>,
    pub period_seconds: u32,
    /// Dimensions kept by the definition's filter
    pub dimensions: Vec<Dimension>,
}

/// Values returned for one query, most recent first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataResult {
    pub id: String,
    pub values: Vec<f64>,
    pub timestamps: Vec<SystemTime>,
}

/// One page of `GetMetricData` output.
#[derive(Debug, Clone, Default)]
pub struct DataPage {
    pub results: Vec<DataResult>,
    pub next_token: Option<String>,
}

/// Remote operations issued by the collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ListMetrics,
    GetMetricData,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::ListMetrics => write!(f, "ListMetrics"),
            Operation::GetMetricData => write!(f, "GetMetricData"),
        }
    }
}

/// A failed remote call.
#[derive(Debug, Error)]
#[error("{operation} in {region} failed: {message}")]
pub struct ApiError {
    pub operation: Operation,
    pub region: String,
    pub message: String,
}

impl ApiError {
    pub fn new(operation: Operation, region: &str, message: impl std::fmt::Display) -> Self {
        Self {
            operation,
            region: region.to_string(),
            message: message.to_string(),
        }
    }
}

/// The session or its credentials could not be established.
#[derive(Debug, Error)]
#[error("failed to establish CloudWatch session: {0}")]
pub struct CredentialError(pub String);

/// Client for the CloudWatch API of a single region.
#[async_trait]
pub trait CloudWatchApi: Send + Sync {
    /// Region this client talks to.
    fn region(&self) -> &str;

    /// List the series of `namespace`/`metric_name`, one page at a time.
    async fn list_metrics(
        &self,
        namespace: &str,
        metric_name: &str,
        next_token: Option<String>,
    ) -> Result<SeriesPage, ApiError>;

    /// Fetch data for up to [`MAX_QUERIES_PER_REQUEST`] queries over `[start, end)`,
    /// scanning most recent first.
    async fn get_metric_data(
        &self,
        queries: &[MetricQuery],
        start: SystemTime,
        end: SystemTime,
        next_token: Option<String>,
    ) -> Result<DataPage, ApiError>;
}

/// Shared credentials from which regional clients are built.
///
/// Building a client must not perform network I/O.
pub trait Session: Send + Sync {
    fn client(&self, region: &str) -> Arc<dyn CloudWatchApi>;
}

/// Establishes a [`Session`]; called on every configuration load.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn Session>, CredentialError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_display() {
        let err = ApiError::new(Operation::GetMetricData, "eu-west-1", "throttled");
        assert_eq!(err.to_string(), "GetMetricData in eu-west-1 failed: throttled");
    }

    #[test]
    fn test_credential_error_display() {
        let err = CredentialError("no credentials".to_string());
        assert!(err.to_string().contains("no credentials"));
    }
}
