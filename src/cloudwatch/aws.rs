//! CloudWatch client backed by the AWS SDK.

use crate::cloudwatch::{
    ApiError, CloudWatchApi, Connector, CredentialError, DataPage, DataResult, Dimension,
    MetricQuery, Operation, Series, SeriesPage, Session,
};
use async_trait::async_trait;
use aws_config::retry::RetryConfig;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_cloudwatch::config::Credentials;
use aws_sdk_cloudwatch::error::DisplayErrorContext;
use aws_sdk_cloudwatch::primitives::DateTime;
use aws_sdk_cloudwatch::types;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

/// Credentials and SDK behavior used to build the session.
#[derive(Debug, Clone, Default)]
pub struct AwsSettings {
    /// Region of the shared session
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    /// Retries per call; negative keeps the SDK default
    pub max_retries: i32,
}

/// Builds sessions from static credentials, or from the SDK's default
/// provider chain when none are configured.
pub struct AwsConnector {
    settings: AwsSettings,
}

impl AwsConnector {
    pub fn new(settings: AwsSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl Connector for AwsConnector {
    async fn connect(&self) -> Result<Arc<dyn Session>, CredentialError> {
        let settings = &self.settings;
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()));

        match (&settings.access_key_id, &settings.secret_access_key) {
            (Some(id), Some(secret)) => {
                loader = loader.credentials_provider(Credentials::new(
                    id.clone(),
                    secret.clone(),
                    settings.session_token.clone(),
                    None,
                    "cwexporter",
                ));
            }
            (None, None) => {
                debug!("no static credentials configured, using default provider chain");
            }
            _ => {
                return Err(CredentialError(
                    "access key id and secret access key must be set together".to_string(),
                ));
            }
        }

        if settings.max_retries >= 0 {
            let attempts = settings.max_retries as u32 + 1;
            loader = loader.retry_config(RetryConfig::standard().with_max_attempts(attempts));
        }

        let sdk_config = loader.load().await;
        if sdk_config.credentials_provider().is_none() {
            return Err(CredentialError("no credentials provider available".to_string()));
        }

        info!(region = %settings.region, "AWS session established");
        Ok(Arc::new(AwsSession { sdk_config }))
    }
}

struct AwsSession {
    sdk_config: SdkConfig,
}

impl Session for AwsSession {
    fn client(&self, region: &str) -> Arc<dyn CloudWatchApi> {
        let config = aws_sdk_cloudwatch::config::Builder::from(&self.sdk_config)
            .region(Region::new(region.to_string()))
            .build();
        Arc::new(AwsCloudWatch {
            client: aws_sdk_cloudwatch::Client::from_conf(config),
            region: region.to_string(),
        })
    }
}

struct AwsCloudWatch {
    client: aws_sdk_cloudwatch::Client,
    region: String,
}

#[async_trait]
impl CloudWatchApi for AwsCloudWatch {
    fn region(&self) -> &str {
        &self.region
    }

    async fn list_metrics(
        &self,
        namespace: &str,
        metric_name: &str,
        next_token: Option<String>,
    ) -> Result<SeriesPage, ApiError> {
        let output = self
            .client
            .list_metrics()
            .namespace(namespace)
            .metric_name(metric_name)
            .set_next_token(next_token)
            .send()
            .await
            .map_err(|e| ApiError::new(Operation::ListMetrics, &self.region, DisplayErrorContext(&e)))?;

        let series = output
            .metrics()
            .iter()
            .map(|metric| Series {
                dimensions: metric
                    .dimensions()
                    .iter()
                    .map(|d| Dimension::new(d.name().unwrap_or_default(), d.value().unwrap_or_default()))
                    .collect(),
            })
            .collect();

        Ok(SeriesPage {
            series,
            next_token: output.next_token().map(str::to_string),
        })
    }

    async fn get_metric_data(
        &self,
        queries: &[MetricQuery],
        start: SystemTime,
        end: SystemTime,
        next_token: Option<String>,
    ) -> Result<DataPage, ApiError> {
        let queries = queries
            .iter()
            .map(to_sdk_query)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ApiError::new(Operation::GetMetricData, &self.region, e))?;

        let output = self
            .client
            .get_metric_data()
            .set_metric_data_queries(Some(queries))
            .start_time(DateTime::from(start))
            .end_time(DateTime::from(end))
            .scan_by(types::ScanBy::TimestampDescending)
            .set_next_token(next_token)
            .send()
            .await
            .map_err(|e| ApiError::new(Operation::GetMetricData, &self.region, DisplayErrorContext(&e)))?;

        let results = output
            .metric_data_results()
            .iter()
            .filter_map(|result| {
                let id = result.id()?;
                Some(DataResult {
                    id: id.to_string(),
                    values: result.values().to_vec(),
                    timestamps: result.timestamps().iter().map(to_system_time).collect(),
                })
            })
            .collect();

        Ok(DataPage {
            results,
            next_token: output.next_token().map(str::to_string),
        })
    }
}

fn to_sdk_query(query: &MetricQuery) -> Result<types::MetricDataQuery, aws_sdk_cloudwatch::error::BuildError> {
    let dimensions = query
        .dimensions
        .iter()
        .map(|d| types::Dimension::builder().name(&d.name).value(&d.value).build())
        .collect::<Vec<_>>();

    let metric = types::Metric::builder()
        .namespace(&query.namespace)
        .metric_name(&query.metric_name)
        .set_dimensions(Some(dimensions))
        .build();

    let mut stat = types::MetricStat::builder()
        .metric(metric)
        .period(query.period_seconds as i32)
        .stat(&query.statistic);
    if let Some(unit) = &query.unit {
        stat = stat.unit(types::StandardUnit::from(unit.as_str()));
    }

    Ok(types::MetricDataQuery::builder()
        .id(&query.id)
        .label(&query.label)
        .metric_stat(stat.build())
        .return_data(true)
        .build())
}

fn to_system_time(timestamp: &DateTime) -> SystemTime {
    if timestamp.secs() < 0 {
        return UNIX_EPOCH;
    }
    UNIX_EPOCH + Duration::new(timestamp.secs() as u64, timestamp.subsec_nanos())
}
