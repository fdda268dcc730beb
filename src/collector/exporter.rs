//! Collection cycle orchestration.

use crate::cloudwatch::{
    CloudWatchApi, Connector, CredentialError, Operation, RegionalClients, Session,
};
use crate::collector::{
    QueryBatch, QueryBatcher, ResultAssembler, Snapshot, SnapshotBuilder, SnapshotCollector,
    WindowResolver,
};
use crate::config::{load_configuration, ConfigError, Configuration, MetricDefinition, MetricSpec};
use crate::metrics::ExporterMetrics;
use crate::util::CycleId;
use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use thiserror::Error;
use tracing::{debug, info, info_span, warn, Instrument};

/// Errors surfaced by [`Exporter::load`] and snapshot encoding.
#[derive(Debug, Error)]
pub enum ExporterError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error("failed to encode snapshot: {0}")]
    Encode(#[from] prometheus::Error),
}

/// Process-wide collection settings.
#[derive(Debug, Clone)]
pub struct ExporterOptions {
    /// Region used when neither the definition nor the configuration names one
    pub default_region: String,
    /// Historical walk duration; zero disables walking
    pub walk_duration: Duration,
}

impl Default for ExporterOptions {
    fn default() -> Self {
        Self {
            default_region: "us-east-1".to_string(),
            walk_duration: Duration::ZERO,
        }
    }
}

/// Configuration and session published together by a successful load.
struct Loaded {
    config: Arc<Configuration>,
    session: Arc<dyn Session>,
}

/// Where a batch is collected from.
struct Target<'a> {
    definition: &'a MetricDefinition,
    spec: &'a MetricSpec,
    client: &'a dyn CloudWatchApi,
}

/// Polls CloudWatch on demand and publishes the result as a snapshot.
///
/// Loads and cycles may run concurrently: each cycle reads the loaded state
/// once, builds a fresh snapshot, and swaps it in when done.
pub struct Exporter {
    config_path: PathBuf,
    options: ExporterOptions,
    connector: Arc<dyn Connector>,
    loaded: ArcSwapOption<Loaded>,
    window: Mutex<WindowResolver>,
    /// Sequence of the cycle whose snapshot is currently published
    published: Mutex<Option<u64>>,
    snapshot: SnapshotCollector,
    telemetry: ExporterMetrics,
}

impl Exporter {
    pub fn new(
        config_path: impl Into<PathBuf>,
        options: ExporterOptions,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let window = WindowResolver::new(options.walk_duration);
        let telemetry = ExporterMetrics::new();
        telemetry.set_walk_active(window.is_walking());

        Self {
            config_path: config_path.into(),
            options,
            connector,
            loaded: ArcSwapOption::empty(),
            window: Mutex::new(window),
            published: Mutex::new(None),
            snapshot: SnapshotCollector::new(),
            telemetry,
        }
    }

    /// (Re)build the session and the configuration.
    ///
    /// On failure the previously loaded state stays in force.
    pub async fn load(&self) -> Result<(), ExporterError> {
        let result = self.try_load().await;
        self.telemetry.record_load(result.is_ok());
        result
    }

    async fn try_load(&self) -> Result<(), ExporterError> {
        let session = self.connector.connect().await?;
        let config = load_configuration(&self.config_path)?;

        info!(
            path = %self.config_path.display(),
            definitions = config.definitions.len(),
            specs = config.spec_count(),
            "cloudwatch exporter loaded"
        );

        self.loaded.store(Some(Arc::new(Loaded {
            config: Arc::new(config),
            session,
        })));
        Ok(())
    }

    /// Run one collection cycle and publish its snapshot.
    ///
    /// Remote failures are logged and skipped; whatever was collected is
    /// still published.
    pub async fn update_cache(&self) {
        let cycle = CycleId::new();
        let span = info_span!("collect", cycle = %cycle, sequence = cycle.sequence());
        self.run_cycle(cycle.sequence()).instrument(span).await;
    }

    async fn run_cycle(&self, sequence: u64) {
        let Some(loaded) = self.loaded.load_full() else {
            warn!("collection requested before configuration was loaded");
            return;
        };

        let started = Instant::now();
        let config = &loaded.config;
        let mut clients = RegionalClients::new(Arc::clone(&loaded.session));
        let mut builder = SnapshotBuilder::new();

        for (d, definition) in config.definitions.iter().enumerate() {
            let regions = config.regions_for(definition, &self.options.default_region);
            for (s, spec) in definition.specs.iter().enumerate() {
                for (r, region) in regions.iter().enumerate() {
                    let client = clients.get(region);
                    let target = Target {
                        definition,
                        spec,
                        client: client.as_ref(),
                    };
                    let prefix = format!("cw_{}_{}_{}", d, s, r);
                    self.collect_target(&target, prefix, &mut builder).await;
                }
            }
        }
        clients.reset();

        let samples = builder.len();
        if !self.publish(sequence, builder.build()) {
            warn!(samples, "a later cycle already published, discarding stale snapshot");
        }
        self.telemetry.record_cycle(started.elapsed(), samples);

        info!(
            samples,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "collection cycle complete"
        );
    }

    /// Publish the snapshot of cycle `sequence` unless a later cycle already has.
    fn publish(&self, sequence: u64, snapshot: Snapshot) -> bool {
        let mut published = self.published.lock();
        if published.is_some_and(|latest| latest > sequence) {
            return false;
        }
        *published = Some(sequence);
        self.snapshot.publish(snapshot);
        true
    }

    /// List every series of one spec in one region and resolve it in batches.
    async fn collect_target(&self, target: &Target<'_>, prefix: String, builder: &mut SnapshotBuilder) {
        let client = target.client;
        let region = client.region();
        let mut batcher = QueryBatcher::new(target.definition, target.spec, prefix);
        let mut next_token: Option<String> = None;

        loop {
            let page = match client
                .list_metrics(&target.definition.namespace, &target.spec.name, next_token.take())
                .await
            {
                Ok(page) => {
                    self.telemetry.record_api_call(Operation::ListMetrics, region, true);
                    page
                }
                Err(e) => {
                    self.telemetry.record_api_call(Operation::ListMetrics, region, false);
                    warn!(error = %e, namespace = %target.definition.namespace, metric = %target.spec.name, "listing metrics failed");
                    break;
                }
            };

            for series in &page.series {
                if let Some(batch) = batcher.push(series) {
                    if !self.resolve_batch(target, &batch, builder).await {
                        return;
                    }
                }
            }

            match page.next_token.filter(|t| !t.is_empty()) {
                Some(token) => next_token = Some(token),
                None => break,
            }
        }

        debug!(
            region = %region,
            metric = %target.spec.name,
            series = batcher.pushed(),
            "listing complete"
        );

        if let Some(batch) = batcher.finish() {
            self.resolve_batch(target, &batch, builder).await;
        }
    }

    /// Fetch one batch and add its samples. Returns false if the batch failed,
    /// in which case it contributes nothing.
    async fn resolve_batch(&self, target: &Target<'_>, batch: &QueryBatch, builder: &mut SnapshotBuilder) -> bool {
        let client = target.client;
        let region = client.region();
        let definition = target.definition;

        let window = {
            let mut resolver = self.window.lock();
            let window = resolver.resolve(definition.period(), definition.delay(), SystemTime::now());
            self.telemetry.set_walk_active(resolver.is_walking());
            window
        };

        let mut assembler = ResultAssembler::new(target.spec, batch);
        let mut next_token: Option<String> = None;

        loop {
            match client
                .get_metric_data(batch.queries(), window.start, window.end, next_token.take())
                .await
            {
                Ok(page) => {
                    self.telemetry.record_api_call(Operation::GetMetricData, region, true);
                    assembler.absorb(page.results);
                    match page.next_token.filter(|t| !t.is_empty()) {
                        Some(token) => next_token = Some(token),
                        None => break,
                    }
                }
                Err(e) => {
                    self.telemetry.record_api_call(Operation::GetMetricData, region, false);
                    warn!(error = %e, queries = batch.len(), metric = %target.spec.name, "fetching metric data failed, dropping batch");
                    return false;
                }
            }
        }

        let samples = assembler.finish();
        debug!(region = %region, queries = batch.len(), samples = samples.len(), "batch resolved");
        for sample in samples {
            builder.add(sample);
        }
        true
    }

    /// The configuration currently in force, if any was loaded.
    pub fn configuration(&self) -> Option<Arc<Configuration>> {
        self.loaded.load_full().map(|l| Arc::clone(&l.config))
    }

    /// The snapshot currently visible to scrapers.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.load()
    }

    pub fn collector(&self) -> &SnapshotCollector {
        &self.snapshot
    }

    /// Encode the current snapshot in the Prometheus text format.
    pub fn encode_snapshot(&self) -> Result<Vec<u8>, ExporterError> {
        Ok(self.snapshot.encode()?)
    }

    pub fn telemetry(&self) -> &ExporterMetrics {
        &self.telemetry
    }

    /// Whether the historical walk is still in progress.
    pub fn is_walking(&self) -> bool {
        self.window.lock().is_walking()
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }
}
