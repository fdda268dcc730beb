//! cwexporter - Prometheus exporter for Amazon CloudWatch
//!
//! Usage:
//!     cwexporter --config <path>
//!
//! See --help for more options.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use cwexporter::cloudwatch::{AwsConnector, AwsSettings};
use cwexporter::collector::{Exporter, ExporterOptions};
use cwexporter::config::{default_config_path, load_configuration, ReloadWatcher};
use cwexporter::metrics::{MetricsServer, ServerOptions};
use cwexporter::util::{init_logging, LogFormat, ShutdownSignal};

/// Exports Amazon CloudWatch metrics in the Prometheus format.
#[derive(Parser, Debug)]
#[command(name = "cwexporter")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the metric configuration file
    /// [default: $HOME/.prometheus-cloudwatch-exporter.yaml]
    #[arg(short, long, value_name = "FILE", env = "CWEXPORTER_CONFIG")]
    config: Option<PathBuf>,

    /// Address to serve metrics on
    #[arg(long, env = "CWEXPORTER_METRICS_ADDRESS", default_value = "0.0.0.0:9016")]
    metrics_address: SocketAddr,

    /// Path serving CloudWatch metrics
    #[arg(long, env = "CWEXPORTER_METRICS_PATH", default_value = "/metrics")]
    metrics_path: String,

    /// Path serving the exporter's own telemetry
    #[arg(long, env = "CWEXPORTER_TELEMETRY_PATH", default_value = "/exporter/metrics")]
    telemetry_path: String,

    /// Time allowed for clients to send request headers
    #[arg(
        long,
        env = "CWEXPORTER_METRICS_READ_HEADER_TIMEOUT",
        default_value = "1s",
        value_parser = humantime::parse_duration
    )]
    metrics_read_header_timeout: Duration,

    /// Time allowed for open connections to finish on shutdown
    #[arg(
        long,
        env = "CWEXPORTER_METRICS_SHUTDOWN_TIMEOUT",
        default_value = "1s",
        value_parser = humantime::parse_duration
    )]
    metrics_shutdown_timeout: Duration,

    /// Region used when the configuration names none
    #[arg(long, env = "AWS_REGION", default_value = "us-east-1")]
    aws_region: String,

    /// Static access key id
    #[arg(long, env = "AWS_ACCESS_KEY_ID")]
    aws_access_key_id: Option<String>,

    /// Static secret access key
    #[arg(long, env = "AWS_SECRET_ACCESS_KEY", hide_env_values = true)]
    aws_secret_access_key: Option<String>,

    /// Session token for temporary credentials
    #[arg(long, env = "AWS_SESSION_TOKEN", hide_env_values = true)]
    aws_session_token: Option<String>,

    /// How far back to walk historical data (0 disables walking)
    #[arg(
        long,
        env = "CWEXPORTER_AWS_WALK_SCRAPE",
        default_value = "0s",
        value_parser = humantime::parse_duration
    )]
    aws_walk_scrape: Duration,

    /// Maximum retries per CloudWatch call (-1 keeps the SDK default)
    #[arg(
        long,
        env = "CWEXPORTER_AWS_MAX_RETRIES",
        default_value_t = -1,
        allow_negative_numbers = true
    )]
    aws_max_retries: i32,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL", env = "CWEXPORTER_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, value_enum, env = "CWEXPORTER_LOG_FORMAT", default_value_t = LogFormat::Json)]
    log_format: LogFormat,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level, cli.log_format);

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);

    // If --validate flag, just validate and exit
    if cli.validate {
        let config = load_configuration(&config_path).with_context(|| {
            format!(
                "failed to load configuration from '{}'",
                config_path.display()
            )
        })?;

        info!("Configuration is valid");
        println!("Configuration is valid.");
        println!("  Definitions: {}", config.definitions.len());
        println!("  Metrics: {}", config.spec_count());
        for definition in &config.definitions {
            let regions = config.regions_for(definition, &cli.aws_region);
            println!(
                "    - {} ({} metrics) period={}s delay={}s regions={:?}",
                definition.namespace,
                definition.specs.len(),
                definition.period_seconds,
                definition.delay_seconds,
                regions
            );
        }
        return Ok(());
    }

    info!(
        config_path = %config_path.display(),
        metrics_address = %cli.metrics_address,
        region = %cli.aws_region,
        walk = %humantime::format_duration(cli.aws_walk_scrape),
        "cwexporter starting"
    );

    run(cli, config_path)
}

/// Run the exporter until SIGINT or SIGTERM.
fn run(cli: Cli, config_path: PathBuf) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    runtime.block_on(async { run_async(cli, config_path).await })
}

/// Async entry point for the exporter.
async fn run_async(cli: Cli, config_path: PathBuf) -> Result<()> {
    let shutdown = ShutdownSignal::new();

    let connector = AwsConnector::new(AwsSettings {
        region: cli.aws_region.clone(),
        access_key_id: cli.aws_access_key_id,
        secret_access_key: cli.aws_secret_access_key,
        session_token: cli.aws_session_token,
        max_retries: cli.aws_max_retries,
    });

    let exporter = Arc::new(Exporter::new(
        &config_path,
        ExporterOptions {
            default_region: cli.aws_region,
            walk_duration: cli.aws_walk_scrape,
        },
        Arc::new(connector),
    ));

    exporter.load().await.with_context(|| {
        format!(
            "failed to load exporter from '{}'",
            config_path.display()
        )
    })?;

    let server = MetricsServer::bind(
        cli.metrics_address,
        ServerOptions {
            metrics_path: cli.metrics_path,
            telemetry_path: cli.telemetry_path,
            read_header_timeout: cli.metrics_read_header_timeout,
            shutdown_timeout: cli.metrics_shutdown_timeout,
        },
        Arc::clone(&exporter),
    )
    .await
    .with_context(|| format!("failed to bind metrics server on {}", cli.metrics_address))?;

    let mut handles = Vec::new();

    let server_shutdown = shutdown.subscribe();
    handles.push(tokio::spawn(async move {
        server.run(server_shutdown).await;
    }));

    let watcher = ReloadWatcher::new(Arc::clone(&exporter));
    let watcher_shutdown = shutdown.subscribe();
    handles.push(tokio::spawn(async move {
        watcher.run(watcher_shutdown).await;
    }));

    info!("cwexporter is running");
    info!("press Ctrl+C to stop");

    shutdown.wait_for_termination().await;

    for handle in handles {
        let _ = handle.await;
    }

    info!("cwexporter shut down complete");
    Ok(())
}
