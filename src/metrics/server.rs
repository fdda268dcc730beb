//! Exporter HTTP server.
//!
//! Serves the CloudWatch snapshot, the exporter's own telemetry and the
//! reload endpoint.

use crate::collector::Exporter;
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::{TokioIo, TokioTimer};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Prometheus text exposition format.
const TEXT_FORMAT: &str = "text/plain; version=0.0.4; charset=utf-8";

/// OpenMetrics text format, as produced by prometheus-client.
const OPENMETRICS_FORMAT: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

const PLAIN_FORMAT: &str = "text/plain; charset=utf-8";

/// Path that triggers a configuration reload.
const RELOAD_PATH: &str = "/reload";

/// HTTP server settings.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Path serving the CloudWatch snapshot.
    pub metrics_path: String,
    /// Path serving exporter telemetry.
    pub telemetry_path: String,
    /// Time allowed for a client to send request headers.
    pub read_header_timeout: Duration,
    /// Time allowed for open connections to finish on shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            metrics_path: "/metrics".to_string(),
            telemetry_path: "/exporter/metrics".to_string(),
            read_header_timeout: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(1),
        }
    }
}

/// What a request resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Metrics,
    Telemetry,
    Reload,
    Health,
    Index,
    MethodNotAllowed,
    NotFound,
}

impl Route {
    fn resolve(method: &Method, path: &str, options: &ServerOptions) -> Self {
        let get = method == Method::GET;

        if path == options.metrics_path {
            if get { Route::Metrics } else { Route::MethodNotAllowed }
        } else if path == options.telemetry_path {
            if get { Route::Telemetry } else { Route::MethodNotAllowed }
        } else if path == RELOAD_PATH {
            if get || method == Method::POST {
                Route::Reload
            } else {
                Route::MethodNotAllowed
            }
        } else if path == "/health" || path == "/healthz" {
            Route::Health
        } else if path == "/" && get {
            Route::Index
        } else {
            Route::NotFound
        }
    }
}

/// Exporter HTTP server.
pub struct MetricsServer {
    /// Bound listener.
    listener: TcpListener,
    /// Server settings.
    options: Arc<ServerOptions>,
    /// Exporter answering scrapes.
    exporter: Arc<Exporter>,
}

impl MetricsServer {
    /// Bind the server to `address`.
    pub async fn bind(
        address: SocketAddr,
        options: ServerOptions,
        exporter: Arc<Exporter>,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(address).await?;

        info!(
            address = %listener.local_addr()?,
            metrics_path = %options.metrics_path,
            telemetry_path = %options.telemetry_path,
            "metrics server bound"
        );

        Ok(Self {
            listener,
            options: Arc::new(options),
            exporter,
        })
    }

    /// Address the server is listening on.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve connections until shutdown, then drain them.
    ///
    /// Connections still open after the shutdown timeout are aborted.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!("metrics server starting");

        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, addr)) => {
                            debug!(client = %addr, "connection accepted");
                            connections.spawn(serve_connection(
                                stream,
                                Arc::clone(&self.options),
                                Arc::clone(&self.exporter),
                                shutdown.resubscribe(),
                            ));
                        }
                        Err(e) => {
                            error!(error = %e, "failed to accept metrics connection");
                        }
                    }
                }

                // Reap finished connections.
                Some(_) = connections.join_next(), if !connections.is_empty() => {}

                _ = shutdown.recv() => {
                    info!(open = connections.len(), "metrics server shutting down");
                    break;
                }
            }
        }

        let drain = async { while connections.join_next().await.is_some() {} };
        if tokio::time::timeout(self.options.shutdown_timeout, drain)
            .await
            .is_err()
        {
            warn!(
                remaining = connections.len(),
                "shutdown timeout elapsed, aborting connections"
            );
            connections.abort_all();
        }

        info!("metrics server stopped");
    }
}

/// Serve one connection, finishing the in-flight request on shutdown.
async fn serve_connection(
    stream: TcpStream,
    options: Arc<ServerOptions>,
    exporter: Arc<Exporter>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let read_header_timeout = options.read_header_timeout;
    let io = TokioIo::new(stream);
    let service = service_fn(move |req| {
        let options = Arc::clone(&options);
        let exporter = Arc::clone(&exporter);
        async move { handle_request(req, &options, &exporter).await }
    });

    let mut builder = http1::Builder::new();
    builder
        .timer(TokioTimer::new())
        .header_read_timeout(read_header_timeout);
    let conn = builder.serve_connection(io, service);
    tokio::pin!(conn);

    tokio::select! {
        result = conn.as_mut() => {
            if let Err(e) = result {
                debug!(error = %e, "metrics connection error");
            }
        }
        _ = shutdown.recv() => {
            conn.as_mut().graceful_shutdown();
            if let Err(e) = conn.as_mut().await {
                debug!(error = %e, "metrics connection error during shutdown");
            }
        }
    }
}

/// Handle an incoming request.
async fn handle_request<B>(
    req: Request<B>,
    options: &ServerOptions,
    exporter: &Exporter,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let route = {
        let path = req.uri().path();
        let method = req.method();
        debug!(path = %path, method = %method, "metrics request");
        Route::resolve(method, path, options)
    };
    drop(req);

    let response = match route {
        Route::Metrics => {
            exporter.telemetry().record_scrape();
            exporter.update_cache().await;
            match exporter.encode_snapshot() {
                Ok(body) => respond(StatusCode::OK, TEXT_FORMAT, body),
                Err(e) => {
                    error!(error = %e, "failed to encode snapshot");
                    respond(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        PLAIN_FORMAT,
                        "Failed to encode metrics\n",
                    )
                }
            }
        }
        Route::Telemetry => match exporter.telemetry().encode() {
            Ok(body) => respond(StatusCode::OK, OPENMETRICS_FORMAT, body),
            Err(e) => {
                error!(error = %e, "failed to encode telemetry");
                respond(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    PLAIN_FORMAT,
                    "Failed to encode telemetry\n",
                )
            }
        },
        Route::Reload => match exporter.load().await {
            Ok(()) => {
                info!("configuration reloaded on request");
                respond(StatusCode::OK, PLAIN_FORMAT, "Configuration reloaded\n")
            }
            Err(e) => {
                error!(error = %e, "reload failed, keeping current configuration");
                respond(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    PLAIN_FORMAT,
                    format!("Reload failed: {}\n", e),
                )
            }
        },
        Route::Health => respond(StatusCode::OK, PLAIN_FORMAT, "OK\n"),
        Route::Index => {
            let body = format!(
                "cwexporter\n\nEndpoints:\n  {} - CloudWatch metrics\n  {} - Exporter telemetry\n  {} - Reload configuration\n  /health - Health check\n",
                options.metrics_path, options.telemetry_path, RELOAD_PATH
            );
            respond(StatusCode::OK, PLAIN_FORMAT, body)
        }
        Route::MethodNotAllowed => {
            respond(StatusCode::METHOD_NOT_ALLOWED, PLAIN_FORMAT, "Method not allowed\n")
        }
        Route::NotFound => respond(StatusCode::NOT_FOUND, PLAIN_FORMAT, "Not found\n"),
    };

    Ok(response)
}

fn respond(
    status: StatusCode,
    content_type: &'static str,
    body: impl Into<Bytes>,
) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}
