//! Exporter telemetry and HTTP exposition.

mod server;
mod telemetry;

pub use server::{MetricsServer, ServerOptions};
pub use telemetry::{ApiCallLabels, ApiOperation, ExporterMetrics, LoadLabels, Outcome};
