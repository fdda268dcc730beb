//! cwexporter - a Prometheus exporter for Amazon CloudWatch
//!
//! This crate provides:
//! - A YAML metric configuration with lenient field handling
//! - Batched, paginated CloudWatch polling across regions
//! - An optional historical walk over past time windows
//! - Prometheus exposition of the latest snapshot
//! - Hot configuration reload and exporter self-telemetry

pub mod cloudwatch;
pub mod collector;
pub mod config;
pub mod metrics;
pub mod util;

pub use collector::Exporter;
pub use config::Configuration;
