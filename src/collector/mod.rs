//! Metric collection pipeline.
//!
//! Series discovered by `ListMetrics` are grouped into batches, each batch is
//! fetched over its time window, and the results become samples in a fresh
//! snapshot.

mod assembler;
mod batcher;
mod exporter;
mod snapshot;
mod window;

pub use assembler::{assemble, ResultAssembler};
pub use batcher::{batch_series, QueryBatch, QueryBatcher};
pub use exporter::{Exporter, ExporterError, ExporterOptions};
pub use snapshot::{Sample, Snapshot, SnapshotBuilder, SnapshotCollector};
pub use window::{TimeWindow, WindowResolver};
