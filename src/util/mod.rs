//! Utility functions and helpers.

mod cycle_id;
mod logging;
mod names;
mod shutdown;

pub use cycle_id::CycleId;
pub use logging::{init_logging, LogFormat};
pub use names::{derive_metric_name, is_valid_metric_name, sanitize_label_name};
pub use shutdown::ShutdownSignal;
