//! Configuration loading, parsing, and reload triggers.

mod loader;
mod parser;
mod types;
mod watcher;

pub use loader::{default_config_path, load_configuration, load_document, ConfigError};
pub use parser::{parse_configuration, parse_exporter_section, EXPORTER_KEY};
pub use types::*;
pub use watcher::ReloadWatcher;
