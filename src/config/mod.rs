//! Pipeline configuration
//!
//! Provides types and parsing for `forge.toml` project configuration.

pub mod loader;
pub mod schema;

pub use loader::{find_config, find_config_from, load_config, ConfigError, CONFIG_FILE};
pub use schema::*;
