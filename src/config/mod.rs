//! Configuration module for the query exporter.
//!
//! Provides YAML-based configuration loading and validation for:
//! - Server settings (port, bind address)
//! - Data source settings (URL, pool size)
//! - Query collectors, inline or from an include directory

mod app;
mod collector;
mod validation;

pub use app::{AppConfig, DEFAULT_PORT, ServerConfig, SourceConfig};
pub use collector::CollectorsConfig;
pub use validation::{ConfigError, expand_env_vars};
