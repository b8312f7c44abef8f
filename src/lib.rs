//! Query Exporter
//!
//! Runs analytical queries on a wall-clock aligned schedule and exports their
//! results as Prometheus metrics. It can be used as a library by other Rust
//! projects, or run as a standalone binary with the `query-exporter`
//! executable.
//!
//! # Architecture
//!
//! - **Source**: executes query text, streams dynamically typed rows
//! - **Collector**: decodes `label_*`/`value` rows into a cached batch with a
//!   descriptor fixed by the first non-empty result
//! - **Scheduler**: refreshes collectors on aligned ticks
//! - **Server**: `/metrics` scrape endpoint encoding a `prometheus::Registry`
//!   that holds the collectors
//!
//! Scrapes never run queries; they read whatever the last successful refresh
//! left behind.

pub mod collector;
pub mod config;
pub mod server;
pub mod source;

pub use collector::{
    Collector, CollectorError, CollectorSet, Descriptor, Metric, QueryCollector, QueryConfig,
    QueryError, Refresh, Schedule, Scheduler, SchedulerHandle, ValueType,
};
pub use config::{AppConfig, ConfigError};
pub use source::{DataSource, DataSourceError, Dialect, QueryRequest, Row, Scalar, SqlSource};
