//! Collector Layer
//!
//! Query collectors refresh on a wall-clock aligned schedule and cache the
//! decoded batch; scrapes read the cache and never wait on a query.
//!
//! # Architecture
//!
//! - [`decode`]: row → [`Metric`] by column naming convention
//! - [`QueryRunner`]: renders, executes and drains one query run
//! - [`QueryCollector`]: cached batch plus lazily fixed [`Descriptor`];
//!   also a `prometheus` collector emitting the cached batch
//! - [`CollectorSet`]: the collectors registered with a `prometheus::Registry`
//! - [`Scheduler`]: drives [`Collector::update`] on aligned ticks
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use query_exporter::{Collector, QueryCollector, QueryConfig, Scheduler, SqlSource};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let source = Arc::new(SqlSource::connect("sqlite:warehouse.db", 4).await?);
//! let config = QueryConfig::new("bq_ndt_tests", "SELECT server AS label_server, COUNT(*) AS value FROM tests GROUP BY server");
//! let collector = Arc::new(QueryCollector::new(config, source)?);
//!
//! let mut scheduler = Scheduler::new(collector.schedule());
//! scheduler.register(collector.clone());
//! let handle = scheduler.spawn();
//! # handle.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod decode;
mod query;
pub mod runner;
mod scheduler;
mod set;
mod traits;

pub use decode::{Metric, decode};
pub use query::{
    CollectorStatus, DEFAULT_HELP, DEFAULT_INTERVAL, Descriptor, QueryCollector, QueryConfig,
    Sample, SeriesState, ValueType,
};
pub use runner::{QueryError, QueryRunner};
pub use scheduler::{
    DEFAULT_SHUTDOWN_TIMEOUT, MIN_INTERVAL, Schedule, Scheduler, SchedulerHandle, next_tick,
    refresh_all,
};
pub use set::CollectorSet;
pub use traits::{Collector, CollectorError, Refresh};
