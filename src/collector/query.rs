//! Query-backed metric collector.
//!
//! A [`QueryCollector`] owns one named series: its query, the cached batch
//! from the last successful refresh, and the descriptor fixed by the first
//! non-empty batch. Scrapes read the cache only; they never run the query.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use prometheus::core::Desc;
use prometheus::proto;
use serde::{Deserialize, Serialize};

use crate::collector::decode::Metric;
use crate::collector::runner::{DEFAULT_QUERY_TIMEOUT, QueryRunner};
use crate::collector::{Collector, CollectorError, Refresh, Schedule};
use crate::source::{DataSource, Dialect};

/// Default refresh interval (5 minutes).
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Help text used when the configuration provides none.
pub const DEFAULT_HELP: &str = "Metric exported from a periodic query.";

fn default_enabled() -> bool {
    true
}

fn default_help() -> String {
    DEFAULT_HELP.to_string()
}

fn default_timeout() -> Duration {
    DEFAULT_QUERY_TIMEOUT
}

/// Declared type of the exported samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Counter,
    #[default]
    Gauge,
    Untyped,
}

impl ValueType {
    /// Get the type name as rendered in `# TYPE` lines.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::Gauge => "gauge",
            Self::Untyped => "untyped",
        }
    }
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ValueType> for proto::MetricType {
    fn from(value_type: ValueType) -> Self {
        match value_type {
            ValueType::Counter => proto::MetricType::COUNTER,
            ValueType::Gauge => proto::MetricType::GAUGE,
            ValueType::Untyped => proto::MetricType::UNTYPED,
        }
    }
}

/// Configuration for a query collector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Metric name; unique across all collectors.
    pub name: String,
    /// Declared value type (default: gauge).
    #[serde(rename = "type", default)]
    pub value_type: ValueType,
    /// Help text rendered with the series.
    #[serde(default = "default_help")]
    pub help: String,
    /// Inline query text (mutually exclusive with query_file).
    #[serde(default)]
    pub query: Option<String>,
    /// File holding the query text, relative to the config file.
    #[serde(default)]
    pub query_file: Option<PathBuf>,
    /// Enable this collector (default: true).
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Refresh interval (mutually exclusive with cron).
    #[serde(default, with = "humantime_serde")]
    pub interval: Option<Duration>,
    /// Cron schedule expression (mutually exclusive with interval).
    #[serde(default)]
    pub cron: Option<String>,
    /// Deadline for a single query run (default: 1m).
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    /// Dialect used when the query has no directive line (default: legacy).
    #[serde(default)]
    pub dialect: Dialect,
}

impl QueryConfig {
    /// Create a new query collector configuration.
    pub fn new(name: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value_type: ValueType::default(),
            help: default_help(),
            query: Some(query.into()),
            query_file: None,
            enabled: true,
            interval: Some(DEFAULT_INTERVAL),
            cron: None,
            timeout: DEFAULT_QUERY_TIMEOUT,
            dialect: Dialect::default(),
        }
    }

    /// Get schedule from interval or cron.
    ///
    /// # Errors
    /// Returns `CollectorError::Config` if the cron expression is invalid.
    pub fn schedule(&self) -> Result<Schedule, CollectorError> {
        match self.cron {
            Some(ref expr) => Schedule::cron(expr),
            None => Ok(Schedule::interval(self.interval.unwrap_or(DEFAULT_INTERVAL))),
        }
    }

    pub fn with_value_type(mut self, value_type: ValueType) -> Self {
        self.value_type = value_type;
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = help.into();
        self
    }

    /// Set the refresh interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self.cron = None;
        self
    }

    /// Set the cron schedule.
    pub fn with_cron(mut self, cron: impl Into<String>) -> Self {
        self.cron = Some(cron.into());
        self.interval = None;
        self
    }

    /// Set the per-run query deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    /// Set enabled.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Schema of an exported series, fixed by the first non-empty batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Descriptor {
    pub name: String,
    pub help: String,
    pub value_type: ValueType,
    /// Sorted label names shared by every sample.
    pub labels: Vec<String>,
}

/// Whether a collector has been described yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeriesState {
    /// No non-empty batch seen; the series is absent from scrapes.
    Uninitialized,
    /// Descriptor fixed for the rest of the process lifetime.
    Ready(Descriptor),
}

/// One emitted sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub name: String,
    pub labels: Vec<String>,
    pub values: Vec<String>,
    pub value: f64,
    pub value_type: ValueType,
}

/// Point-in-time view of a collector for the status API.
#[derive(Debug, Clone, Serialize)]
pub struct CollectorStatus {
    pub name: String,
    pub value_type: ValueType,
    pub schedule: String,
    /// `uninitialized` or `ready`.
    pub state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<String>>,
    pub samples: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_success: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Descriptor and batch, always swapped together.
struct Cache {
    state: SeriesState,
    batch: Arc<[Metric]>,
}

#[derive(Default)]
struct RefreshLog {
    last_success: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

/// Collector exporting the rows of one periodic query.
pub struct QueryCollector {
    config: QueryConfig,
    query: String,
    schedule: Schedule,
    runner: QueryRunner,
    cache: Mutex<Cache>,
    /// Registry-facing copy of the fixed descriptor.
    desc: OnceLock<Desc>,
    log: Mutex<RefreshLog>,
}

impl std::fmt::Debug for QueryCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCollector")
            .field("name", &self.config.name)
            .field("schedule", &self.schedule)
            .finish_non_exhaustive()
    }
}

impl QueryCollector {
    /// Create a new query collector reading from `source`.
    ///
    /// # Errors
    /// Returns `CollectorError::Config` if the configuration carries no query
    /// text or an invalid schedule.
    pub fn new(config: QueryConfig, source: Arc<dyn DataSource>) -> Result<Self, CollectorError> {
        let query = config.query.clone().ok_or_else(|| {
            CollectorError::Config(format!("collector '{}' has no query text", config.name))
        })?;
        let schedule = config.schedule()?;
        let runner = QueryRunner::new(source)
            .with_dialect(config.dialect)
            .with_refresh_interval(schedule.period())
            .with_timeout(config.timeout);

        Ok(Self {
            config,
            query,
            schedule,
            runner,
            cache: Mutex::new(Cache {
                state: SeriesState::Uninitialized,
                batch: Arc::from(Vec::new()),
            }),
            desc: OnceLock::new(),
            log: Mutex::new(RefreshLog::default()),
        })
    }

    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    /// The fixed descriptor, or `None` while no data has been seen.
    ///
    /// Never triggers a refresh.
    pub fn describe(&self) -> Option<Descriptor> {
        match &self.lock_cache().state {
            SeriesState::Ready(descriptor) => Some(descriptor.clone()),
            SeriesState::Uninitialized => None,
        }
    }

    /// Emit the cached batch. Empty until the collector is described.
    pub fn samples(&self) -> Vec<Sample> {
        let Some((descriptor, batch)) = self.snapshot() else {
            return Vec::new();
        };

        batch
            .iter()
            .map(|metric| Sample {
                name: descriptor.name.clone(),
                labels: descriptor.labels.clone(),
                values: metric.values().to_vec(),
                value: metric.value(),
                value_type: descriptor.value_type,
            })
            .collect()
    }

    pub fn status(&self) -> CollectorStatus {
        let (descriptor, samples) = {
            let cache = self.lock_cache();
            let descriptor = match &cache.state {
                SeriesState::Ready(descriptor) => Some(descriptor.clone()),
                SeriesState::Uninitialized => None,
            };
            (descriptor, cache.batch.len())
        };
        let log = self.log.lock().unwrap_or_else(PoisonError::into_inner);

        CollectorStatus {
            name: self.config.name.clone(),
            value_type: self.config.value_type,
            schedule: self.schedule.to_string(),
            state: if descriptor.is_some() {
                "ready"
            } else {
                "uninitialized"
            },
            labels: descriptor.map(|d| d.labels),
            samples,
            last_success: log.last_success,
            last_error: log.last_error.clone(),
        }
    }

    // --- Private helpers ---

    /// Descriptor and current batch, taken under one lock.
    fn snapshot(&self) -> Option<(Descriptor, Arc<[Metric]>)> {
        let cache = self.lock_cache();
        match &cache.state {
            SeriesState::Ready(descriptor) => Some((descriptor.clone(), Arc::clone(&cache.batch))),
            SeriesState::Uninitialized => None,
        }
    }

    fn lock_cache(&self) -> MutexGuard<'_, Cache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Validate `batch` and swap it into the cache.
    ///
    /// Validation runs outside the lock; the critical section only checks the
    /// descriptor and replaces the snapshot reference.
    fn install(&self, batch: Vec<Metric>) -> Result<Refresh, CollectorError> {
        let (labels, desc) = match (self.describe(), batch.first()) {
            (Some(descriptor), _) => (descriptor.labels, None),
            (None, Some(first)) => {
                let labels = first.labels().to_vec();
                // Rejects label names the exposition format cannot carry.
                let desc = Desc::new(
                    self.config.name.clone(),
                    self.config.help.clone(),
                    labels.clone(),
                    HashMap::new(),
                )?;
                (labels, Some(desc))
            }
            (None, None) => return Ok(Refresh::AwaitingData),
        };

        if let Some(other) = batch.iter().find(|m| m.labels() != labels.as_slice()) {
            return Err(CollectorError::LabelMismatch {
                expected: labels,
                found: other.labels().to_vec(),
            });
        }

        let samples = batch.len();
        let batch: Arc<[Metric]> = batch.into();

        let mut cache = self.lock_cache();
        if let SeriesState::Ready(fixed) = &cache.state {
            // Another refresh may have fixed the descriptor since the check above.
            if fixed.labels != labels {
                return Err(CollectorError::LabelMismatch {
                    expected: fixed.labels.clone(),
                    found: labels,
                });
            }
        } else {
            tracing::info!(collector = %self.config.name, labels = ?labels, "Descriptor fixed");
            if let Some(desc) = desc {
                let _ = self.desc.set(desc);
            }
            cache.state = SeriesState::Ready(Descriptor {
                name: self.config.name.clone(),
                help: self.config.help.clone(),
                value_type: self.config.value_type,
                labels,
            });
        }
        cache.batch = batch;

        Ok(Refresh::Updated { samples })
    }

    fn record(&self, result: &Result<Refresh, CollectorError>) {
        let mut log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        match result {
            Ok(_) => {
                log.last_success = Some(Utc::now());
                log.last_error = None;
            }
            Err(e) => log.last_error = Some(e.to_string()),
        }
    }
}

#[async_trait::async_trait]
impl Collector for QueryCollector {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn schedule(&self) -> Schedule {
        self.schedule.clone()
    }

    async fn update(&self) -> Result<Refresh, CollectorError> {
        let result = match self.runner.run(&self.query).await {
            Ok(batch) => self.install(batch),
            Err(e) => Err(e.into()),
        };
        self.record(&result);
        result
    }
}

impl prometheus::core::Collector for QueryCollector {
    fn desc(&self) -> Vec<&Desc> {
        self.desc.get().into_iter().collect()
    }

    fn collect(&self) -> Vec<proto::MetricFamily> {
        match self.snapshot() {
            Some((descriptor, batch)) => vec![metric_family(&descriptor, &batch)],
            None => Vec::new(),
        }
    }
}

/// Build the protobuf family for one batch.
fn metric_family(descriptor: &Descriptor, batch: &[Metric]) -> proto::MetricFamily {
    let mut family = proto::MetricFamily::default();
    family.set_name(descriptor.name.clone());
    family.set_help(descriptor.help.clone());
    family.set_field_type(descriptor.value_type.into());

    for metric in batch {
        let mut sample = proto::Metric::default();
        for (name, value) in descriptor.labels.iter().zip(metric.values()) {
            let mut pair = proto::LabelPair::default();
            pair.set_name(name.clone());
            pair.set_value(value.clone());
            sample.mut_label().push(pair);
        }

        match descriptor.value_type {
            ValueType::Counter => {
                let mut counter = proto::Counter::default();
                counter.set_value(metric.value());
                sample.set_counter(counter);
            }
            ValueType::Gauge => {
                let mut gauge = proto::Gauge::default();
                gauge.set_value(metric.value());
                sample.set_gauge(gauge);
            }
            ValueType::Untyped => {
                let mut untyped = proto::Untyped::default();
                untyped.set_value(metric.value());
                sample.set_untyped(untyped);
            }
        }
        family.mut_metric().push(sample);
    }

    family
}
