//! Query execution boundary.
//!
//! [`QueryRunner::run`] renders the query text for the current refresh,
//! submits it to the [`DataSource`], and drains the cursor into a batch of
//! [`Metric`]s. A run either returns every row or an error; rows read before
//! a failure are discarded.

use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use regex::{Captures, Regex};
use thiserror::Error;

use crate::collector::decode::{Metric, decode};
use crate::source::{DataSource, DataSourceError, Dialect, QueryRequest};

/// Replaced with the refresh start time in unix seconds.
pub const START_TIME_TOKEN: &str = "UNIX_START_TIME";

/// Replaced with the refresh interval in whole seconds.
pub const REFRESH_RATE_TOKEN: &str = "REFRESH_RATE_SEC";

/// Default deadline for a single run (1 minute).
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(60);

const LEGACY_DIRECTIVE: &str = "#legacysql";
const STANDARD_DIRECTIVE: &str = "#standardsql";

/// Errors that abort a query run.
#[derive(Debug, Error)]
pub enum QueryError {
    /// Execution or cursor read failed.
    #[error(transparent)]
    DataSource(#[from] DataSourceError),

    /// The run exceeded its deadline; the cursor was dropped.
    #[error("query timed out after {0:?}")]
    Timeout(Duration),
}

/// Executes query text and collects the decoded batch.
#[derive(Clone)]
pub struct QueryRunner {
    source: Arc<dyn DataSource>,
    dialect: Dialect,
    refresh_interval: Duration,
    timeout: Duration,
}

impl std::fmt::Debug for QueryRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryRunner")
            .field("dialect", &self.dialect)
            .field("refresh_interval", &self.refresh_interval)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl QueryRunner {
    pub fn new(source: Arc<dyn DataSource>) -> Self {
        Self {
            source,
            dialect: Dialect::default(),
            refresh_interval: Duration::ZERO,
            timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }

    /// Dialect used when the query carries no `#legacySQL`/`#standardSQL` line.
    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    /// Interval substituted for [`REFRESH_RATE_TOKEN`].
    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Execute `query` and return the complete batch.
    pub async fn run(&self, query: &str) -> Result<Vec<Metric>, QueryError> {
        let request = self.prepare(query, Utc::now());
        let start = Instant::now();

        let metrics = tokio::time::timeout(self.timeout, self.drain(&request))
            .await
            .map_err(|_| QueryError::Timeout(self.timeout))??;

        tracing::debug!(
            rows = metrics.len(),
            dialect = %request.dialect,
            duration_ms = start.elapsed().as_millis(),
            "Query completed"
        );
        Ok(metrics)
    }

    /// Render `query` for a run starting at `started`.
    pub fn prepare(&self, query: &str, started: DateTime<Utc>) -> QueryRequest {
        let (dialect, body) = split_dialect(query).unwrap_or((self.dialect, query));
        QueryRequest::new(
            render_placeholders(body, started, self.refresh_interval),
            dialect,
        )
    }

    async fn drain(&self, request: &QueryRequest) -> Result<Vec<Metric>, QueryError> {
        let mut rows = self.source.execute(request);
        let mut metrics = Vec::new();

        loop {
            match rows.try_next().await {
                Ok(Some(row)) => metrics.push(decode(&row)),
                Ok(None) => return Ok(metrics),
                Err(e) => {
                    tracing::debug!(rows_read = metrics.len(), error = %e, "Cursor read failed");
                    return Err(e.into());
                }
            }
        }
    }
}

/// Detect a leading dialect directive and strip it from the query body.
fn split_dialect(query: &str) -> Option<(Dialect, &str)> {
    let trimmed = query.trim_start();
    let (first, rest) = trimmed.split_once('\n').unwrap_or((trimmed, ""));

    let directive = first.trim();
    let dialect = if directive.eq_ignore_ascii_case(LEGACY_DIRECTIVE) {
        Dialect::Legacy
    } else if directive.eq_ignore_ascii_case(STANDARD_DIRECTIVE) {
        Dialect::Standard
    } else {
        return None;
    };
    Some((dialect, rest))
}

/// Substitute the well-known placeholder tokens.
fn render_placeholders(query: &str, started: DateTime<Utc>, interval: Duration) -> String {
    static PLACEHOLDER_REGEX: OnceLock<Regex> = OnceLock::new();

    let regex = PLACEHOLDER_REGEX.get_or_init(|| {
        Regex::new(&format!(r"\b({START_TIME_TOKEN}|{REFRESH_RATE_TOKEN})\b"))
            .expect("failed to compile placeholder regex")
    });

    regex
        .replace_all(query, |caps: &Captures| match &caps[1] {
            START_TIME_TOKEN => started.timestamp().to_string(),
            _ => interval.as_secs().to_string(),
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::mock::{MockSource, Script, row};
    use chrono::TimeZone;

    fn runner(source: Arc<MockSource>) -> QueryRunner {
        QueryRunner::new(source)
    }

    #[tokio::test]
    async fn test_run_collects_all_rows() {
        let source = Arc::new(MockSource::rows(vec![
            row([("label_server", "a".into()), ("value", 1_i64.into())]),
            row([("label_server", "b".into()), ("value", 2_i64.into())]),
        ]));

        let metrics = runner(source.clone()).run("SELECT 1").await.unwrap();
        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics[1].values(), ["b"]);
        assert_eq!(metrics[1].value(), 2.0);
        assert_eq!(source.executions(), 1);
    }

    #[tokio::test]
    async fn test_run_empty_result() {
        let source = Arc::new(MockSource::rows(Vec::new()));
        let metrics = runner(source).run("SELECT 1").await.unwrap();
        assert!(metrics.is_empty());
    }

    #[tokio::test]
    async fn test_run_discards_partial_batch_on_error() {
        let source = Arc::new(MockSource::new(Script::RowsThenError(
            vec![row([("value", 1_i64.into())]), row([("value", 2_i64.into())])],
            "connection reset".to_string(),
        )));

        let result = runner(source).run("SELECT 1").await;
        match result {
            Err(QueryError::DataSource(e)) => assert!(e.to_string().contains("connection reset")),
            other => panic!("expected data source error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_run_times_out() {
        let source = Arc::new(
            MockSource::rows(vec![row([("value", 1_i64.into())])])
                .with_delay(Duration::from_secs(5)),
        );

        let result = runner(source)
            .with_timeout(Duration::from_millis(20))
            .run("SELECT 1")
            .await;
        assert!(matches!(result, Err(QueryError::Timeout(_))));
    }

    #[test]
    fn test_prepare_substitutes_placeholders() {
        let source = Arc::new(MockSource::rows(Vec::new()));
        let started = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let request = runner(source)
            .with_refresh_interval(Duration::from_secs(900))
            .prepare(
                "SELECT * FROM t WHERE ts > UNIX_START_TIME - REFRESH_RATE_SEC AND c = 'XUNIX_START_TIME'",
                started,
            );

        assert_eq!(
            request.sql,
            "SELECT * FROM t WHERE ts > 1704103200 - 900 AND c = 'XUNIX_START_TIME'"
        );
        assert_eq!(request.dialect, Dialect::Legacy);
    }

    #[test]
    fn test_prepare_selects_dialect_from_directive() {
        let source = Arc::new(MockSource::rows(Vec::new()));
        let runner = runner(source).with_dialect(Dialect::Legacy);

        let request = runner.prepare("#standardSQL\nSELECT 1", Utc::now());
        assert_eq!(request.dialect, Dialect::Standard);
        assert_eq!(request.sql, "SELECT 1");

        let request = runner.prepare("  #LEGACYSQL\nSELECT 2", Utc::now());
        assert_eq!(request.dialect, Dialect::Legacy);
        assert_eq!(request.sql, "SELECT 2");

        let request = runner
            .clone()
            .with_dialect(Dialect::Standard)
            .prepare("SELECT 3", Utc::now());
        assert_eq!(request.dialect, Dialect::Standard);
        assert_eq!(request.sql, "SELECT 3");
    }

    #[tokio::test]
    async fn test_run_renders_per_execution() {
        let source = Arc::new(MockSource::rows(Vec::new()));
        let runner = runner(source.clone()).with_refresh_interval(Duration::from_secs(60));

        runner.run("SELECT REFRESH_RATE_SEC").await.unwrap();
        let request = source.last_request().unwrap();
        assert_eq!(request.sql, "SELECT 60");
    }
}
