//! SQLite data source implementation using sqlx.
//!
//! Rows are decoded dynamically from each value's runtime storage class, so
//! any query shape can be exported without a compile-time schema.

use std::str::FromStr;
use std::time::Duration;

use futures::StreamExt;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool as SqlxPool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row as _, TypeInfo, ValueRef};

use crate::source::{DataSource, DataSourceError, QueryRequest, Row, RowStream, Scalar};

/// Default maximum connections in the pool.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 4;

/// Default connection timeout.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// SQL data source backed by a sqlx SQLite pool.
#[derive(Clone)]
pub struct SqlSource {
    inner: SqlxPool,
}

impl std::fmt::Debug for SqlSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlSource").finish_non_exhaustive()
    }
}

impl SqlSource {
    /// Connect to a SQLite database.
    ///
    /// # Arguments
    ///
    /// * `url` - SQLite connection URL, e.g., `sqlite:data/warehouse.db`
    /// * `max_connections` - upper bound on concurrently open connections
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, DataSourceError> {
        let options = SqliteConnectOptions::from_str(url)?;

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(DEFAULT_CONNECT_TIMEOUT)
            .connect_with(options)
            .await?;

        Ok(Self { inner: pool })
    }

    /// Get the underlying sqlx pool for direct query execution.
    #[inline]
    pub fn inner(&self) -> &SqlxPool {
        &self.inner
    }

    /// Close the connection pool gracefully.
    pub async fn close(&self) {
        self.inner.close().await;
    }

    /// Check if the pool is closed.
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

impl DataSource for SqlSource {
    fn execute<'a>(&'a self, request: &'a QueryRequest) -> RowStream<'a> {
        // SQLite has a single dialect; the selection is only recorded.
        tracing::debug!(dialect = %request.dialect, "Executing query");
        sqlx::query(&request.sql)
            .fetch(&self.inner)
            .map(|row| {
                row.map_err(DataSourceError::from)
                    .and_then(|row| decode_row(&row))
            })
            .boxed()
    }
}

/// Convert a sqlx row into a dynamically typed [`Row`].
fn decode_row(row: &SqliteRow) -> Result<Row, DataSourceError> {
    let mut decoded = Row::new();
    for column in row.columns() {
        let ordinal = column.ordinal();
        let raw = row.try_get_raw(ordinal)?;
        let scalar = if raw.is_null() {
            Scalar::Null
        } else {
            match raw.type_info().name() {
                "INTEGER" | "BOOLEAN" => Scalar::Integer(row.try_get(ordinal)?),
                "REAL" => Scalar::Float(row.try_get(ordinal)?),
                "TEXT" => Scalar::String(row.try_get(ordinal)?),
                _ => Scalar::Null,
            }
        };
        decoded.insert(column.name().to_owned(), scalar);
    }
    Ok(decoded)
}
