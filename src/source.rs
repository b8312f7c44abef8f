//! Data Source Layer
//!
//! The exporter never talks to a database directly; it runs query text through
//! a [`DataSource`] and drains the returned row stream.
//!
//! # Components
//!
//! - [`DataSource`]: contract for anything that can execute query text and
//!   hand back a forward-only cursor of rows
//! - [`SqlSource`]: sqlx-backed SQLite implementation
//! - [`Row`] / [`Scalar`]: dynamically-typed result rows
//!
//! A cursor is a [`RowStream`]: the stream yielding `None` is the end-of-rows
//! sentinel, any `Err` item is a read failure.

mod error;
#[cfg(test)]
pub(crate) mod mock;
mod sqlite;

use std::collections::BTreeMap;

use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

pub use error::DataSourceError;
pub use sqlite::{DEFAULT_MAX_CONNECTIONS, SqlSource};

/// A single column value as reported by the data source.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    String(String),
    Integer(i64),
    Float(f64),
    /// SQL NULL or any type without a string/integer/float representation.
    Null,
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

/// One result row keyed by column name.
pub type Row = BTreeMap<String, Scalar>;

/// Forward-only cursor over query results.
pub type RowStream<'a> = BoxStream<'a, Result<Row, DataSourceError>>;

/// Query syntax flavour submitted alongside the query text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    Legacy,
    Standard,
}

impl Dialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Legacy => "legacy",
            Self::Standard => "standard",
        }
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully rendered query ready for submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    /// Query text with all placeholders substituted.
    pub sql: String,
    /// Dialect the text is written in.
    pub dialect: Dialect,
}

impl QueryRequest {
    pub fn new(sql: impl Into<String>, dialect: Dialect) -> Self {
        Self {
            sql: sql.into(),
            dialect,
        }
    }
}

/// External tabular data source.
///
/// Implementations open a cursor for the request and stream rows lazily.
/// Connection or execution failures surface as the first `Err` item of the
/// stream; callers stop reading at the first error.
pub trait DataSource: Send + Sync + 'static {
    /// Execute the request and return a cursor over its rows.
    fn execute<'a>(&'a self, request: &'a QueryRequest) -> RowStream<'a>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialect_serde_lowercase() {
        let dialect: Dialect = serde_yaml::from_str("standard").unwrap();
        assert_eq!(dialect, Dialect::Standard);
        assert_eq!(Dialect::default(), Dialect::Legacy);
        assert_eq!(Dialect::Legacy.to_string(), "legacy");
    }

    #[test]
    fn test_scalar_conversions() {
        assert_eq!(Scalar::from("x"), Scalar::String("x".to_string()));
        assert_eq!(Scalar::from(42_i64), Scalar::Integer(42));
        assert_eq!(Scalar::from(1.5_f64), Scalar::Float(1.5));
    }
}
