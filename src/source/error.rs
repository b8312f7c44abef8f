//! Data source error types.

use thiserror::Error;

/// Errors raised while executing a query or reading its cursor.
#[derive(Debug, Error)]
pub enum DataSourceError {
    /// Database operation failed (sqlx error).
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Execution failed for a reason reported by the source itself.
    #[error("query execution failed: {0}")]
    Execution(String),
}
