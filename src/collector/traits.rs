//! Core collector traits and types.

use crate::collector::Schedule;
use crate::collector::runner::QueryError;
use thiserror::Error;

/// Errors that can occur during a refresh.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// Query execution failed or timed out.
    #[error("query failed: {0}")]
    Query(#[from] QueryError),

    /// The first batch does not form a valid descriptor, e.g. a label column
    /// whose suffix is not a valid label name.
    #[error("invalid descriptor: {0}")]
    Descriptor(#[from] prometheus::Error),

    /// The batch's label set differs from the fixed descriptor.
    #[error("label set changed: expected {expected:?}, found {found:?}")]
    LabelMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Scheduler error.
    #[error("scheduler error: {0}")]
    Scheduler(String),
}

/// Successful outcome of one refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refresh {
    /// The cached batch was replaced.
    Updated { samples: usize },
    /// The query returned no rows and no descriptor exists yet, so the
    /// series stays invisible to scrapes.
    AwaitingData,
}

/// A periodically refreshed metric source.
///
/// Refreshes run on the scheduler; scrapes never call [`Collector::update`].
/// An `Err` leaves the previously cached batch in place.
#[async_trait::async_trait]
pub trait Collector: Send + Sync + 'static {
    /// Unique identifier for this collector instance.
    fn name(&self) -> &str;

    /// Refresh schedule.
    fn schedule(&self) -> Schedule;

    /// Run one refresh cycle.
    async fn update(&self) -> Result<Refresh, CollectorError>;
}
