//! In-memory data source used by unit tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::StreamExt;

use crate::source::{DataSource, DataSourceError, QueryRequest, Row, RowStream, Scalar};

/// Scripted response for the next execution.
#[derive(Debug, Clone)]
pub(crate) enum Script {
    /// Stream all rows, then the end-of-rows sentinel.
    Rows(Vec<Row>),
    /// Stream the rows, then fail the cursor read.
    RowsThenError(Vec<Row>, String),
}

/// Data source returning a scripted result for every execution.
pub(crate) struct MockSource {
    script: Mutex<Script>,
    delay: Mutex<Option<Duration>>,
    requests: Mutex<Vec<QueryRequest>>,
    executions: AtomicUsize,
}

impl MockSource {
    pub(crate) fn new(script: Script) -> Self {
        Self {
            script: Mutex::new(script),
            delay: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
            executions: AtomicUsize::new(0),
        }
    }

    pub(crate) fn rows(rows: Vec<Row>) -> Self {
        Self::new(Script::Rows(rows))
    }

    pub(crate) fn failing(message: &str) -> Self {
        Self::new(Script::RowsThenError(Vec::new(), message.to_owned()))
    }

    /// Delay the first row of every execution.
    pub(crate) fn with_delay(self, delay: Duration) -> Self {
        self.set_delay(Some(delay));
        self
    }

    /// Change the delay used by subsequent executions.
    pub(crate) fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap() = delay;
    }

    /// Replace the script used by subsequent executions.
    pub(crate) fn set_script(&self, script: Script) {
        *self.script.lock().unwrap() = script;
    }

    pub(crate) fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }

    pub(crate) fn last_request(&self) -> Option<QueryRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

impl DataSource for MockSource {
    fn execute<'a>(&'a self, request: &'a QueryRequest) -> RowStream<'a> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());

        let items: Vec<Result<Row, DataSourceError>> = match self.script.lock().unwrap().clone() {
            Script::Rows(rows) => rows.into_iter().map(Ok).collect(),
            Script::RowsThenError(rows, message) => rows
                .into_iter()
                .map(Ok)
                .chain(std::iter::once(Err(DataSourceError::Execution(message))))
                .collect(),
        };
        let delay = *self.delay.lock().unwrap();

        futures::stream::once(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            futures::stream::iter(items)
        })
        .flatten()
        .boxed()
    }
}

/// Build a row from `(column, value)` pairs.
pub(crate) fn row<const N: usize>(columns: [(&str, Scalar); N]) -> Row {
    columns
        .into_iter()
        .map(|(name, value)| (name.to_owned(), value))
        .collect()
}
