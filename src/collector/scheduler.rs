//! Wall-clock aligned refresh scheduling.
//!
//! A [`Scheduler`] owns the collectors sharing one [`Schedule`] and refreshes
//! all of them on every tick. Interval ticks fall on multiples of the interval
//! counted from the unix epoch, so a 15 minute schedule started at 10:07
//! first fires at 10:15.

use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeDelta, Utc};
use futures::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::collector::{Collector, CollectorError, Refresh};

/// Minimum allowed interval (1 second).
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Default timeout for graceful shutdown (5 seconds).
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

const NANOS_PER_SEC: i128 = 1_000_000_000;

/// Schedule for collector refreshes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schedule {
    /// Fixed interval, aligned to wall-clock multiples of the interval.
    ///
    /// Interval is clamped to a minimum of 1 second.
    Interval(Duration),

    /// Cron expression for scheduled execution.
    ///
    /// Uses standard cron syntax: `sec min hour day month weekday` (6-field).
    /// Example: `"0 */5 * * * *"` = every 5 minutes at second 0
    Cron(String),
}

impl Schedule {
    /// Create an interval schedule.
    ///
    /// Interval is clamped to a minimum of 1 second.
    pub fn interval(duration: Duration) -> Self {
        if duration < MIN_INTERVAL {
            tracing::warn!(min_interval = ?MIN_INTERVAL,
                "Interval duration is less than minimum allowed. Using minimum duration."
            );
            Self::Interval(MIN_INTERVAL)
        } else {
            Self::Interval(duration)
        }
    }

    /// Create a cron schedule with immediate validation.
    ///
    /// # Errors
    /// Returns `CollectorError::Config` if the cron expression is invalid.
    pub fn cron(expr: impl AsRef<str>) -> Result<Self, CollectorError> {
        let expr = expr.as_ref();
        cron::Schedule::from_str(expr)
            .map_err(|e| CollectorError::Config(format!("invalid cron expression: {e}")))?;

        Ok(Self::Cron(expr.to_string()))
    }

    /// Nominal period, used for the `REFRESH_RATE_SEC` placeholder.
    ///
    /// For cron schedules this is the gap between the next two firings.
    pub fn period(&self) -> Duration {
        match self {
            Self::Interval(d) => *d,
            Self::Cron(expr) => cron::Schedule::from_str(expr)
                .ok()
                .and_then(|schedule| {
                    let mut upcoming = schedule.upcoming(Utc);
                    let first = upcoming.next()?;
                    let second = upcoming.next()?;
                    (second - first).to_std().ok()
                })
                .unwrap_or(Duration::ZERO),
        }
    }

    /// First firing time at or after `after`.
    ///
    /// Cron firings are strictly after `after`.
    pub fn next_fire(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Interval(d) => Some(next_tick(after, *d)),
            Self::Cron(expr) => cron::Schedule::from_str(expr)
                .ok()?
                .after(&after)
                .next(),
        }
    }
}

impl std::fmt::Display for Schedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Interval(d) => write!(f, "every {:?}", d),
            Self::Cron(expr) => write!(f, "cron: {}", expr),
        }
    }
}

/// Smallest multiple of `interval` since the unix epoch that is `>= now`.
pub fn next_tick(now: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    let step = interval.as_nanos().max(1) as i128;
    let now_ns = i128::from(now.timestamp()) * NANOS_PER_SEC
        + i128::from(now.timestamp_subsec_nanos());

    let next = (now_ns + step - 1).div_euclid(step) * step;
    let secs = next.div_euclid(NANOS_PER_SEC) as i64;
    let nanos = next.rem_euclid(NANOS_PER_SEC) as u32;
    DateTime::from_timestamp(secs, nanos).unwrap_or(now)
}

/// Refreshes a group of collectors sharing one schedule.
pub struct Scheduler {
    schedule: Schedule,
    collectors: Vec<Arc<dyn Collector>>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("schedule", &self.schedule)
            .field("collector_count", &self.collectors.len())
            .finish()
    }
}

impl Scheduler {
    pub fn new(schedule: Schedule) -> Self {
        Self {
            schedule,
            collectors: Vec::new(),
        }
    }

    /// Add a collector to every future tick.
    pub fn register(&mut self, collector: Arc<dyn Collector>) {
        tracing::info!(collector = %collector.name(), schedule = %self.schedule, "Collector registered");
        self.collectors.push(collector);
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn len(&self) -> usize {
        self.collectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collectors.is_empty()
    }

    /// Run the tick loop on a background task.
    pub fn spawn(self) -> SchedulerHandle {
        let (shutdown, signal) = watch::channel(false);
        let schedule = self.schedule.to_string();
        let task = tokio::spawn(self.run(signal));
        SchedulerHandle {
            schedule,
            shutdown,
            task,
        }
    }

    /// Tick loop: sleep to the next firing, refresh every collector, repeat
    /// until `shutdown` changes or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            schedule = %self.schedule,
            collectors = self.collectors.len(),
            "Scheduler started"
        );
        let mut last: Option<DateTime<Utc>> = None;

        loop {
            let now = Utc::now();
            let after = match last {
                Some(prev) if prev >= now => prev + TimeDelta::nanoseconds(1),
                _ => now,
            };
            let Some(next) = self.schedule.next_fire(after) else {
                tracing::error!(schedule = %self.schedule, "Schedule has no upcoming firing");
                return;
            };

            let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            tracing::debug!(schedule = %self.schedule, next = %next, "Waiting for next tick");

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = shutdown.changed() => {
                    tracing::info!(schedule = %self.schedule, "Scheduler stopped");
                    return;
                }
            }

            refresh_all(&self.collectors).await;
            last = Some(next);
        }
    }
}

/// Handle to a spawned [`Scheduler`].
#[derive(Debug)]
pub struct SchedulerHandle {
    schedule: String,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Gracefully stop the scheduler with the default timeout.
    pub async fn shutdown(self) -> Result<(), CollectorError> {
        self.shutdown_with_timeout(DEFAULT_SHUTDOWN_TIMEOUT).await
    }

    /// Stop the scheduler, waiting at most `timeout` for an in-flight tick.
    pub async fn shutdown_with_timeout(self, timeout: Duration) -> Result<(), CollectorError> {
        // The loop also stops if the receiver is gone; nothing to report then.
        let _ = self.shutdown.send(true);

        let abort = self.task.abort_handle();
        match tokio::time::timeout(timeout, self.task).await {
            Ok(Ok(())) => {
                tracing::info!(schedule = %self.schedule, "Scheduler shutdown complete");
                Ok(())
            }
            Ok(Err(e)) => Err(CollectorError::Scheduler(e.to_string())),
            Err(_) => {
                abort.abort();
                tracing::warn!(schedule = %self.schedule, "Scheduler shutdown timed out");
                Ok(())
            }
        }
    }
}

/// Refresh every collector once, concurrently.
///
/// Each refresh runs on its own task; a panicking collector is logged and
/// the rest still complete.
pub async fn refresh_all(collectors: &[Arc<dyn Collector>]) {
    let tasks = collectors.iter().map(|collector| {
        let collector = Arc::clone(collector);
        let name = collector.name().to_owned();
        (name, tokio::spawn(async move { refresh_one(collector.as_ref()).await }))
    });
    let (names, handles): (Vec<_>, Vec<_>) = tasks.unzip();

    for (name, result) in names.into_iter().zip(join_all(handles).await) {
        if let Err(e) = result {
            tracing::error!(collector = %name, error = %e, "Refresh task aborted");
        }
    }
}

/// Execute a single refresh and log its outcome.
async fn refresh_one(collector: &dyn Collector) {
    let name = collector.name();
    let start = Instant::now();
    tracing::debug!(collector = %name, "Running refresh");

    let result = collector.update().await;
    let duration_ms = start.elapsed().as_millis();

    match result {
        Ok(Refresh::Updated { samples }) => {
            tracing::debug!(collector = %name, samples, duration_ms, "Refresh succeeded");
        }
        Ok(Refresh::AwaitingData) => {
            tracing::warn!(
                collector = %name,
                duration_ms,
                "Query returned no rows; series stays hidden until data arrives"
            );
        }
        Err(e) => {
            tracing::error!(
                collector = %name,
                error = %e,
                duration_ms,
                "Refresh failed; serving previous batch"
            );
        }
    }
}
