//! # Metrics Aggregator
//!
//! Aggregate statistics recomputed from the job store, plus the background
//! task that refreshes them on an interval and publishes gauges.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::{gauge, histogram};
use sea_orm::DbErr;
use serde::{Deserialize, Serialize};
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use super::SyncEngine;
use crate::models::sync_job::{JobStatus, Model};
use crate::repositories::SyncJobRepository;

const SCAN_PAGE_SIZE: u64 = 500;

/// Aggregate health of all synchronization jobs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SyncMetrics {
    /// Jobs that reached a terminal state
    pub total_syncs: u64,
    pub successful_syncs: u64,
    pub failed_syncs: u64,
    pub cancelled_syncs: u64,
    /// Jobs still pending or in progress
    pub active_syncs: u64,
    /// In-progress jobs held for conflict review
    pub awaiting_review: u64,
    /// `successful_syncs / total_syncs`, 0 when nothing finished yet
    pub success_rate: f64,
    /// Mean duration of terminal jobs in milliseconds
    pub average_duration_ms: f64,
    /// Mean throughput of terminal jobs in bytes per second
    pub average_throughput: f64,
    /// Bytes moved by every job regardless of outcome
    pub total_data_synced: i64,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub next_scheduled_sync: Option<DateTime<Utc>>,
    pub computed_at: DateTime<Utc>,
}

/// Timing information supplied by the external scheduler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ScheduleWindow {
    pub last_sync_time: Option<DateTime<Utc>>,
    pub next_scheduled_sync: Option<DateTime<Utc>>,
}

/// Running totals folded over jobs one at a time.
#[derive(Debug, Default, Clone)]
pub struct MetricsAccumulator {
    terminal: u64,
    successful: u64,
    failed: u64,
    cancelled: u64,
    active: u64,
    awaiting_review: u64,
    duration_ms_sum: f64,
    throughput_sum: f64,
    total_data: i64,
    latest_end: Option<DateTime<Utc>>,
}

impl MetricsAccumulator {
    pub fn observe(&mut self, job: &Model) {
        self.total_data = self.total_data.saturating_add(job.data_size);

        match job.status {
            JobStatus::Pending | JobStatus::InProgress => {
                self.active += 1;
                if job.requires_review() {
                    self.awaiting_review += 1;
                }
                return;
            }
            JobStatus::Success => self.successful += 1,
            JobStatus::Failed => self.failed += 1,
            JobStatus::Cancelled => self.cancelled += 1,
        }

        self.terminal += 1;
        self.throughput_sum += job.throughput;
        if let Some(duration_ms) = job.duration_ms() {
            self.duration_ms_sum += duration_ms as f64;
        }
        if let Some(end) = job.end_time.map(|end| end.with_timezone(&Utc)) {
            self.latest_end = Some(self.latest_end.map_or(end, |latest| latest.max(end)));
        }
    }

    pub fn finish(self, schedule: Option<&ScheduleWindow>) -> SyncMetrics {
        let ratio = |sum: f64| {
            if self.terminal == 0 {
                0.0
            } else {
                sum / self.terminal as f64
            }
        };

        let (last_sync_time, next_scheduled_sync) = match schedule {
            Some(window) => (
                window.last_sync_time.or(self.latest_end),
                window.next_scheduled_sync,
            ),
            None => (self.latest_end, None),
        };

        SyncMetrics {
            total_syncs: self.terminal,
            successful_syncs: self.successful,
            failed_syncs: self.failed,
            cancelled_syncs: self.cancelled,
            active_syncs: self.active,
            awaiting_review: self.awaiting_review,
            success_rate: ratio(self.successful as f64),
            average_duration_ms: ratio(self.duration_ms_sum),
            average_throughput: ratio(self.throughput_sum),
            total_data_synced: self.total_data,
            last_sync_time,
            next_scheduled_sync,
            computed_at: Utc::now(),
        }
    }
}

/// Fold an in-memory set of jobs.
pub fn summarize<'a>(
    jobs: impl IntoIterator<Item = &'a Model>,
    schedule: Option<&ScheduleWindow>,
) -> SyncMetrics {
    let mut acc = MetricsAccumulator::default();
    for job in jobs {
        acc.observe(job);
    }
    acc.finish(schedule)
}

/// Recompute metrics with a paged scan of the whole store.
#[instrument(skip_all)]
pub async fn recompute(
    repo: &SyncJobRepository,
    schedule: Option<&ScheduleWindow>,
) -> Result<SyncMetrics, DbErr> {
    let started = Instant::now();
    let mut acc = MetricsAccumulator::default();
    let mut after: Option<Uuid> = None;

    loop {
        let page = repo.scan_page(after, None, SCAN_PAGE_SIZE).await?;
        for job in &page {
            acc.observe(job);
        }
        match page.last() {
            Some(last) if page.len() as u64 == SCAN_PAGE_SIZE => after = Some(last.id),
            _ => break,
        }
    }

    let metrics = acc.finish(schedule);
    histogram!("sync_engine_metrics_recompute_ms").record(started.elapsed().as_secs_f64() * 1_000.0);
    debug!(
        total = metrics.total_syncs,
        successful = metrics.successful_syncs,
        failed = metrics.failed_syncs,
        "Metrics recomputed"
    );

    Ok(metrics)
}

/// Publish a snapshot through the `metrics` facade.
pub fn publish_gauges(metrics: &SyncMetrics) {
    gauge!("sync_engine_success_rate").set(metrics.success_rate);
    gauge!("sync_engine_total_syncs").set(metrics.total_syncs as f64);
    gauge!("sync_engine_total_data_synced_bytes").set(metrics.total_data_synced as f64);
}

/// Background task that periodically recomputes metrics.
pub struct MetricsRefresher {
    engine: Arc<SyncEngine>,
    interval: Duration,
}

impl MetricsRefresher {
    pub fn new(engine: Arc<SyncEngine>, interval: Duration) -> Self {
        Self { engine, interval }
    }

    /// Run until `shutdown` fires. Each tick is idempotent; failures are logged
    /// and the next tick proceeds.
    #[instrument(skip_all)]
    pub async fn run(self, shutdown: CancellationToken) {
        info!(interval_secs = self.interval.as_secs(), "Starting metrics refresher");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Metrics refresher shutdown requested");
                    break;
                }
                _ = sleep(self.interval) => {
                    if let Err(err) = self.engine.get_metrics().await {
                        error!(error = ?err, "Metrics refresh failed");
                    }
                }
            }
        }

        info!("Metrics refresher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::test_support::job_in;
    use chrono::Duration as ChronoDuration;
    use migration::{Migrator, MigratorTrait};
    use sea_orm::{ConnectOptions, Database};

    fn finished(status: JobStatus, seconds: i64, data_size: i64, throughput: f64) -> Model {
        let mut job = job_in(status);
        job.end_time = Some(job.start_time + ChronoDuration::seconds(seconds));
        job.data_size = data_size;
        job.throughput = throughput;
        job
    }

    #[test]
    fn test_empty_store_yields_zeros() {
        let metrics = summarize(std::iter::empty(), None);

        assert_eq!(metrics.total_syncs, 0);
        assert_eq!(metrics.success_rate, 0.0);
        assert_eq!(metrics.average_duration_ms, 0.0);
        assert_eq!(metrics.average_throughput, 0.0);
        assert_eq!(metrics.total_data_synced, 0);
        assert!(metrics.last_sync_time.is_none());
    }

    #[test]
    fn test_rates_and_averages() {
        let jobs = vec![
            finished(JobStatus::Success, 2, 100, 50.0),
            finished(JobStatus::Success, 4, 300, 75.0),
            finished(JobStatus::Failed, 6, 50, 10.0),
            finished(JobStatus::Cancelled, 0, 0, 0.0),
        ];
        let mut running = job_in(JobStatus::InProgress);
        running.data_size = 25;

        let metrics = summarize(jobs.iter().chain(std::iter::once(&running)), None);

        assert_eq!(metrics.total_syncs, 4);
        assert_eq!(metrics.successful_syncs, 2);
        assert_eq!(metrics.failed_syncs, 1);
        assert_eq!(metrics.cancelled_syncs, 1);
        assert_eq!(metrics.active_syncs, 1);
        assert_eq!(metrics.success_rate, 0.5);
        assert_eq!(metrics.average_duration_ms, 3_000.0);
        assert_eq!(metrics.average_throughput, 33.75);
        assert_eq!(metrics.total_data_synced, 475);
    }

    #[test]
    fn test_last_sync_time_falls_back_to_latest_end() {
        let early = finished(JobStatus::Success, 1, 0, 0.0);
        let late = finished(JobStatus::Failed, 9, 0, 0.0);
        let expected = late.end_time.map(|end| end.with_timezone(&Utc));

        let metrics = summarize([&early, &late], None);
        assert_eq!(metrics.last_sync_time, expected);
        assert!(metrics.next_scheduled_sync.is_none());
    }

    #[test]
    fn test_schedule_window_wins() {
        let job = finished(JobStatus::Success, 1, 0, 0.0);
        let window = ScheduleWindow {
            last_sync_time: Some(Utc::now() - ChronoDuration::hours(1)),
            next_scheduled_sync: Some(Utc::now() + ChronoDuration::hours(1)),
        };

        let metrics = summarize([&job], Some(&window));
        assert_eq!(metrics.last_sync_time, window.last_sync_time);
        assert_eq!(metrics.next_scheduled_sync, window.next_scheduled_sync);
    }

    #[test]
    fn test_review_queue_counted() {
        let mut held = job_in(JobStatus::InProgress);
        held.conflicts = 4;

        let metrics = summarize([&held], None);
        assert_eq!(metrics.awaiting_review, 1);
        assert_eq!(metrics.total_syncs, 0);
    }

    async fn engine_with(jobs: Vec<Model>) -> Arc<SyncEngine> {
        let mut options = ConnectOptions::new("sqlite::memory:");
        options.max_connections(1).sqlx_logging(false);
        let db = Database::connect(options).await.unwrap();
        Migrator::up(&db, None).await.unwrap();

        let repo = SyncJobRepository::new(db);
        for job in jobs {
            repo.insert(job).await.unwrap();
        }
        Arc::new(SyncEngine::new(repo, EngineConfig::default()))
    }

    #[tokio::test]
    async fn test_refresher_publishes_snapshot_and_stops_on_cancel() {
        let engine = engine_with(vec![finished(JobStatus::Success, 2, 100, 50.0)]).await;
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(
            MetricsRefresher::new(engine.clone(), Duration::from_millis(20)).run(shutdown.clone()),
        );

        let snapshot = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(snapshot) = engine.latest_metrics().await {
                    return snapshot;
                }
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("refresher recomputed metrics");
        assert_eq!(snapshot.total_syncs, 1);
        assert_eq!(snapshot.successful_syncs, 1);

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("refresher exits after cancel")
            .unwrap();
    }

    #[tokio::test]
    async fn test_refresher_cancelled_before_first_tick() {
        let engine = engine_with(Vec::new()).await;
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        tokio::time::timeout(
            Duration::from_secs(5),
            MetricsRefresher::new(engine.clone(), Duration::from_secs(3_600)).run(shutdown),
        )
        .await
        .expect("refresher exits without waiting for the interval");
        assert!(engine.latest_metrics().await.is_none());
    }
}
