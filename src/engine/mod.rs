//! # Sync Engine
//!
//! Owns job state. Every mutation runs under the job's lock, is validated by
//! the pure state machine or conflict resolver, and is written with a version
//! check so no job ever observes two terminal statuses.

use chrono::{DateTime, FixedOffset, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

pub mod aggregator;
pub mod conflicts;
pub mod locks;
pub mod retry;
pub mod state_machine;

pub use self::aggregator::{MetricsRefresher, ScheduleWindow, SyncMetrics};
pub use self::conflicts::ResolutionOutcome;
pub use self::state_machine::{AdvanceFields, TransitionPolicy};
pub use crate::repositories::sync_job::JobFilter;

use self::locks::JobLocks;
use crate::config::EngineConfig;
use crate::cursor::{self, JobCursor};
use crate::error::{EngineError, is_unique_violation};
use crate::models::sync_job::{ConflictResolution, JobStatus, Model, SyncType};
use crate::repositories::SyncJobRepository;

/// Write attempts before a lost version check is reported to the caller.
const MAX_WRITE_ATTEMPTS: usize = 3;

pub const DEFAULT_PAGE_LIMIT: u64 = 50;
pub const MAX_PAGE_LIMIT: u64 = 100;

/// Request to create a job from an external trigger.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct NewSyncJob {
    pub integration_id: String,
    pub integration_name: String,
    pub sync_type: SyncType,
    /// Scheduler, user id, or other actor identifier
    pub triggered_by: String,
    #[serde(default)]
    pub records_total: i64,
    #[serde(default)]
    pub conflict_resolution: ConflictResolution,
}

/// One page of a job listing.
#[derive(Debug, Clone)]
pub struct JobPage {
    pub jobs: Vec<Model>,
    pub next_cursor: Option<String>,
}

/// Outcome of an operator conflict decision.
#[derive(Debug, Clone)]
pub struct ConflictResolutionResult {
    pub job: Model,
    pub outcome: ResolutionOutcome,
}

pub struct SyncEngine {
    repo: SyncJobRepository,
    config: EngineConfig,
    locks: JobLocks,
    schedule: RwLock<Option<ScheduleWindow>>,
    latest_metrics: RwLock<Option<SyncMetrics>>,
}

impl SyncEngine {
    pub fn new(repo: SyncJobRepository, config: EngineConfig) -> Self {
        let locks = JobLocks::new(config.lock_cache_capacity);
        Self {
            repo,
            config,
            locks,
            schedule: RwLock::new(None),
            latest_metrics: RwLock::new(None),
        }
    }

    fn policy(&self) -> TransitionPolicy {
        TransitionPolicy::from(&self.config)
    }

    /// Insert a `Pending` job at the start of a new lineage.
    #[instrument(skip_all, fields(integration_id = %request.integration_id))]
    pub async fn create_job(&self, request: NewSyncJob) -> Result<Model, EngineError> {
        require_non_empty("integration_id", &request.integration_id)?;
        require_non_empty("integration_name", &request.integration_name)?;
        require_non_empty("triggered_by", &request.triggered_by)?;
        if request.records_total < 0 {
            return Err(EngineError::validation(
                "records_total",
                "must not be negative",
            ));
        }

        let now = now();
        let id = Uuid::new_v4();
        let job = Model {
            id,
            integration_id: request.integration_id.trim().to_string(),
            integration_name: request.integration_name.trim().to_string(),
            status: JobStatus::Pending,
            sync_type: request.sync_type,
            triggered_by: request.triggered_by.trim().to_string(),
            start_time: now,
            end_time: None,
            records_processed: 0,
            records_total: request.records_total,
            records_skipped: 0,
            error_count: 0,
            error_message: None,
            data_size: 0,
            throughput: 0.0,
            conflicts: 0,
            conflict_resolution: request.conflict_resolution,
            retry_of: None,
            lineage_root: id,
            retry_depth: 0,
            version: 0,
            created_at: now,
            updated_at: now,
        };

        let job = self.repo.insert(job).await?;
        info!(job_id = %job.id, sync_type = job.sync_type.as_str(), "Sync job created");
        Ok(job)
    }

    pub async fn get_job(&self, job_id: Uuid) -> Result<Model, EngineError> {
        self.repo
            .find(job_id)
            .await?
            .ok_or(EngineError::NotFound { job_id })
    }

    /// Filtered listing, most recent `start_time` first.
    pub async fn list_jobs(
        &self,
        filter: &JobFilter,
        limit: Option<u64>,
        after: Option<&str>,
    ) -> Result<JobPage, EngineError> {
        let limit = limit.unwrap_or(DEFAULT_PAGE_LIMIT);
        if !(1..=MAX_PAGE_LIMIT).contains(&limit) {
            return Err(EngineError::validation(
                "limit",
                format!("must be between 1 and {MAX_PAGE_LIMIT}"),
            ));
        }

        let after: Option<JobCursor> = after.map(cursor::decode_cursor).transpose()?;

        let mut jobs = self.repo.list(filter, after, limit + 1).await?;
        let next_cursor = if jobs.len() as u64 > limit {
            jobs.truncate(limit as usize);
            jobs.last()
                .map(|last| cursor::encode_cursor(&last.start_time_utc(), &last.id))
        } else {
            None
        };

        Ok(JobPage { jobs, next_cursor })
    }

    /// The whole retry chain the job belongs to, original first.
    pub async fn lineage(&self, job_id: Uuid) -> Result<Vec<Model>, EngineError> {
        let job = self.get_job(job_id).await?;
        Ok(self.repo.lineage(job.lineage_root).await?)
    }

    /// Recompute aggregate metrics from the store and publish them.
    pub async fn get_metrics(&self) -> Result<SyncMetrics, EngineError> {
        let schedule = self.schedule.read().await.clone();
        let snapshot = aggregator::recompute(&self.repo, schedule.as_ref()).await?;
        aggregator::publish_gauges(&snapshot);
        *self.latest_metrics.write().await = Some(snapshot.clone());
        Ok(snapshot)
    }

    /// Snapshot from the most recent recomputation, if any.
    pub async fn latest_metrics(&self) -> Option<SyncMetrics> {
        self.latest_metrics.read().await.clone()
    }

    /// Record the scheduler's view of the last and next sync.
    pub async fn set_schedule_window(&self, window: ScheduleWindow) {
        *self.schedule.write().await = Some(window);
    }

    /// Report progress or a status change for a job.
    #[instrument(skip(self, fields))]
    pub async fn advance(
        &self,
        job_id: Uuid,
        to: JobStatus,
        fields: AdvanceFields,
    ) -> Result<Model, EngineError> {
        let policy = self.policy();
        let mut outcome = ResolutionOutcome::Clean;

        let (before, job) = self
            .mutate(job_id, |current| {
                let transition = state_machine::advance(current, to, &fields, policy, now())?;
                outcome = transition.conflict_outcome;
                Ok(Some(transition.job))
            })
            .await
            .inspect_err(|err| record_rejection(err))?;

        record_transition(&before, &job);
        if outcome != ResolutionOutcome::Clean {
            record_conflict_outcome(&job, outcome, "detected");
        }

        Ok(job)
    }

    /// Explicit pause: `InProgress -> Cancelled`.
    #[instrument(skip(self))]
    pub async fn pause(&self, job_id: Uuid) -> Result<Model, EngineError> {
        let policy = self.policy();

        let (before, job) = self
            .mutate(job_id, |current| {
                state_machine::pause(current, policy, now()).map(Some)
            })
            .await
            .inspect_err(|err| record_rejection(err))?;

        record_transition(&before, &job);
        Ok(job)
    }

    /// Apply an operator's conflict decision.
    #[instrument(skip(self))]
    pub async fn resolve_conflicts(
        &self,
        job_id: Uuid,
        strategy: ConflictResolution,
    ) -> Result<ConflictResolutionResult, EngineError> {
        let mut outcome = ResolutionOutcome::Clean;

        let (_, job) = self
            .mutate(job_id, |current| {
                match conflicts::resolve(current, strategy, now())? {
                    Some((next, result)) => {
                        outcome = result;
                        Ok(Some(next))
                    }
                    None => Ok(None),
                }
            })
            .await
            .inspect_err(|err| record_rejection(err))?;

        if outcome != ResolutionOutcome::Clean {
            record_conflict_outcome(&job, outcome, "operator");
        }

        Ok(ConflictResolutionResult { job, outcome })
    }

    /// Create a `Pending` replacement for a failed or cancelled job.
    #[instrument(skip(self))]
    pub async fn retry(&self, job_id: Uuid) -> Result<Model, EngineError> {
        let source = self.get_job(job_id).await?;
        retry::ensure_retryable(&source)?;

        // Retries of any job in a chain share one budget, so serialize on the root.
        let _guard = self.locks.acquire(source.lineage_root).await;

        let max_retries = self.config.max_retries;
        let used = self.repo.count_retries(source.lineage_root).await?;

        let candidate = match retry::build_retry(&source, used, max_retries, now()) {
            Ok(candidate) => candidate,
            Err(err) => {
                if matches!(err, EngineError::RetryLimitExceeded { .. }) {
                    counter!("sync_engine_retry_limit_exceeded_total").increment(1);
                    warn!(
                        job_id = %source.id,
                        lineage_root = %source.lineage_root,
                        used,
                        max_retries,
                        "Retry limit exceeded"
                    );
                }
                return Err(err);
            }
        };

        match self.repo.insert(candidate).await {
            Ok(created) => {
                counter!("sync_engine_retries_total").increment(1);
                info!(
                    job_id = %created.id,
                    retry_of = %source.id,
                    lineage_root = %created.lineage_root,
                    retry_depth = created.retry_depth,
                    "Retry job created"
                );
                Ok(created)
            }
            // Another process claimed the same lineage slot.
            Err(err) if is_unique_violation(&err) => {
                let used = self.repo.count_retries(source.lineage_root).await?;
                if used >= u64::from(max_retries) {
                    counter!("sync_engine_retry_limit_exceeded_total").increment(1);
                    Err(EngineError::RetryLimitExceeded {
                        job_id: source.id,
                        lineage_root: source.lineage_root,
                        max_retries,
                    })
                } else {
                    Err(EngineError::ConcurrentModification { job_id: source.id })
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Full history, optionally restricted to one status, in id order.
    pub async fn history(&self, status: Option<JobStatus>) -> Result<Vec<Model>, EngineError> {
        const PAGE: u64 = 500;
        let mut jobs = Vec::new();
        let mut after = None;

        loop {
            let page = self.repo.scan_page(after, status, PAGE).await?;
            let full = page.len() as u64 == PAGE;
            after = page.last().map(|job| job.id);
            jobs.extend(page);
            if !full {
                break;
            }
        }

        Ok(jobs)
    }

    /// Load, compute and conditionally write a job under its lock.
    ///
    /// `op` returns `None` when there is nothing to write. On a lost version
    /// check the job is reloaded and `op` re-validated against the new state.
    async fn mutate<F>(&self, job_id: Uuid, mut op: F) -> Result<(Model, Model), EngineError>
    where
        F: FnMut(&Model) -> Result<Option<Model>, EngineError>,
    {
        let _guard = self.locks.acquire(job_id).await;

        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let current = self.get_job(job_id).await?;

            let Some(next) = op(&current)? else {
                return Ok((current.clone(), current));
            };

            match self.repo.update_if_version(next, current.version).await? {
                Some(saved) => return Ok((current, saved)),
                None => {
                    debug!(job_id = %job_id, attempt, "Version check lost, reloading job");
                }
            }
        }

        Err(EngineError::ConcurrentModification { job_id })
    }
}

fn now() -> DateTime<FixedOffset> {
    Utc::now().fixed_offset()
}

fn require_non_empty(field: &str, value: &str) -> Result<(), EngineError> {
    if value.trim().is_empty() {
        Err(EngineError::validation(field, "must not be empty"))
    } else {
        Ok(())
    }
}

fn record_transition(before: &Model, after: &Model) {
    counter!(
        "sync_engine_transitions_total",
        "from" => before.status.as_str(),
        "to" => after.status.as_str()
    )
    .increment(1);

    if before.status == after.status {
        debug!(
            job_id = %after.id,
            records_processed = after.records_processed,
            records_total = after.records_total,
            conflicts = after.conflicts,
            "Sync job progress recorded"
        );
    } else {
        info!(
            job_id = %after.id,
            integration_id = %after.integration_id,
            from = before.status.as_str(),
            to = after.status.as_str(),
            duration_ms = after.duration_ms(),
            "Sync job transitioned"
        );
    }
}

fn record_rejection(err: &EngineError) {
    if let EngineError::InvalidTransition {
        job_id,
        from,
        to,
        reason,
    } = err
    {
        counter!("sync_engine_transition_rejected_total").increment(1);
        warn!(
            job_id = %job_id,
            from = from.as_str(),
            to = to.as_str(),
            reason = %reason,
            "Sync job transition rejected"
        );
    }
}

fn record_conflict_outcome(job: &Model, outcome: ResolutionOutcome, source: &'static str) {
    let strategy = match outcome {
        ResolutionOutcome::Resolved { .. } => "auto",
        ResolutionOutcome::Skipped { .. } => "skip",
        ResolutionOutcome::Escalated { .. } => "escalated",
        ResolutionOutcome::Held { .. } => "manual",
        ResolutionOutcome::Clean => return,
    };

    counter!("sync_engine_conflicts_resolved_total", "strategy" => strategy).increment(1);
    info!(
        job_id = %job.id,
        strategy,
        source,
        outcome = ?outcome,
        conflicts = job.conflicts,
        "Conflict resolution applied"
    );
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    use crate::models::sync_job::{ConflictResolution, JobStatus, Model, SyncType};

    /// A job with 100 records in the given status.
    pub fn job_in(status: JobStatus) -> Model {
        let id = Uuid::new_v4();
        let start = (Utc::now() - Duration::minutes(5)).fixed_offset();
        Model {
            id,
            integration_id: "int-postgres".to_string(),
            integration_name: "Warehouse Postgres".to_string(),
            status,
            sync_type: SyncType::Incremental,
            triggered_by: "scheduler".to_string(),
            start_time: start,
            end_time: status.is_terminal().then_some(start + Duration::seconds(30)),
            records_processed: 0,
            records_total: 100,
            records_skipped: 0,
            error_count: 0,
            error_message: (status == JobStatus::Failed).then(|| "boom".to_string()),
            data_size: 0,
            throughput: 0.0,
            conflicts: 0,
            conflict_resolution: ConflictResolution::Auto,
            retry_of: None,
            lineage_root: id,
            retry_depth: 0,
            version: 0,
            created_at: start,
            updated_at: start,
        }
    }
}
