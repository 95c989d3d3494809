//! Job lifecycle transitions.
//!
//! ```text
//! Pending ──> InProgress ──> Success
//!                 │  ▲  ├──> Failed
//!                 └──┘  └──> Cancelled
//! ```
//!
//! `InProgress -> InProgress` is a progress report. Every function here is
//! pure: it either returns the next state of the job or rejects the request,
//! and the caller persists the result.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::conflicts::{self, ResolutionOutcome};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::models::sync_job::{ConflictResolution, JobStatus, Model};

/// Fields an executor may report alongside a transition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default, deny_unknown_fields)]
pub struct AdvanceFields {
    /// Absolute number of records processed so far
    pub records_processed: Option<i64>,
    /// Revised number of records at the source, including any already
    /// excluded by the `skip` strategy
    pub records_total: Option<i64>,
    /// Errors encountered since the previous report
    pub errors_increment: Option<i64>,
    /// Required when moving to `failed`, rejected otherwise
    pub error_message: Option<String>,
    /// Absolute bytes moved so far
    pub data_size: Option<i64>,
    /// Reported bytes per second; derived on completion when absent
    pub throughput: Option<f64>,
    /// Newly detected conflicts, added to the outstanding count
    pub conflicts: Option<i64>,
    /// Strategy to use for conflicts on this job
    pub conflict_resolution: Option<ConflictResolution>,
}

/// Thresholds the state machine enforces.
#[derive(Debug, Clone, Copy)]
pub struct TransitionPolicy {
    pub failure_threshold: u64,
    pub auto_resolve_max_conflicts: u64,
}

impl From<&EngineConfig> for TransitionPolicy {
    fn from(config: &EngineConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold,
            auto_resolve_max_conflicts: config.auto_resolve_max_conflicts,
        }
    }
}

/// Result of a successful transition.
#[derive(Debug, Clone)]
pub struct Transition {
    pub job: Model,
    pub conflict_outcome: ResolutionOutcome,
}

/// Whether the lifecycle graph has an edge `from -> to`.
pub fn is_allowed(from: JobStatus, to: JobStatus) -> bool {
    use JobStatus::*;

    matches!(
        (from, to),
        (Pending, InProgress)
            | (InProgress, InProgress)
            | (InProgress, Success)
            | (InProgress, Failed)
            | (InProgress, Cancelled)
    )
}

/// Compute the next state of `job` for `advance(job, to, fields)`.
pub fn advance(
    job: &Model,
    to: JobStatus,
    fields: &AdvanceFields,
    policy: TransitionPolicy,
    now: DateTime<FixedOffset>,
) -> Result<Transition, EngineError> {
    let reject = |reason: &str| EngineError::invalid_transition(job.id, job.status, to, reason);

    if job.status.is_terminal() {
        return Err(reject("job is already in a terminal state"));
    }

    if !is_allowed(job.status, to) {
        return Err(reject("transition is not part of the job lifecycle"));
    }

    validate_fields(fields, to).map_err(|reason| reject(&reason))?;

    let mut next = job.clone();

    if let Some(total) = fields.records_total {
        if total < next.records_skipped {
            return Err(reject(&format!(
                "records_total ({total}) cannot be below the {} records already skipped",
                next.records_skipped
            )));
        }
        next.records_total = total - next.records_skipped;
    }
    if let Some(processed) = fields.records_processed {
        next.records_processed = processed;
    }
    if let Some(increment) = fields.errors_increment {
        next.error_count = next.error_count.saturating_add(increment);
    }
    if let Some(data_size) = fields.data_size {
        next.data_size = data_size;
    }
    if let Some(throughput) = fields.throughput {
        next.throughput = throughput;
    }
    if let Some(strategy) = fields.conflict_resolution {
        next.conflict_resolution = strategy;
    }

    let conflict_outcome = match fields.conflicts {
        Some(detected) if detected > 0 => {
            next.conflicts = next.conflicts.saturating_add(detected);
            conflicts::apply_detected(&mut next, policy.auto_resolve_max_conflicts)
        }
        _ => ResolutionOutcome::Clean,
    };

    if next.records_processed > next.records_total {
        return Err(reject(&format!(
            "records_processed ({}) cannot exceed records_total ({})",
            next.records_processed, next.records_total
        )));
    }

    match to {
        JobStatus::Success => {
            if next.conflicts > 0 {
                return Err(reject(&format!(
                    "{} unresolved conflicts require resolution",
                    next.conflicts
                )));
            }
            if next.records_processed != next.records_total {
                return Err(reject(&format!(
                    "only {} of {} records processed",
                    next.records_processed, next.records_total
                )));
            }
            if next.error_count as u64 >= policy.failure_threshold {
                return Err(reject(&format!(
                    "error count {} reached the failure threshold of {}",
                    next.error_count, policy.failure_threshold
                )));
            }
        }
        JobStatus::Failed => {
            next.error_message = fields.error_message.clone();
        }
        _ => {}
    }

    next.status = to;
    next.updated_at = now;

    if to.is_terminal() {
        next.end_time = Some(now);
        if fields.throughput.is_none() {
            next.throughput = derive_throughput(next.data_size, &next.start_time, &now);
        }
    }

    Ok(Transition {
        job: next,
        conflict_outcome,
    })
}

/// Explicit pause request: `InProgress -> Cancelled`.
pub fn pause(
    job: &Model,
    policy: TransitionPolicy,
    now: DateTime<FixedOffset>,
) -> Result<Model, EngineError> {
    if job.status != JobStatus::InProgress {
        return Err(EngineError::invalid_transition(
            job.id,
            job.status,
            JobStatus::Cancelled,
            "only in-progress jobs can be paused",
        ));
    }

    advance(
        job,
        JobStatus::Cancelled,
        &AdvanceFields::default(),
        policy,
        now,
    )
    .map(|transition| transition.job)
}

/// Bytes per second over the job's active period, 0 for a zero-length period.
pub fn derive_throughput(
    data_size: i64,
    start: &DateTime<FixedOffset>,
    end: &DateTime<FixedOffset>,
) -> f64 {
    let seconds = (*end - *start).num_milliseconds() as f64 / 1_000.0;
    if seconds <= 0.0 {
        0.0
    } else {
        data_size as f64 / seconds
    }
}

fn validate_fields(fields: &AdvanceFields, to: JobStatus) -> Result<(), String> {
    let counters = [
        ("records_processed", fields.records_processed),
        ("records_total", fields.records_total),
        ("errors_increment", fields.errors_increment),
        ("data_size", fields.data_size),
        ("conflicts", fields.conflicts),
    ];

    for (name, value) in counters {
        if value.is_some_and(|v| v < 0) {
            return Err(format!("{name} must not be negative"));
        }
    }

    if let Some(throughput) = fields.throughput
        && (!throughput.is_finite() || throughput < 0.0)
    {
        return Err("throughput must be a non-negative number".to_string());
    }

    let has_message = fields
        .error_message
        .as_deref()
        .is_some_and(|message| !message.trim().is_empty());

    match (to, has_message) {
        (JobStatus::Failed, false) => Err("error_message is required when failing a job".into()),
        (JobStatus::Failed, true) => Ok(()),
        (_, _) if fields.error_message.is_some() => {
            Err("error_message is only accepted when failing a job".into())
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_support::job_in;
    use chrono::Duration;

    fn policy() -> TransitionPolicy {
        TransitionPolicy {
            failure_threshold: 10,
            auto_resolve_max_conflicts: 100,
        }
    }

    #[test]
    fn test_pending_to_in_progress() {
        let job = job_in(JobStatus::Pending);
        let now = job.start_time + Duration::seconds(1);

        let next = advance(&job, JobStatus::InProgress, &AdvanceFields::default(), policy(), now)
            .unwrap()
            .job;

        assert_eq!(next.status, JobStatus::InProgress);
        assert!(next.end_time.is_none());
        assert!(next.duration().is_none());
    }

    #[test]
    fn test_pending_cannot_skip_in_progress() {
        let job = job_in(JobStatus::Pending);
        let fields = AdvanceFields {
            records_processed: Some(100),
            ..Default::default()
        };

        let err = advance(&job, JobStatus::Success, &fields, policy(), job.start_time).unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidTransition {
                from: JobStatus::Pending,
                to: JobStatus::Success,
                ..
            }
        ));
    }

    #[test]
    fn test_success_sets_end_time_and_duration() {
        let job = job_in(JobStatus::InProgress);
        let now = job.start_time + Duration::seconds(4);
        let fields = AdvanceFields {
            records_processed: Some(100),
            data_size: Some(4_000),
            ..Default::default()
        };

        let next = advance(&job, JobStatus::Success, &fields, policy(), now)
            .unwrap()
            .job;

        assert_eq!(next.status, JobStatus::Success);
        assert_eq!(next.end_time, Some(now));
        assert_eq!(next.duration(), Some(Duration::seconds(4)));
        assert_eq!(next.throughput, 1_000.0);
    }

    #[test]
    fn test_reported_throughput_is_kept() {
        let job = job_in(JobStatus::InProgress);
        let fields = AdvanceFields {
            records_processed: Some(100),
            data_size: Some(4_000),
            throughput: Some(12.5),
            ..Default::default()
        };

        let next = advance(
            &job,
            JobStatus::Success,
            &fields,
            policy(),
            job.start_time + Duration::seconds(4),
        )
        .unwrap()
        .job;

        assert_eq!(next.throughput, 12.5);
    }

    #[test]
    fn test_zero_duration_throughput_is_zero() {
        let job = job_in(JobStatus::InProgress);
        assert_eq!(derive_throughput(500, &job.start_time, &job.start_time), 0.0);
    }

    #[test]
    fn test_success_requires_all_records() {
        let job = job_in(JobStatus::InProgress);
        let fields = AdvanceFields {
            records_processed: Some(99),
            ..Default::default()
        };

        let err = advance(&job, JobStatus::Success, &fields, policy(), job.start_time).unwrap_err();
        assert!(err.to_string().contains("99 of 100"));
    }

    #[test]
    fn test_success_blocked_by_failure_threshold() {
        let mut job = job_in(JobStatus::InProgress);
        job.records_processed = 100;
        job.error_count = 9;

        let fields = AdvanceFields {
            errors_increment: Some(1),
            ..Default::default()
        };
        assert!(advance(&job, JobStatus::Success, &fields, policy(), job.start_time).is_err());

        let ok = advance(
            &job,
            JobStatus::Success,
            &AdvanceFields::default(),
            policy(),
            job.start_time,
        );
        assert!(ok.is_ok());
    }

    #[test]
    fn test_success_blocked_by_manual_conflicts() {
        let mut job = job_in(JobStatus::InProgress);
        job.records_processed = 100;
        job.conflicts = 3;
        job.conflict_resolution = ConflictResolution::Manual;

        let err = advance(
            &job,
            JobStatus::Success,
            &AdvanceFields::default(),
            policy(),
            job.start_time,
        )
        .unwrap_err();

        assert!(err.to_string().contains("3 unresolved conflicts"));
    }

    #[test]
    fn test_processed_cannot_exceed_total() {
        let job = job_in(JobStatus::InProgress);
        let fields = AdvanceFields {
            records_processed: Some(101),
            ..Default::default()
        };

        assert!(advance(&job, JobStatus::InProgress, &fields, policy(), job.start_time).is_err());
    }

    #[test]
    fn test_reported_total_excludes_skipped_records() {
        let mut job = job_in(JobStatus::InProgress);
        job.records_total = 97;
        job.records_skipped = 3;

        let fields = AdvanceFields {
            records_total: Some(100),
            records_processed: Some(50),
            ..Default::default()
        };
        let next = advance(&job, JobStatus::InProgress, &fields, policy(), job.start_time)
            .unwrap()
            .job;
        assert_eq!(next.records_total, 97);
        assert_eq!(next.records_skipped, 3);

        let below = AdvanceFields {
            records_total: Some(2),
            ..Default::default()
        };
        let err = advance(&job, JobStatus::InProgress, &below, policy(), job.start_time).unwrap_err();
        assert!(err.to_string().contains("already skipped"));
    }

    #[test]
    fn test_progress_report_accumulates_errors_and_conflicts() {
        let mut job = job_in(JobStatus::InProgress);
        job.error_count = 2;
        job.conflict_resolution = ConflictResolution::Manual;

        let fields = AdvanceFields {
            records_processed: Some(40),
            errors_increment: Some(3),
            conflicts: Some(2),
            ..Default::default()
        };

        let transition =
            advance(&job, JobStatus::InProgress, &fields, policy(), job.start_time).unwrap();

        assert_eq!(transition.job.status, JobStatus::InProgress);
        assert_eq!(transition.job.records_processed, 40);
        assert_eq!(transition.job.error_count, 5);
        assert_eq!(transition.job.conflicts, 2);
        assert_eq!(
            transition.conflict_outcome,
            ResolutionOutcome::Held { pending: 2 }
        );
    }

    #[test]
    fn test_failed_requires_message() {
        let job = job_in(JobStatus::InProgress);

        assert!(
            advance(
                &job,
                JobStatus::Failed,
                &AdvanceFields::default(),
                policy(),
                job.start_time
            )
            .is_err()
        );

        let fields = AdvanceFields {
            error_message: Some("upstream timed out".to_string()),
            ..Default::default()
        };
        let next = advance(&job, JobStatus::Failed, &fields, policy(), job.start_time)
            .unwrap()
            .job;
        assert_eq!(next.error_message.as_deref(), Some("upstream timed out"));
        assert!(next.end_time.is_some());
    }

    #[test]
    fn test_error_message_rejected_unless_failing() {
        let job = job_in(JobStatus::InProgress);
        let fields = AdvanceFields {
            error_message: Some("nope".to_string()),
            ..Default::default()
        };

        assert!(advance(&job, JobStatus::InProgress, &fields, policy(), job.start_time).is_err());
    }

    #[test]
    fn test_terminal_jobs_reject_everything() {
        for status in [JobStatus::Success, JobStatus::Failed, JobStatus::Cancelled] {
            let job = job_in(status);
            for to in [
                JobStatus::Pending,
                JobStatus::InProgress,
                JobStatus::Success,
                JobStatus::Failed,
                JobStatus::Cancelled,
            ] {
                let fields = AdvanceFields {
                    error_message: (to == JobStatus::Failed).then(|| "x".to_string()),
                    ..Default::default()
                };
                assert!(advance(&job, to, &fields, policy(), job.start_time).is_err());
            }
        }
    }

    #[test]
    fn test_pause_only_from_in_progress() {
        let pending = job_in(JobStatus::Pending);
        assert!(pause(&pending, policy(), pending.start_time).is_err());

        let running = job_in(JobStatus::InProgress);
        let paused = pause(&running, policy(), running.start_time).unwrap();
        assert_eq!(paused.status, JobStatus::Cancelled);
        assert!(paused.end_time.is_some());
    }

    #[test]
    fn test_negative_counters_rejected() {
        let job = job_in(JobStatus::InProgress);
        let fields = AdvanceFields {
            data_size: Some(-1),
            ..Default::default()
        };

        assert!(advance(&job, JobStatus::InProgress, &fields, policy(), job.start_time).is_err());
    }
}
