//! Retry job construction.
//!
//! A retry is a brand new `Pending` job linked to the job it replaces. The
//! source row is never touched. Every retry in a lineage, whichever job it
//! was created from, draws from the same budget.

use chrono::{DateTime, FixedOffset};
use uuid::Uuid;

use crate::error::EngineError;
use crate::models::sync_job::{JobStatus, Model};

/// Actor recorded on jobs created by the retry scheduler.
pub const RETRY_TRIGGER: &str = "retry";

/// Reject retries of jobs that are not failed or cancelled.
pub fn ensure_retryable(source: &Model) -> Result<(), EngineError> {
    if source.status.is_retryable() {
        Ok(())
    } else {
        Err(EngineError::invalid_transition(
            source.id,
            source.status,
            JobStatus::Pending,
            "only failed or cancelled jobs can be retried",
        ))
    }
}

/// Build the replacement job for `source`.
///
/// `retries_used` is the number of retries already created in the source's
/// lineage. Progress, errors and conflicts start from zero; records skipped
/// on the source are offered again.
pub fn build_retry(
    source: &Model,
    retries_used: u64,
    max_retries: u32,
    now: DateTime<FixedOffset>,
) -> Result<Model, EngineError> {
    ensure_retryable(source)?;

    if retries_used >= u64::from(max_retries) {
        return Err(EngineError::RetryLimitExceeded {
            job_id: source.id,
            lineage_root: source.lineage_root,
            max_retries,
        });
    }

    let retry_depth = i32::try_from(retries_used + 1).map_err(|_| {
        EngineError::RetryLimitExceeded {
            job_id: source.id,
            lineage_root: source.lineage_root,
            max_retries,
        }
    })?;

    Ok(Model {
        id: Uuid::new_v4(),
        integration_id: source.integration_id.clone(),
        integration_name: source.integration_name.clone(),
        status: JobStatus::Pending,
        sync_type: source.sync_type,
        triggered_by: RETRY_TRIGGER.to_string(),
        start_time: now,
        end_time: None,
        records_processed: 0,
        records_total: source.records_total + source.records_skipped,
        records_skipped: 0,
        error_count: 0,
        error_message: None,
        data_size: 0,
        throughput: 0.0,
        conflicts: 0,
        conflict_resolution: source.conflict_resolution,
        retry_of: Some(source.id),
        lineage_root: source.lineage_root,
        retry_depth,
        version: 0,
        created_at: now,
        updated_at: now,
    })
}
