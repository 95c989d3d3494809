//! Conflict resolution strategies.
//!
//! Conflicts are data on the job, never errors. Newly detected conflicts are
//! handled with the job's selected strategy; an operator decision goes
//! through [`resolve`].

use chrono::{DateTime, FixedOffset};
use serde::Serialize;
use utoipa::ToSchema;

use crate::error::EngineError;
use crate::models::sync_job::{ConflictResolution, JobStatus, Model};

/// What the resolver did to a job's outstanding conflicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ResolutionOutcome {
    /// Most recent write won for every conflicting record.
    Resolved { cleared: i64 },
    /// Conflicting records were excluded from the job.
    Skipped { excluded: i64 },
    /// Too many conflicts to clear automatically; the job now needs review.
    Escalated { pending: i64 },
    /// Left untouched until an operator decides.
    Held { pending: i64 },
    /// Nothing was outstanding.
    Clean,
}

/// Apply the job's own strategy after new conflicts were reported.
///
/// `auto` only clears up to `auto_max` conflicts; above that the job is
/// switched to `manual` and held.
pub fn apply_detected(job: &mut Model, auto_max: u64) -> ResolutionOutcome {
    if job.conflicts <= 0 {
        return ResolutionOutcome::Clean;
    }

    match job.conflict_resolution {
        ConflictResolution::Auto if job.conflicts as u64 <= auto_max => clear(job),
        ConflictResolution::Auto => {
            job.conflict_resolution = ConflictResolution::Manual;
            ResolutionOutcome::Escalated {
                pending: job.conflicts,
            }
        }
        ConflictResolution::Skip => skip(job),
        ConflictResolution::Manual => ResolutionOutcome::Held {
            pending: job.conflicts,
        },
    }
}

/// Apply an operator's decision to an in-progress job.
///
/// Returns `None` when there is nothing to resolve.
pub fn resolve(
    job: &Model,
    strategy: ConflictResolution,
    now: DateTime<FixedOffset>,
) -> Result<Option<(Model, ResolutionOutcome)>, EngineError> {
    if job.status != JobStatus::InProgress {
        return Err(EngineError::invalid_transition(
            job.id,
            job.status,
            job.status,
            "conflicts can only be resolved while the job is in progress",
        ));
    }

    if job.conflicts <= 0 {
        return Ok(None);
    }

    let mut next = job.clone();
    next.conflict_resolution = strategy;
    next.updated_at = now;

    let outcome = match strategy {
        ConflictResolution::Auto => clear(&mut next),
        ConflictResolution::Skip => skip(&mut next),
        ConflictResolution::Manual => ResolutionOutcome::Held {
            pending: next.conflicts,
        },
    };

    Ok(Some((next, outcome)))
}

fn clear(job: &mut Model) -> ResolutionOutcome {
    let cleared = job.conflicts;
    job.conflicts = 0;
    ResolutionOutcome::Resolved { cleared }
}

/// Exclude conflicting records from the job. Conflicts beyond the records
/// still in the job cannot be excluded and stay outstanding.
fn skip(job: &mut Model) -> ResolutionOutcome {
    let excluded = job.conflicts.min(job.records_total);
    job.records_total -= excluded;
    job.records_skipped += excluded;
    job.records_processed = job.records_processed.min(job.records_total);
    job.conflicts -= excluded;
    ResolutionOutcome::Skipped { excluded }
}
