//! SyncJob entity model
//!
//! This module contains the SeaORM entity model for the sync_jobs table. A row
//! is one execution attempt of moving data for one integration; rows are never
//! deleted and retries are linked through `retry_of` and `lineage_root`.

use chrono::{DateTime, Utc};
use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// SyncJob entity representing one synchronization attempt
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "sync_jobs")]
pub struct Model {
    /// Unique identifier for the sync job (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Identifier of the external integration this job moves data for
    pub integration_id: String,

    /// Display name of the integration, kept for search and history
    pub integration_name: String,

    /// Current lifecycle status
    pub status: JobStatus,

    /// Kind of synchronization performed
    pub sync_type: SyncType,

    /// Actor that created the job (scheduler, user id, or `retry`)
    pub triggered_by: String,

    /// Set once at creation
    pub start_time: DateTimeWithTimeZone,

    /// Set on the terminal transition
    pub end_time: Option<DateTimeWithTimeZone>,

    pub records_processed: i64,

    pub records_total: i64,

    /// Records excluded from the job by the `skip` conflict strategy
    pub records_skipped: i64,

    pub error_count: i64,

    /// Present only on failed jobs
    pub error_message: Option<String>,

    /// Bytes moved by the job
    pub data_size: i64,

    /// Bytes per second during the active period
    #[sea_orm(column_type = "Double")]
    pub throughput: f64,

    /// Outstanding data conflicts awaiting resolution
    pub conflicts: i64,

    pub conflict_resolution: ConflictResolution,

    /// The job this one retried, if any
    pub retry_of: Option<Uuid>,

    /// First job of the retry chain (the job's own id for originals)
    pub lineage_root: Uuid,

    /// 0 for originals, n for the n-th retry created in the chain
    pub retry_depth: i32,

    /// Optimistic concurrency counter, bumped on every mutation
    pub version: i64,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

/// Lifecycle status of a sync job
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
    Default,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[sea_orm(string_value = "pending")]
    #[default]
    Pending,

    #[sea_orm(string_value = "in_progress")]
    InProgress,

    #[sea_orm(string_value = "success")]
    Success,

    #[sea_orm(string_value = "failed")]
    Failed,

    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

impl JobStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::InProgress => "in_progress",
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Terminal states accept no further transitions.
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Success | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Only failed or cancelled jobs may be retried.
    pub const fn is_retryable(self) -> bool {
        matches!(self, JobStatus::Failed | JobStatus::Cancelled)
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(JobStatus::Pending),
            "in_progress" => Some(JobStatus::InProgress),
            "success" => Some(JobStatus::Success),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of synchronization a job performs
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum SyncType {
    #[sea_orm(string_value = "full")]
    Full,

    #[sea_orm(string_value = "incremental")]
    Incremental,

    #[sea_orm(string_value = "manual")]
    Manual,
}

impl SyncType {
    pub const fn as_str(self) -> &'static str {
        match self {
            SyncType::Full => "full",
            SyncType::Incremental => "incremental",
            SyncType::Manual => "manual",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "full" => Some(SyncType::Full),
            "incremental" => Some(SyncType::Incremental),
            "manual" => Some(SyncType::Manual),
            _ => None,
        }
    }
}

/// Strategy applied to data conflicts detected during a sync
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
    Default,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    /// Most recent write wins
    #[sea_orm(string_value = "auto")]
    #[default]
    Auto,

    /// Held until an operator supplies a decision
    #[sea_orm(string_value = "manual")]
    Manual,

    /// Conflicting records are excluded from the job
    #[sea_orm(string_value = "skip")]
    Skip,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "Entity",
        from = "Column::RetryOf",
        to = "Column::Id"
    )]
    RetryOf,
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// `end_time - start_time`, absent while the job is not terminal.
    pub fn duration(&self) -> Option<chrono::Duration> {
        if !self.status.is_terminal() {
            return None;
        }
        self.end_time.map(|end| end - self.start_time)
    }

    /// Duration in milliseconds, used by the JSON schema and metrics.
    pub fn duration_ms(&self) -> Option<i64> {
        self.duration().map(|d| d.num_milliseconds())
    }

    pub fn start_time_utc(&self) -> DateTime<Utc> {
        self.start_time.with_timezone(&Utc)
    }

    /// A job held for review: in progress with unresolved conflicts.
    pub fn requires_review(&self) -> bool {
        self.status == JobStatus::InProgress && self.conflicts > 0
    }
}

/// Stable, field-for-field serialization of a job used by the HTTP API and
/// history export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SyncJobRecord {
    #[schema(example = "550e8400-e29b-41d4-a716-446655440000")]
    pub id: Uuid,
    #[schema(example = "int-warehouse")]
    pub integration_id: String,
    #[schema(example = "Warehouse Postgres")]
    pub integration_name: String,
    pub status: JobStatus,
    pub sync_type: SyncType,
    #[schema(example = "scheduler")]
    pub triggered_by: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// `end_time - start_time` in milliseconds, absent until the job is terminal
    pub duration_ms: Option<i64>,
    pub records_processed: i64,
    pub records_total: i64,
    pub records_skipped: i64,
    pub error_count: i64,
    pub error_message: Option<String>,
    /// Bytes moved
    pub data_size: i64,
    /// Bytes per second
    pub throughput: f64,
    pub conflicts: i64,
    pub conflict_resolution: ConflictResolution,
    pub retry_of: Option<Uuid>,
    pub lineage_root: Uuid,
    pub retry_depth: i32,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Model> for SyncJobRecord {
    fn from(model: Model) -> Self {
        let duration_ms = model.duration_ms();
        Self {
            id: model.id,
            integration_id: model.integration_id,
            integration_name: model.integration_name,
            status: model.status,
            sync_type: model.sync_type,
            triggered_by: model.triggered_by,
            start_time: model.start_time.with_timezone(&Utc),
            end_time: model.end_time.map(|end| end.with_timezone(&Utc)),
            duration_ms,
            records_processed: model.records_processed,
            records_total: model.records_total,
            records_skipped: model.records_skipped,
            error_count: model.error_count,
            error_message: model.error_message,
            data_size: model.data_size,
            throughput: model.throughput,
            conflicts: model.conflicts,
            conflict_resolution: model.conflict_resolution,
            retry_of: model.retry_of,
            lineage_root: model.lineage_root,
            retry_depth: model.retry_depth,
            version: model.version,
            created_at: model.created_at.with_timezone(&Utc),
            updated_at: model.updated_at.with_timezone(&Utc),
        }
    }
}
