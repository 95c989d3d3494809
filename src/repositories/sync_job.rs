//! # SyncJob Repository
//!
//! Durable job store over the `sync_jobs` table. Rows are only ever inserted
//! or updated under a version check; nothing here deletes a job.

use sea_orm::sea_query::{Condition, Expr, Func, LikeExpr};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, IntoActiveModel,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect,
};
use uuid::Uuid;

use crate::cursor::JobCursor;
use crate::models::sync_job::{ActiveModel, Column, Entity, JobStatus, Model, SyncType};

/// Predicate combination accepted by job listings. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobFilter {
    /// Case-insensitive substring of `integration_name` or `triggered_by`
    pub search: Option<String>,
    pub status: Option<JobStatus>,
    pub sync_type: Option<SyncType>,
}

impl JobFilter {
    /// Whether `job` satisfies the filter, mirroring the SQL predicate.
    pub fn matches(&self, job: &Model) -> bool {
        if self.status.is_some_and(|status| status != job.status) {
            return false;
        }
        if self.sync_type.is_some_and(|sync_type| sync_type != job.sync_type) {
            return false;
        }
        match self.normalized_search() {
            Some(term) => {
                job.integration_name.to_lowercase().contains(&term)
                    || job.triggered_by.to_lowercase().contains(&term)
            }
            None => true,
        }
    }

    fn normalized_search(&self) -> Option<String> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|term| !term.is_empty())
            .map(str::to_lowercase)
    }
}

/// Repository for sync job database operations
#[derive(Clone)]
pub struct SyncJobRepository {
    db: DatabaseConnection,
}

impl SyncJobRepository {
    /// Create a new SyncJobRepository with the given database connection
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Insert a fully populated job row.
    pub async fn insert(&self, job: Model) -> Result<Model, DbErr> {
        let active: ActiveModel = job.into_active_model().reset_all();
        active.insert(&self.db).await
    }

    pub async fn find(&self, job_id: Uuid) -> Result<Option<Model>, DbErr> {
        Entity::find_by_id(job_id).one(&self.db).await
    }

    /// Persist `next` only if the stored row still carries `expected_version`.
    ///
    /// The stored version becomes `expected_version + 1`. Returns `None` when
    /// another writer got there first.
    pub async fn update_if_version(
        &self,
        mut next: Model,
        expected_version: i64,
    ) -> Result<Option<Model>, DbErr> {
        let job_id = next.id;
        next.version = expected_version + 1;

        let mut active: ActiveModel = next.into_active_model().reset_all();
        active.id = sea_orm::ActiveValue::NotSet;
        active.created_at = sea_orm::ActiveValue::NotSet;

        let result = Entity::update_many()
            .set(active)
            .filter(Column::Id.eq(job_id))
            .filter(Column::Version.eq(expected_version))
            .exec(&self.db)
            .await?;

        if result.rows_affected == 0 {
            return Ok(None);
        }

        self.find(job_id).await
    }

    /// One page of jobs matching `filter`, most recent `start_time` first.
    pub async fn list(
        &self,
        filter: &JobFilter,
        after: Option<JobCursor>,
        limit: u64,
    ) -> Result<Vec<Model>, DbErr> {
        let mut query = Entity::find();

        if let Some(status) = filter.status {
            query = query.filter(Column::Status.eq(status));
        }

        if let Some(sync_type) = filter.sync_type {
            query = query.filter(Column::SyncType.eq(sync_type));
        }

        if let Some(term) = filter.normalized_search() {
            let pattern = format!("%{}%", escape_like(&term));
            query = query.filter(
                Condition::any()
                    .add(
                        Expr::expr(Func::lower(Expr::col(Column::IntegrationName)))
                            .like(LikeExpr::new(pattern.clone()).escape('\\')),
                    )
                    .add(
                        Expr::expr(Func::lower(Expr::col(Column::TriggeredBy)))
                            .like(LikeExpr::new(pattern).escape('\\')),
                    ),
            );
        }

        if let Some(cursor) = after {
            let start_time = cursor.start_time.fixed_offset();
            query = query.filter(
                Condition::any()
                    .add(Column::StartTime.lt(start_time))
                    .add(
                        Condition::all()
                            .add(Column::StartTime.eq(start_time))
                            .add(Column::Id.lt(cursor.id)),
                    ),
            );
        }

        query
            .order_by_desc(Column::StartTime)
            .order_by_desc(Column::Id)
            .limit(limit)
            .all(&self.db)
            .await
    }

    /// Every job of a retry chain, original first.
    pub async fn lineage(&self, lineage_root: Uuid) -> Result<Vec<Model>, DbErr> {
        Entity::find()
            .filter(Column::LineageRoot.eq(lineage_root))
            .order_by_asc(Column::RetryDepth)
            .all(&self.db)
            .await
    }

    /// Number of retries already created in a chain.
    pub async fn count_retries(&self, lineage_root: Uuid) -> Result<u64, DbErr> {
        Entity::find()
            .filter(Column::LineageRoot.eq(lineage_root))
            .filter(Column::RetryDepth.gt(0))
            .count(&self.db)
            .await
    }

    /// Keyset scan over the whole store in id order, used by aggregation and export.
    pub async fn scan_page(
        &self,
        after: Option<Uuid>,
        status: Option<JobStatus>,
        page_size: u64,
    ) -> Result<Vec<Model>, DbErr> {
        let mut query = Entity::find();

        if let Some(after) = after {
            query = query.filter(Column::Id.gt(after));
        }

        if let Some(status) = status {
            query = query.filter(Column::Status.eq(status));
        }

        query
            .order_by_asc(Column::Id)
            .limit(page_size)
            .all(&self.db)
            .await
    }
}

fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
