//! Test utilities for engine and database testing.
//!
//! Sets up in-memory SQLite databases with migrations applied and builds
//! engines and jobs on top of them.

use anyhow::Result;
use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use std::sync::Arc;
use sync_engine::{
    config::EngineConfig,
    engine::{AdvanceFields, NewSyncJob, SyncEngine},
    models::{ConflictResolution, JobStatus, SyncType, sync_job::Model},
    repositories::SyncJobRepository,
};

/// Sets up an in-memory SQLite database with all migrations applied.
///
/// The pool is capped at one connection so every query sees the same
/// in-memory database.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let mut options = ConnectOptions::new("sqlite::memory:");
    options.max_connections(1).sqlx_logging(false);
    let db = Database::connect(options).await?;

    Migrator::up(&db, None).await?;

    Ok(db)
}

/// Engine over a fresh database with the given policy.
#[allow(dead_code)]
pub async fn setup_engine(config: EngineConfig) -> Result<Arc<SyncEngine>> {
    let db = setup_test_db().await?;
    Ok(Arc::new(SyncEngine::new(SyncJobRepository::new(db), config)))
}

/// Engine with default policy.
#[allow(dead_code)]
pub async fn default_engine() -> Result<Arc<SyncEngine>> {
    setup_engine(EngineConfig::default()).await
}

/// Creation request for a named integration.
#[allow(dead_code)]
pub fn new_job(integration_name: &str, records_total: i64) -> NewSyncJob {
    NewSyncJob {
        integration_id: format!("int-{}", integration_name.to_lowercase().replace(' ', "-")),
        integration_name: integration_name.to_string(),
        sync_type: SyncType::Full,
        triggered_by: "scheduler".to_string(),
        records_total,
        conflict_resolution: ConflictResolution::Auto,
    }
}

/// Create a job and move it to `InProgress`.
#[allow(dead_code)]
pub async fn running_job(engine: &SyncEngine, records_total: i64) -> Result<Model> {
    let job = engine.create_job(new_job("Salesforce", records_total)).await?;
    let job = engine
        .advance(job.id, JobStatus::InProgress, AdvanceFields::default())
        .await?;
    Ok(job)
}

/// Create a job and drive it to `Failed`.
#[allow(dead_code)]
pub async fn failed_job(engine: &SyncEngine, records_total: i64) -> Result<Model> {
    let job = running_job(engine, records_total).await?;
    let job = engine
        .advance(
            job.id,
            JobStatus::Failed,
            AdvanceFields {
                errors_increment: Some(1),
                error_message: Some("upstream timeout".to_string()),
                ..Default::default()
            },
        )
        .await?;
    Ok(job)
}
