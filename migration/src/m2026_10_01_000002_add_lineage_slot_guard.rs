//! Adds a unique index so two retries can never occupy the same slot of a lineage chain.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_index(
                Index::create()
                    .name("idx_sync_jobs_lineage_slot")
                    .table(SyncJobs::Table)
                    .col(SyncJobs::LineageRoot)
                    .col(SyncJobs::RetryDepth)
                    .unique()
                    .if_not_exists()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_sync_jobs_lineage_slot")
                    .table(SyncJobs::Table)
                    .to_owned(),
            )
            .await
    }
}

#[derive(DeriveIden)]
enum SyncJobs {
    Table,
    LineageRoot,
    RetryDepth,
}
