//! Database migrations for the sync engine.
//!
//! This module contains all database migrations using SeaORM Migration.

pub use sea_orm_migration::prelude::*;

mod m2026_10_01_000001_create_sync_jobs;
mod m2026_10_01_000002_add_lineage_slot_guard;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2026_10_01_000001_create_sync_jobs::Migration),
            Box::new(m2026_10_01_000002_add_lineage_slot_guard::Migration),
        ]
    }
}
