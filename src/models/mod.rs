//! # Data Models
//!
//! This module contains the data models used throughout the sync engine.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod sync_job;

pub use sync_job::Entity as SyncJob;
pub use sync_job::{ConflictResolution, JobStatus, SyncJobRecord, SyncType};

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "sync-engine".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
