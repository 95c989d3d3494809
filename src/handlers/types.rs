//! # Common API Types
//!
//! Shared response structures used across handlers.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::SyncJobRecord;

/// Paginated job listing
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct JobsPage {
    /// Jobs on the current page, most recent first
    pub data: Vec<SyncJobRecord>,
    /// Opaque cursor for fetching the next page (null if this is the last page)
    pub next_cursor: Option<String>,
    /// Convenience field indicating if more pages exist
    pub has_more: bool,
}

impl JobsPage {
    pub fn new(data: Vec<SyncJobRecord>, next_cursor: Option<String>) -> Self {
        let has_more = next_cursor.is_some();
        Self {
            data,
            next_cursor,
            has_more,
        }
    }
}

/// Health check response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    #[schema(example = "ok")]
    pub status: String,
    #[schema(example = "ok")]
    pub database: String,
}
