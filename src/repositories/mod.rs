//! # Repository Layer
//!
//! Repository implementations that encapsulate SeaORM operations for the
//! job store.

pub mod sync_job;

pub use sync_job::{JobFilter, SyncJobRepository};
