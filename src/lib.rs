//! # Sync Engine Library
//!
//! Tracks integration synchronization jobs through their lifecycle: state
//! transitions, retries, conflict handling, and aggregate metrics, exposed
//! over an HTTP API.

pub mod config;
pub mod cursor;
pub mod db;
pub mod engine;
pub mod error;
pub mod export;
pub mod handlers;
pub mod models;
pub mod repositories;
pub mod server;
pub mod telemetry;
pub use migration;
