//! Job store connection.
//!
//! The server and the export binary both open the store through [`init_pool`].
//! Postgres is the production backend; SQLite is accepted for local runs.

use anyhow::{Context, Result};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Statement};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::AppConfig;

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("job store unreachable after {attempts} attempts: {source}")]
    Unreachable {
        attempts: u32,
        #[source]
        source: sea_orm::DbErr,
    },
    #[error("Invalid database configuration: {message}")]
    InvalidConfiguration { message: String },
}

const CONNECT_ATTEMPTS: u32 = 5;
const FIRST_BACKOFF: Duration = Duration::from_millis(100);

/// Open the job store pool, retrying transient failures with doubling backoff.
///
/// ```no_run
/// use sync_engine::{config::AppConfig, db::init_pool};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let db = init_pool(&AppConfig::default()).await?;
///     Ok(())
/// }
/// ```
pub async fn init_pool(cfg: &AppConfig) -> Result<DatabaseConnection> {
    let options = pool_options(cfg)?;
    let db = connect_with_backoff(options, CONNECT_ATTEMPTS, FIRST_BACKOFF).await?;
    Ok(db)
}

fn pool_options(cfg: &AppConfig) -> Result<ConnectOptions, DatabaseError> {
    let url = cfg.database_url.trim();
    if url.is_empty() {
        return Err(DatabaseError::InvalidConfiguration {
            message: "Database URL cannot be empty".to_string(),
        });
    }

    // Every connection to `sqlite::memory:` opens its own empty database.
    let max_connections = if url.starts_with("sqlite::memory:") {
        1
    } else {
        cfg.db_max_connections
    };

    let mut options = ConnectOptions::new(url);
    options
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_millis(cfg.db_acquire_timeout_ms))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .sqlx_logging(true)
        .sqlx_logging_level(log::LevelFilter::Debug);
    Ok(options)
}

async fn connect_with_backoff(
    options: ConnectOptions,
    attempts: u32,
    first_backoff: Duration,
) -> Result<DatabaseConnection, DatabaseError> {
    let mut backoff = first_backoff;
    let mut attempt = 1;

    loop {
        match Database::connect(options.clone()).await {
            Ok(db) => {
                info!(attempt, "Connected to job store");
                return Ok(db);
            }
            Err(source) if attempt >= attempts => {
                return Err(DatabaseError::Unreachable { attempts, source });
            }
            Err(err) => {
                warn!(
                    attempt,
                    error = %err,
                    backoff_ms = backoff.as_millis() as u64,
                    "Job store connection failed, backing off"
                );
                sleep(backoff).await;
                backoff *= 2;
                attempt += 1;
            }
        }
    }
}

/// `SELECT 1` against the store; backs `/healthz`.
pub async fn health_check(db: &DatabaseConnection) -> Result<()> {
    let stmt = Statement::from_string(db.get_database_backend(), "SELECT 1".to_string());
    db.query_one(stmt)
        .await
        .context("Database health check failed")?;
    Ok(())
}
