//! # Server Configuration
//!
//! Router assembly, shared state and the serve loop for the sync engine API.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{
    Router, middleware,
    routing::{get, post, put},
};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::AppConfig;
use crate::engine::{MetricsRefresher, SyncEngine};
use crate::handlers;
use crate::repositories::SyncJobRepository;
use crate::telemetry;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub engine: Arc<SyncEngine>,
}

/// Build the state for a configuration and an open connection.
pub fn create_app_state(config: &AppConfig, db: DatabaseConnection) -> AppState {
    let engine = SyncEngine::new(SyncJobRepository::new(db.clone()), config.engine.clone());
    AppState {
        db,
        engine: Arc::new(engine),
    }
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .route(
            "/jobs",
            get(handlers::jobs::list_jobs).post(handlers::jobs::create_job),
        )
        .route("/jobs/{id}", get(handlers::jobs::get_job))
        .route("/jobs/{id}/lineage", get(handlers::jobs::get_lineage))
        .route("/jobs/{id}/advance", post(handlers::jobs::advance_job))
        .route("/jobs/{id}/pause", post(handlers::jobs::pause_job))
        .route("/jobs/{id}/retry", post(handlers::jobs::retry_job))
        .route(
            "/jobs/{id}/conflicts/resolve",
            post(handlers::jobs::resolve_conflicts),
        )
        .route("/export/jobs", get(handlers::jobs::export_jobs))
        .route("/metrics", get(handlers::metrics::get_metrics))
        .route("/metrics/schedule", put(handlers::metrics::put_schedule))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(telemetry::trace_context_middleware))
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
}

/// Starts the server and the metrics refresher; returns after a graceful shutdown.
pub async fn run_server(config: AppConfig, db: DatabaseConnection) -> anyhow::Result<()> {
    let addr = config.bind_addr().context("Invalid server address")?;
    let refresh_interval = Duration::from_secs(config.engine.metrics_interval_seconds);

    let state = create_app_state(&config, db);
    let shutdown = CancellationToken::new();

    let refresher = MetricsRefresher::new(Arc::clone(&state.engine), refresh_interval);
    let refresher_handle = tokio::spawn(refresher.run(shutdown.child_token()));

    let app = create_app(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(%addr, profile = %config.profile, "Server listening");

    let serve_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = shutdown_signal() => {}
                _ = serve_shutdown.cancelled() => {}
            }
            info!("Shutdown signal received, draining requests");
        })
        .await
        .context("Server error")?;

    shutdown.cancel();
    if let Err(err) = refresher_handle.await {
        tracing::warn!(error = ?err, "Metrics refresher task ended abnormally");
    }

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = ?err, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::healthz,
        crate::handlers::jobs::list_jobs,
        crate::handlers::jobs::create_job,
        crate::handlers::jobs::get_job,
        crate::handlers::jobs::get_lineage,
        crate::handlers::jobs::advance_job,
        crate::handlers::jobs::pause_job,
        crate::handlers::jobs::retry_job,
        crate::handlers::jobs::resolve_conflicts,
        crate::handlers::jobs::export_jobs,
        crate::handlers::metrics::get_metrics,
        crate::handlers::metrics::put_schedule,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::models::SyncJobRecord,
            crate::models::JobStatus,
            crate::models::SyncType,
            crate::models::ConflictResolution,
            crate::handlers::types::JobsPage,
            crate::handlers::types::HealthResponse,
            crate::handlers::jobs::AdvanceRequest,
            crate::handlers::jobs::ResolveConflictsRequest,
            crate::handlers::jobs::ResolveConflictsResponse,
            crate::engine::NewSyncJob,
            crate::engine::AdvanceFields,
            crate::engine::ResolutionOutcome,
            crate::engine::SyncMetrics,
            crate::engine::ScheduleWindow,
            crate::error::ApiError,
        )
    ),
    tags(
        (name = "root", description = "Service information and health"),
        (name = "jobs", description = "Sync job inspection and control"),
        (name = "metrics", description = "Aggregate sync statistics"),
    ),
    info(
        title = "Sync Engine API",
        description = "State tracking, retries and conflict handling for integration sync jobs",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
