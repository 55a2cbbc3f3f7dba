//! mealscan-ai library interface
//!
//! Meal photo analysis service: upload images, stream the staged analysis
//! over SSE, poll partial progress, or run it in one blocking request.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use axum::{extract::DefaultBodyLimit, Router};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::{ServiceConfig, ServicePaths};
use crate::pipeline::{Pipeline, PipelineConfig};
use crate::services::{InferenceService, JobManager, PartialStore, UploadStore};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    pub config: Arc<ServiceConfig>,
    pub jobs: JobManager,
    pub uploads: UploadStore,
    pub partials: PartialStore,
    pub pipeline: Pipeline,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        config: ServiceConfig,
        paths: &ServicePaths,
        inference: Arc<dyn InferenceService>,
    ) -> Self {
        let partials_dir = config
            .partials
            .local_fallback
            .then(|| paths.partials_dir.clone());

        Self {
            jobs: JobManager::new(db.clone()),
            uploads: UploadStore::new(&paths.upload_dir, &config.allowed_extensions),
            partials: PartialStore::with_sqlite(db.clone(), partials_dir),
            pipeline: Pipeline::new(inference, PipelineConfig::from_service(&config)),
            config: Arc::new(config),
            db,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    let body_limit = state.config.max_upload_bytes;

    Router::new()
        .merge(api::upload_routes())
        .merge(api::analyze_routes())
        .merge(api::stream_routes())
        .merge(api::status_routes())
        .merge(api::history_routes())
        .merge(api::health_routes())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
