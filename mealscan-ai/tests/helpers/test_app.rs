//! Test application wiring
//!
//! A full router over a temp-folder database and upload directory.

use axum::{body::Body, Router};
use http_body_util::BodyExt;
use mealscan_ai::config::{ServiceConfig, ServicePaths};
use mealscan_ai::services::InferenceService;
use mealscan_ai::AppState;
use sqlx::SqlitePool;
use std::sync::Arc;
use tempfile::TempDir;

pub const BOUNDARY: &str = "mealscan-test-boundary";

/// TempDir must be kept alive for duration of test
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub pool: SqlitePool,
    pub paths: ServicePaths,
    pub _temp_dir: TempDir,
}

impl TestApp {
    pub async fn new(inference: Arc<dyn InferenceService>) -> Self {
        Self::with_config(inference, ServiceConfig::default()).await
    }

    pub async fn with_config(inference: Arc<dyn InferenceService>, config: ServiceConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let paths = ServicePaths::under(temp_dir.path());
        paths.ensure_directories().expect("Failed to create folders");

        let pool = mealscan_ai::db::init_database_pool(&paths.database_path)
            .await
            .expect("Failed to open test database");

        let state = AppState::new(pool.clone(), config, &paths, inference);
        let router = mealscan_ai::build_router(state.clone());

        Self {
            router,
            state,
            pool,
            paths,
            _temp_dir: temp_dir,
        }
    }
}

/// multipart/form-data body with one part per `(field, file_name, bytes)`.
///
/// An empty `file_name` makes a plain text field.
pub fn multipart_body(parts: &[(&str, &str, &[u8])]) -> Body {
    let mut body: Vec<u8> = Vec::new();
    for (field, file_name, bytes) in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        if file_name.is_empty() {
            body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", field).as_bytes(),
            );
        } else {
            body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                    field, file_name
                )
                .as_bytes(),
            );
            body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
        }
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    Body::from(body)
}

/// Collect a response body as UTF-8 text
pub async fn read_body(body: Body) -> String {
    let bytes = body.collect().await.expect("Failed to read body").to_bytes();
    String::from_utf8(bytes.to_vec()).expect("Body is not UTF-8")
}
