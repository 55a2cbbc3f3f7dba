//! Image upload
//!
//! POST /upload stores the images and hands back a job id to stream later.

use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;

use crate::{
    error::{ApiError, ApiResult},
    services::{UploadError, UploadedFile},
    AppState,
};

/// Multipart field names carrying images
const IMAGE_FIELDS: &[&str] = &["image", "images", "images[]"];

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub job_id: String,
}

impl From<UploadError> for ApiError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::NoFiles => ApiError::MissingFile,
            UploadError::BadExtension(name) => ApiError::BadExtension(name),
            UploadError::Io(e) => ApiError::Io(e),
        }
    }
}

/// Multipart field naming the inference model in blocking mode
const MODEL_FIELD: &str = "model";

/// What a multipart analysis form carries
#[derive(Debug, Default)]
pub struct UploadForm {
    /// Non-empty image parts, in order
    pub files: Vec<UploadedFile>,
    pub model: Option<String>,
}

pub async fn read_form(mut multipart: Multipart) -> ApiResult<UploadForm> {
    let mut form = UploadForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("malformed multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name == MODEL_FIELD {
            let model = field
                .text()
                .await
                .map_err(|e| ApiError::BadRequest(format!("failed to read model field: {}", e)))?;
            form.model = Some(model).filter(|m| !m.trim().is_empty());
            continue;
        }
        if !IMAGE_FIELDS.contains(&name.as_str()) {
            continue;
        }

        let file_name = field.file_name().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(format!("failed to read upload: {}", e)))?;

        if file_name.is_empty() || bytes.is_empty() {
            continue;
        }
        form.files.push(UploadedFile {
            file_name,
            bytes: bytes.to_vec(),
        });
    }

    Ok(form)
}

/// Store uploaded images and return their paths
pub async fn store_images(state: &AppState, files: Vec<UploadedFile>) -> ApiResult<Vec<PathBuf>> {
    Ok(state.uploads.save_all(files).await?)
}

/// POST /upload
pub async fn upload(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<(StatusCode, Json<UploadResponse>)> {
    let form = read_form(multipart).await?;
    let paths = store_images(&state, form.files).await?;
    let refs: Vec<String> = paths.iter().map(|p| p.to_string_lossy().into_owned()).collect();

    let job_id = match state.jobs.create_job(refs).await {
        Ok(id) => id,
        Err(e) => {
            state.uploads.remove(&paths).await;
            return Err(e.into());
        }
    };

    info!(job_id = %job_id, images = paths.len(), "Upload accepted");
    Ok((StatusCode::CREATED, Json(UploadResponse { job_id })))
}

pub fn upload_routes() -> Router<AppState> {
    Router::new().route("/upload", post(upload))
}
