//! Uploaded image storage
//!
//! Files land in the upload folder as `<base>-<YYYYmmdd-HHMMSS>-<8 hex>.<ext>`.
//! Every file of a request is checked before any is written.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("no image uploaded")]
    NoFiles,

    #[error("unsupported file extension: {0}")]
    BadExtension(String),

    #[error("failed to store upload: {0}")]
    Io(#[from] std::io::Error),
}

/// One file part of a multipart upload
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct UploadStore {
    upload_dir: PathBuf,
    allowed_extensions: Vec<String>,
}

impl UploadStore {
    pub fn new(upload_dir: impl Into<PathBuf>, allowed_extensions: &[String]) -> Self {
        Self {
            upload_dir: upload_dir.into(),
            allowed_extensions: allowed_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    /// Lowercased extension of `file_name` if it is whitelisted
    pub fn check_extension(&self, file_name: &str) -> Result<String, UploadError> {
        let ext = file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .ok_or_else(|| UploadError::BadExtension(file_name.to_string()))?;

        if self.allowed_extensions.iter().any(|allowed| *allowed == ext) {
            Ok(ext)
        } else {
            Err(UploadError::BadExtension(file_name.to_string()))
        }
    }

    /// Store all files; returns their paths in upload order
    pub async fn save_all(&self, files: Vec<UploadedFile>) -> Result<Vec<PathBuf>, UploadError> {
        if files.is_empty() {
            return Err(UploadError::NoFiles);
        }

        let mut checked = Vec::with_capacity(files.len());
        for file in files {
            let ext = self.check_extension(&file.file_name)?;
            checked.push((file, ext));
        }

        tokio::fs::create_dir_all(&self.upload_dir).await?;

        let now = Utc::now();
        let mut saved = Vec::with_capacity(checked.len());
        for (file, ext) in checked {
            let path = self.upload_dir.join(stored_name(&file.file_name, &ext, now));
            if let Err(e) = tokio::fs::write(&path, &file.bytes).await {
                self.remove(&saved).await;
                return Err(e.into());
            }
            debug!(path = %path.display(), bytes = file.bytes.len(), "Stored upload");
            saved.push(path);
        }

        Ok(saved)
    }

    /// Best-effort delete of stored artifacts; paths outside the upload folder are left alone
    pub async fn remove(&self, paths: &[PathBuf]) {
        for path in paths {
            if !path.starts_with(&self.upload_dir) {
                warn!(path = %path.display(), "Refusing to delete file outside upload folder");
                continue;
            }
            match tokio::fs::remove_file(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), "Failed to delete upload: {}", e),
            }
        }
    }
}

/// `<sanitized base>-<YYYYmmdd-HHMMSS>-<8 hex>.<ext>`
pub fn stored_name(original: &str, ext: &str, now: DateTime<Utc>) -> String {
    let unique = Uuid::new_v4().simple().to_string();
    format!(
        "{}-{}-{}.{}",
        sanitize_base(original),
        now.format("%Y%m%d-%H%M%S"),
        &unique[..8],
        ext
    )
}

/// File stem reduced to `[A-Za-z0-9_.-]`, `"upload"` if nothing is left
fn sanitize_base(original: &str) -> String {
    let name = original.rsplit(['/', '\\']).next().unwrap_or(original);
    let stem = name.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(name);

    let cleaned: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches(|c| c == '_' || c == '.').to_string();

    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &Path) -> UploadStore {
        let exts: Vec<String> = ["jpg", "jpeg", "png", "webp"].iter().map(|s| s.to_string()).collect();
        UploadStore::new(dir.join("uploads"), &exts)
    }

    fn file(name: &str) -> UploadedFile {
        UploadedFile {
            file_name: name.to_string(),
            bytes: vec![0xFF, 0xD8, 0xFF],
        }
    }

    #[test]
    fn test_check_extension() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(temp_dir.path());
        assert_eq!(store.check_extension("Meal.JPG").unwrap(), "jpg");
        assert!(matches!(store.check_extension("notes.txt"), Err(UploadError::BadExtension(_))));
        assert!(matches!(store.check_extension("noext"), Err(UploadError::BadExtension(_))));
    }

    #[test]
    fn test_stored_name_layout() {
        let now = DateTime::parse_from_rfc3339("2026-03-04T05:06:07Z")
            .unwrap()
            .with_timezone(&Utc);
        let name = stored_name("my lunch.jpg", "jpg", now);
        assert!(name.starts_with("my_lunch-20260304-050607-"), "{}", name);
        assert!(name.ends_with(".jpg"));
        assert_eq!(name.len(), "my_lunch-20260304-050607-".len() + 8 + ".jpg".len());
    }

    #[test]
    fn test_sanitize_base() {
        assert_eq!(sanitize_base("../../etc/passwd.png"), "passwd");
        assert_eq!(sanitize_base("親子丼.jpg"), "upload");
        assert_eq!(sanitize_base(".png"), "upload");
    }

    #[tokio::test]
    async fn test_save_all_writes_in_order() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(temp_dir.path());

        let paths = store
            .save_all(vec![file("a.jpg"), file("b.png")])
            .await
            .unwrap();

        assert_eq!(paths.len(), 2);
        assert!(paths[0].file_name().unwrap().to_string_lossy().starts_with("a-"));
        assert!(paths[1].extension().unwrap() == "png");
        for path in &paths {
            assert!(path.exists());
        }
    }

    #[tokio::test]
    async fn test_bad_extension_writes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(temp_dir.path());

        let result = store.save_all(vec![file("a.jpg"), file("b.gif")]).await;
        assert!(matches!(result, Err(UploadError::BadExtension(name)) if name == "b.gif"));
        assert!(!store.upload_dir().exists());
    }

    #[tokio::test]
    async fn test_empty_upload_rejected() {
        let temp_dir = TempDir::new().unwrap();
        assert!(matches!(
            store(temp_dir.path()).save_all(vec![]).await,
            Err(UploadError::NoFiles)
        ));
    }

    #[tokio::test]
    async fn test_remove_ignores_outside_paths() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(temp_dir.path());
        let outside = temp_dir.path().join("keep.jpg");
        std::fs::write(&outside, b"x").unwrap();

        let paths = store.save_all(vec![file("a.jpg")]).await.unwrap();
        store.remove(&[paths[0].clone(), outside.clone()]).await;

        assert!(!paths[0].exists());
        assert!(outside.exists());
    }
}
