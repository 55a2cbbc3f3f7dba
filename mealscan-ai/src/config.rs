//! Configuration for mealscan-ai
//!
//! Bootstrap settings come from `mealscan-ai.toml`; secrets may be overridden
//! by environment. The resolved values are handed explicitly to each component
//! constructor, nothing reads configuration from request context.

use mealscan_common::config::LoggingConfig;
use mealscan_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable for the inference API key
pub const API_KEY_ENV: &str = "MEALSCAN_INFERENCE_API_KEY";

/// Secondary environment variable honoured for the inference API key
pub const GOOGLE_API_KEY_ENV: &str = "GOOGLE_API_KEY";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Listen address
    pub bind_addr: String,

    /// Root folder for uploads, partial records and the database
    pub root_folder: Option<PathBuf>,

    /// Model used when a request does not name one
    pub default_model: String,

    /// Keepalive period while a stage is running
    pub heartbeat_interval_secs: u64,

    /// Request body limit for uploads
    pub max_upload_bytes: usize,

    /// Accepted image file extensions (lowercase, no dot)
    pub allowed_extensions: Vec<String>,

    /// Job/partial/history retention; 0 keeps everything forever
    pub retention_days: u32,

    pub partials: PartialsConfig,

    pub inference: InferenceConfig,

    pub logging: LoggingConfig,
}

/// Partial state store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PartialsConfig {
    /// Write partial records to local JSON files when the database tier fails
    pub local_fallback: bool,
}

/// External inference service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    /// Per-request deadline; the pipeline itself imposes none
    pub timeout_secs: u64,
    pub max_output_tokens: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:5780".to_string(),
            root_folder: None,
            default_model: "gemini-2.5-pro".to_string(),
            heartbeat_interval_secs: 15,
            max_upload_bytes: 25 * 1024 * 1024,
            allowed_extensions: ["jpg", "jpeg", "png", "webp"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            retention_days: 30,
            partials: PartialsConfig::default(),
            inference: InferenceConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for PartialsConfig {
    fn default() -> Self {
        Self {
            local_fallback: true,
        }
    }
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            timeout_secs: 120,
            max_output_tokens: 2048,
        }
    }
}

impl ServiceConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    /// Retention window, `None` when retention is disabled
    pub fn retention(&self) -> Option<chrono::Duration> {
        if self.retention_days == 0 {
            None
        } else {
            Some(chrono::Duration::days(i64::from(self.retention_days)))
        }
    }

    /// Reject values that would make the service misbehave at runtime
    pub fn validate(&self) -> Result<()> {
        if self.default_model.trim().is_empty() {
            return Err(Error::Config("default_model must not be empty".to_string()));
        }
        if self.allowed_extensions.is_empty() {
            return Err(Error::Config(
                "allowed_extensions must list at least one extension".to_string(),
            ));
        }
        if self.max_upload_bytes == 0 {
            return Err(Error::Config("max_upload_bytes must be positive".to_string()));
        }
        Ok(())
    }
}

/// Filesystem layout under the resolved root folder
#[derive(Debug, Clone)]
pub struct ServicePaths {
    pub root_folder: PathBuf,
    pub upload_dir: PathBuf,
    pub partials_dir: PathBuf,
    pub database_path: PathBuf,
}

impl ServicePaths {
    pub fn under(root_folder: impl Into<PathBuf>) -> Self {
        let root_folder = root_folder.into();
        Self {
            upload_dir: root_folder.join("uploads"),
            partials_dir: root_folder.join("partials"),
            database_path: root_folder.join("mealscan.db"),
            root_folder,
        }
    }

    /// Create the root, upload and partials folders if missing
    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [&self.root_folder, &self.upload_dir, &self.partials_dir] {
            std::fs::create_dir_all(dir).map_err(|e| {
                Error::Config(format!("Cannot create {}: {}", dir.display(), e))
            })?;
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root_folder
    }
}

/// Resolve the inference API key.
///
/// **Priority:** `MEALSCAN_INFERENCE_API_KEY` → `GOOGLE_API_KEY` → TOML
pub fn resolve_api_key(config: &InferenceConfig) -> Option<String> {
    let candidates = [
        ("environment", std::env::var(API_KEY_ENV).ok()),
        ("GOOGLE_API_KEY", std::env::var(GOOGLE_API_KEY_ENV).ok()),
        ("TOML", config.api_key.clone()),
    ];

    let valid: Vec<(&str, String)> = candidates
        .into_iter()
        .filter_map(|(source, key)| key.filter(|k| is_valid_key(k)).map(|k| (source, k)))
        .collect();

    if valid.len() > 1 {
        let sources: Vec<&str> = valid.iter().map(|(s, _)| *s).collect();
        warn!(
            "Inference API key found in multiple sources: {}. Using {}.",
            sources.join(", "),
            sources[0]
        );
    }

    match valid.into_iter().next() {
        Some((source, key)) => {
            info!("Inference API key loaded from {}", source);
            Some(key)
        }
        None => {
            warn!(
                "Inference API key not configured; set {} or inference.api_key. \
                 Analysis stages will fail until it is provided.",
                API_KEY_ENV
            );
            None
        }
    }
}

/// Validate API key (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::default();
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(15));
        assert_eq!(config.max_upload_bytes, 25 * 1024 * 1024);
        assert!(config.allowed_extensions.contains(&"webp".to_string()));
        assert!(config.partials.local_fallback);
        assert_eq!(config.retention(), Some(chrono::Duration::days(30)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_other_defaults() {
        let config: ServiceConfig = toml::from_str(
            r#"
            default_model = "gemini-2.5-flash"
            retention_days = 0

            [partials]
            local_fallback = false
            "#,
        )
        .unwrap();

        assert_eq!(config.default_model, "gemini-2.5-flash");
        assert_eq!(config.retention(), None);
        assert!(!config.partials.local_fallback);
        assert_eq!(config.bind_addr, "127.0.0.1:5780");
        assert_eq!(config.inference.timeout_secs, 120);
    }

    #[test]
    fn test_heartbeat_interval_never_zero() {
        let config = ServiceConfig {
            heartbeat_interval_secs: 0,
            ..ServiceConfig::default()
        };
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_validate_rejects_empty_extensions() {
        let config = ServiceConfig {
            allowed_extensions: Vec::new(),
            ..ServiceConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_service_paths_layout() {
        let paths = ServicePaths::under("/data/mealscan");
        assert_eq!(paths.upload_dir, PathBuf::from("/data/mealscan/uploads"));
        assert_eq!(paths.partials_dir, PathBuf::from("/data/mealscan/partials"));
        assert_eq!(paths.database_path, PathBuf::from("/data/mealscan/mealscan.db"));
    }

    #[test]
    #[serial]
    fn test_api_key_priority() {
        std::env::remove_var(API_KEY_ENV);
        std::env::remove_var(GOOGLE_API_KEY_ENV);

        let toml_only = InferenceConfig {
            api_key: Some("from-toml".to_string()),
            ..InferenceConfig::default()
        };
        assert_eq!(resolve_api_key(&toml_only).as_deref(), Some("from-toml"));

        std::env::set_var(GOOGLE_API_KEY_ENV, "from-google");
        assert_eq!(resolve_api_key(&toml_only).as_deref(), Some("from-google"));

        std::env::set_var(API_KEY_ENV, "from-env");
        assert_eq!(resolve_api_key(&toml_only).as_deref(), Some("from-env"));

        std::env::set_var(API_KEY_ENV, "   ");
        assert_eq!(resolve_api_key(&toml_only).as_deref(), Some("from-google"));

        std::env::remove_var(API_KEY_ENV);
        std::env::remove_var(GOOGLE_API_KEY_ENV);
        assert_eq!(resolve_api_key(&InferenceConfig::default()), None);
    }
}
