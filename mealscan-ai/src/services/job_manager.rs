//! Job manager
//!
//! Maps an opaque job id to the artifacts uploaded for it. A job is written
//! once at upload time and read later (possibly by another process) when the
//! client opens the analysis stream. There is no update operation.

use sqlx::SqlitePool;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::db;
use crate::models::{Job, JobManifest};

/// Longest accepted job id
pub const MAX_JOB_ID_LEN: usize = 64;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("a job needs at least one artifact")]
    NoArtifacts,

    #[error("job not found: {0}")]
    NotFound(String),

    #[error("job storage error: {0}")]
    Storage(#[from] mealscan_common::Error),
}

/// Job ids are 1-64 chars of `[A-Za-z0-9_-]`; anything else is never looked up
pub fn is_valid_job_id(job_id: &str) -> bool {
    !job_id.is_empty()
        && job_id.len() <= MAX_JOB_ID_LEN
        && job_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

#[derive(Clone)]
pub struct JobManager {
    db: SqlitePool,
}

impl JobManager {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Persist a manifest for `artifact_refs` under a fresh id
    pub async fn create_job(&self, artifact_refs: Vec<String>) -> Result<String, JobError> {
        if artifact_refs.is_empty() {
            return Err(JobError::NoArtifacts);
        }

        let job_id = Uuid::new_v4().simple().to_string();
        let manifest = JobManifest::new(artifact_refs, mealscan_common::time::now());
        db::jobs::insert_job(&self.db, &job_id, &manifest).await?;

        info!(job_id = %job_id, artifacts = manifest.paths.len(), "Job created");
        Ok(job_id)
    }

    /// Artifact refs of a job, in upload order
    pub async fn load_job(&self, job_id: &str) -> Result<Vec<String>, JobError> {
        Ok(self.get_job(job_id).await?.input_refs)
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Job, JobError> {
        if !is_valid_job_id(job_id) {
            return Err(JobError::NotFound(job_id.to_string()));
        }

        let manifest = db::jobs::load_job(&self.db, job_id)
            .await?
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))?;

        let created_at = manifest
            .created_at()
            .unwrap_or_else(mealscan_common::time::now);

        Ok(Job {
            id: job_id.to_string(),
            input_refs: manifest.paths,
            created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_id_validation() {
        assert!(is_valid_job_id("0f8fad5bd9cb469fa16570867728950e"));
        assert!(is_valid_job_id("job_1-a"));
        assert!(!is_valid_job_id(""));
        assert!(!is_valid_job_id("../etc/passwd"));
        assert!(!is_valid_job_id("a b"));
        assert!(!is_valid_job_id(&"x".repeat(65)));
        assert!(is_valid_job_id(&"x".repeat(64)));
    }
}
