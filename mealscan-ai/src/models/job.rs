//! Job manifest

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persisted form of a job: the uploaded artifacts, in upload order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobManifest {
    pub paths: Vec<String>,
    /// ISO-8601, UTC
    pub created_at: String,
}

impl JobManifest {
    pub fn new(paths: Vec<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            paths,
            created_at: mealscan_common::time::to_iso8601(created_at),
        }
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        mealscan_common::time::parse_iso8601(&self.created_at)
    }
}

/// A redeemed job handle
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: String,
    pub input_refs: Vec<String>,
    pub created_at: DateTime<Utc>,
}
