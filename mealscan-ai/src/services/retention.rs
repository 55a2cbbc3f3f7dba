//! Retention sweeper
//!
//! Deletes jobs older than the retention window together with their partial
//! records and uploaded images, and prunes old history rows. With retention
//! disabled nothing is ever deleted.

use sqlx::SqlitePool;
use std::path::PathBuf;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::db;
use crate::services::partial_store::PartialStore;
use crate::services::upload_store::UploadStore;
use mealscan_common::Result;

/// How often the background sweep runs
pub const SWEEP_PERIOD: Duration = Duration::from_secs(3600);

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub jobs_removed: usize,
    pub history_removed: u64,
}

#[derive(Clone)]
pub struct RetentionSweeper {
    db: SqlitePool,
    partials: PartialStore,
    uploads: UploadStore,
    retention: chrono::Duration,
}

impl RetentionSweeper {
    pub fn new(
        db: SqlitePool,
        partials: PartialStore,
        uploads: UploadStore,
        retention: chrono::Duration,
    ) -> Self {
        Self {
            db,
            partials,
            uploads,
            retention,
        }
    }

    /// Delete everything created before `now - retention`
    pub async fn sweep_once(&self) -> Result<SweepReport> {
        let cutoff = mealscan_common::time::to_iso8601(mealscan_common::time::now() - self.retention);
        let mut report = SweepReport::default();

        for (job_id, manifest) in db::jobs::list_jobs_before(&self.db, &cutoff).await? {
            let artifacts: Vec<PathBuf> = manifest.paths.iter().map(PathBuf::from).collect();
            self.uploads.remove(&artifacts).await;

            if let Err(e) = self.partials.remove(&job_id).await {
                warn!(job_id = %job_id, "Keeping job until its partial record is deleted: {}", e);
                continue;
            }
            db::jobs::delete_job(&self.db, &job_id).await?;
            report.jobs_removed += 1;
        }

        report.history_removed = db::history::delete_history_before(&self.db, &cutoff).await?;

        if report.jobs_removed > 0 || report.history_removed > 0 {
            info!(
                jobs = report.jobs_removed,
                history = report.history_removed,
                cutoff = %cutoff,
                "Retention sweep removed expired records"
            );
        }
        Ok(report)
    }

    /// Sweep now, then every `period`, until the runtime shuts down
    pub fn spawn(self, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                if let Err(e) = self.sweep_once().await {
                    warn!("Retention sweep failed: {}", e);
                }
            }
        })
    }
}
