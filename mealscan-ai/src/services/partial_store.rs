//! Partial state store
//!
//! Durable, best-effort record of each job's pipeline progress, so a second
//! client can poll `/status` without holding the stream open.
//!
//! Two tiers:
//! - the sqlite `partial_records` table, authoritative and shared between
//!   processes using the same database;
//! - optionally, one JSON file per job under `partials/`, written only when
//!   the database write fails.
//!
//! Reads prefer the database; a file record is consulted only when the
//! database has none or cannot be read, and may be stale.
//!
//! Writes for one job are serialized in-process. Across processes the
//! database tier merges with a revision compare-and-swap, so a concurrent
//! writer causes a re-read and re-merge instead of a lost update.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::db;
use crate::models::PartialRecord;
use crate::services::job_manager::is_valid_job_id;
use mealscan_common::{Error, Result};

/// Re-read/re-merge attempts when another writer moves the revision on
pub const MAX_CAS_ATTEMPTS: u32 = 5;

/// One backing store for partial records
#[async_trait]
pub trait PartialTier: Send + Sync {
    fn name(&self) -> &'static str;

    async fn read(&self, job_id: &str) -> Result<Option<PartialRecord>>;

    /// Read-merge-write one phase into the job's record
    async fn merge(&self, job_id: &str, phase: &str, payload: &Value) -> Result<()>;

    async fn remove(&self, job_id: &str) -> Result<()>;
}

/// sqlite tier with revision-conditioned writes
pub struct SqliteTier {
    db: SqlitePool,
}

impl SqliteTier {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl PartialTier for SqliteTier {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn read(&self, job_id: &str) -> Result<Option<PartialRecord>> {
        Ok(db::partials::load_partial(&self.db, job_id)
            .await?
            .map(|stored| stored.record))
    }

    async fn merge(&self, job_id: &str, phase: &str, payload: &Value) -> Result<()> {
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let updated_at = mealscan_common::time::to_iso8601(mealscan_common::time::now());

            let written = match db::partials::load_partial(&self.db, job_id).await? {
                Some(stored) => {
                    let mut record = stored.record;
                    record.merge_phase(phase, payload);
                    db::partials::update_partial_if_revision(
                        &self.db,
                        job_id,
                        &record,
                        stored.revision,
                        &updated_at,
                    )
                    .await?
                }
                None => {
                    let mut record = PartialRecord::default();
                    record.merge_phase(phase, payload);
                    db::partials::insert_partial(&self.db, job_id, &record, &updated_at).await?
                }
            };

            if written {
                return Ok(());
            }
            debug!(job_id, phase, attempt, "Partial record changed underneath, re-merging");
        }

        Err(Error::Internal(format!(
            "partial record for {} kept changing after {} attempts",
            job_id, MAX_CAS_ATTEMPTS
        )))
    }

    async fn remove(&self, job_id: &str) -> Result<()> {
        db::partials::delete_partial(&self.db, job_id).await
    }
}

/// Local JSON file tier (`<dir>/<job_id>.json`)
pub struct FileTier {
    dir: PathBuf,
}

impl FileTier {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, job_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", job_id))
    }
}

#[async_trait]
impl PartialTier for FileTier {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn read(&self, job_id: &str) -> Result<Option<PartialRecord>> {
        match tokio::fs::read_to_string(self.path_for(job_id)).await {
            Ok(text) => Ok(Some(serde_json::from_str(&text)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn merge(&self, job_id: &str, phase: &str, payload: &Value) -> Result<()> {
        let mut record = self.read(job_id).await?.unwrap_or_default();
        record.merge_phase(phase, payload);

        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(job_id);
        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, serde_json::to_vec(&record)?).await?;
        tokio::fs::rename(&tmp_path, &path).await?;
        Ok(())
    }

    async fn remove(&self, job_id: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(job_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Clone)]
pub struct PartialStore {
    primary: Arc<dyn PartialTier>,
    fallback: Option<Arc<dyn PartialTier>>,
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl PartialStore {
    pub fn new(primary: Arc<dyn PartialTier>, fallback: Option<Arc<dyn PartialTier>>) -> Self {
        Self {
            primary,
            fallback,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// sqlite tier, plus the file tier under `partials_dir` when enabled
    pub fn with_sqlite(db: SqlitePool, partials_dir: Option<PathBuf>) -> Self {
        let fallback = partials_dir.map(|dir| Arc::new(FileTier::new(dir)) as Arc<dyn PartialTier>);
        Self::new(Arc::new(SqliteTier::new(db)), fallback)
    }

    /// Record that `phase` completed for `job_id`.
    ///
    /// Never fails: storage errors are logged and dropped.
    pub async fn put_phase(&self, job_id: &str, phase: &str, payload: &Value) {
        if !is_valid_job_id(job_id) {
            warn!(job_id, phase, "Not recording phase for malformed job id");
            return;
        }

        let lock = self.job_lock(job_id).await;
        {
            let _guard = lock.lock().await;
            self.write_tiers(job_id, phase, payload).await;
        }
        drop(lock);
        self.release_job_lock(job_id).await;
    }

    async fn write_tiers(&self, job_id: &str, phase: &str, payload: &Value) {
        let primary_err = match self.primary.merge(job_id, phase, payload).await {
            Ok(()) => {
                debug!(job_id, phase, tier = self.primary.name(), "Phase recorded");
                return;
            }
            Err(e) => e,
        };

        warn!(
            job_id,
            phase,
            tier = self.primary.name(),
            "Partial record write failed: {}",
            primary_err
        );

        if let Some(fallback) = &self.fallback {
            match fallback.merge(job_id, phase, payload).await {
                Ok(()) => debug!(job_id, phase, tier = fallback.name(), "Phase recorded in fallback"),
                Err(e) => warn!(
                    job_id,
                    phase,
                    tier = fallback.name(),
                    "Fallback partial record write failed: {}",
                    e
                ),
            }
        }
    }

    /// Current record for `job_id`, `None` if no phase has been recorded
    pub async fn get_status(&self, job_id: &str) -> Option<PartialRecord> {
        if !is_valid_job_id(job_id) {
            return None;
        }

        match self.primary.read(job_id).await {
            Ok(Some(record)) => return Some(record),
            Ok(None) => {}
            Err(e) => warn!(job_id, tier = self.primary.name(), "Partial record read failed: {}", e),
        }

        let fallback = self.fallback.as_ref()?;
        match fallback.read(job_id).await {
            Ok(record) => record,
            Err(e) => {
                warn!(job_id, tier = fallback.name(), "Partial record read failed: {}", e);
                None
            }
        }
    }

    /// Delete the job's record from every tier.
    ///
    /// Every tier is attempted; the first failure is returned.
    pub async fn remove(&self, job_id: &str) -> Result<()> {
        if !is_valid_job_id(job_id) {
            return Ok(());
        }

        let mut first_err = None;
        for tier in std::iter::once(&self.primary).chain(self.fallback.as_ref()) {
            if let Err(e) = tier.remove(job_id).await {
                warn!(job_id, tier = tier.name(), "Partial record delete failed: {}", e);
                first_err.get_or_insert(e);
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn job_lock(&self, job_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(job_id.to_string()).or_default().clone()
    }

    async fn release_job_lock(&self, job_id: &str) {
        let mut locks = self.locks.lock().await;
        if locks
            .get(job_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(job_id);
        }
    }

    #[cfg(test)]
    async fn tracked_locks(&self) -> usize {
        self.locks.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    struct BrokenTier;

    #[async_trait]
    impl PartialTier for BrokenTier {
        fn name(&self) -> &'static str {
            "broken"
        }
        async fn read(&self, _job_id: &str) -> Result<Option<PartialRecord>> {
            Err(Error::Internal("backend unreachable".into()))
        }
        async fn merge(&self, _job_id: &str, _phase: &str, _payload: &Value) -> Result<()> {
            Err(Error::Internal("backend unreachable".into()))
        }
        async fn remove(&self, _job_id: &str) -> Result<()> {
            Err(Error::Internal("backend unreachable".into()))
        }
    }

    async fn sqlite_store(dir: &TempDir, with_fallback: bool) -> (PartialStore, SqlitePool) {
        let pool = db::init_database_pool(&dir.path().join("test.db")).await.unwrap();
        let fallback = with_fallback.then(|| dir.path().join("partials"));
        (PartialStore::with_sqlite(pool.clone(), fallback), pool)
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let dir = TempDir::new().unwrap();
        let (store, _pool) = sqlite_store(&dir, true).await;

        store.put_phase("j1", "recognize", &json!({"dish": "ramen"})).await;
        store.put_phase("j1", "ing_quant", &json!({"total_grams": 500.0})).await;

        let record = store.get_status("j1").await.unwrap();
        assert!(record.has_phase("recognize"));
        assert!(record.has_phase("ing_quant"));
        assert_eq!(record.last_phase, "ing_quant");
        assert_eq!(record.data["dish"], "ramen");
        assert!(!dir.path().join("partials").join("j1.json").exists());
        assert_eq!(store.tracked_locks().await, 0);
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_ids() {
        let dir = TempDir::new().unwrap();
        let (store, _pool) = sqlite_store(&dir, true).await;
        assert!(store.get_status("nothing-here").await.is_none());

        store.put_phase("../escape", "recognize", &json!({})).await;
        assert!(store.get_status("../escape").await.is_none());
    }

    #[tokio::test]
    async fn test_repeated_phase_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let (store, _pool) = sqlite_store(&dir, false).await;
        let payload = json!({"dish": "ramen", "ingredients_detected": ["noodles"]});

        store.put_phase("j1", "recognize", &payload).await;
        let once = store.get_status("j1").await.unwrap();
        store.put_phase("j1", "recognize", &payload).await;
        let twice = store.get_status("j1").await.unwrap();

        assert_eq!(once, twice);
    }

    #[tokio::test]
    async fn test_concurrent_phases_are_not_lost() {
        let dir = TempDir::new().unwrap();
        let (store, _pool) = sqlite_store(&dir, false).await;

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let phase = format!("phase{}", i);
                let mut payload = serde_json::Map::new();
                payload.insert(format!("k{}", i), json!(i));
                store.put_phase("j1", &phase, &Value::Object(payload)).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let record = store.get_status("j1").await.unwrap();
        assert_eq!(record.flags.len(), 8);
        assert_eq!(record.data.len(), 8);
    }

    #[tokio::test]
    async fn test_falls_back_to_file_when_primary_fails() {
        let dir = TempDir::new().unwrap();
        let store = PartialStore::new(
            Arc::new(BrokenTier),
            Some(Arc::new(FileTier::new(dir.path().join("partials")))),
        );

        store.put_phase("j1", "recognize", &json!({"dish": "curry"})).await;

        let record = store.get_status("j1").await.unwrap();
        assert_eq!(record.data["dish"], "curry");
        let text = std::fs::read_to_string(dir.path().join("partials").join("j1.json")).unwrap();
        let persisted: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(persisted["flags"]["recognize"], true);
        assert_eq!(persisted["last_phase"], "recognize");
    }

    #[tokio::test]
    async fn test_failures_are_swallowed_without_fallback() {
        let store = PartialStore::new(Arc::new(BrokenTier), None);
        store.put_phase("j1", "recognize", &json!({"dish": "curry"})).await;
        assert!(store.get_status("j1").await.is_none());
    }

    #[tokio::test]
    async fn test_closed_database_uses_fallback() {
        let dir = TempDir::new().unwrap();
        let (store, pool) = sqlite_store(&dir, true).await;
        pool.close().await;

        store.put_phase("j1", "recognize", &json!({"dish": "soba"})).await;
        assert_eq!(store.get_status("j1").await.unwrap().data["dish"], "soba");
    }

    #[tokio::test]
    async fn test_database_record_wins_over_file() {
        let dir = TempDir::new().unwrap();
        let (store, _pool) = sqlite_store(&dir, true).await;

        let file_tier = FileTier::new(dir.path().join("partials"));
        file_tier
            .merge("j1", "recognize", &json!({"dish": "stale"}))
            .await
            .unwrap();
        assert_eq!(store.get_status("j1").await.unwrap().data["dish"], "stale");

        store.put_phase("j1", "recognize", &json!({"dish": "fresh"})).await;
        assert_eq!(store.get_status("j1").await.unwrap().data["dish"], "fresh");
    }

    #[tokio::test]
    async fn test_remove_clears_both_tiers() {
        let dir = TempDir::new().unwrap();
        let (store, _pool) = sqlite_store(&dir, true).await;
        let file_tier = FileTier::new(dir.path().join("partials"));
        file_tier.merge("j1", "recognize", &json!({})).await.unwrap();
        store.put_phase("j1", "recognize", &json!({})).await;

        store.remove("j1").await.unwrap();
        assert!(store.get_status("j1").await.is_none());
    }

    #[tokio::test]
    async fn test_remove_reaches_fallback_when_primary_fails() {
        let dir = TempDir::new().unwrap();
        let partials_dir = dir.path().join("partials");
        let store = PartialStore::new(
            Arc::new(BrokenTier),
            Some(Arc::new(FileTier::new(&partials_dir))),
        );
        store.put_phase("j1", "recognize", &json!({"dish": "curry"})).await;
        assert!(partials_dir.join("j1.json").exists());

        assert!(store.remove("j1").await.is_err());
        assert!(!partials_dir.join("j1.json").exists());
    }
}
