//! In-memory store for tests and local development.
//!
//! Implements the same traits and invariants as the Redis store, including
//! lease expiry, so the runner and recovery scanner can be tested without a
//! Redis instance. TTLs on job/checkpoint records are not simulated.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use reel_models::{AssetRecord, Job, JobId, JobStatus, Stage};

use crate::error::{StoreError, StoreResult};
use crate::traits::{AssetLedger, Checkpoint, CheckpointStore, JobStore};

#[derive(Default)]
struct Inner {
    jobs: HashMap<String, Job>,
    checkpoints: HashMap<String, Checkpoint>,
    leases: HashMap<String, DateTime<Utc>>,
    approved: HashMap<String, AssetRecord>,
    rejected: HashMap<String, AssetRecord>,
}

/// Shared in-memory store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored jobs (test helper).
    pub async fn job_count(&self) -> usize {
        self.inner.read().await.jobs.len()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn save(&self, job: &Job) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.jobs.insert(job.id.as_str().to_string(), job.clone());
        Ok(())
    }

    async fn get(&self, id: &JobId) -> StoreResult<Option<Job>> {
        let inner = self.inner.read().await;
        Ok(inner.jobs.get(id.as_str()).cloned())
    }

    async fn list(&self, status: Option<JobStatus>, limit: usize) -> StoreResult<Vec<Job>> {
        let inner = self.inner.read().await;
        let mut jobs: Vec<Job> = inner
            .jobs
            .values()
            .filter(|j| status.map_or(true, |s| j.status == s))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn delete(&self, id: &JobId) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        inner.leases.remove(id.as_str());
        Ok(inner.jobs.remove(id.as_str()).is_some())
    }

    async fn find_stale(&self, max_age: Duration) -> StoreResult<Vec<Job>> {
        let cutoff = Utc::now() - chrono::Duration::from_std(max_age).unwrap_or_default();
        let inner = self.inner.read().await;
        Ok(inner
            .jobs
            .values()
            .filter(|j| !j.is_terminal() && j.updated_at < cutoff)
            .cloned()
            .collect())
    }

    async fn acquire_lease(&self, id: &JobId, ttl: Duration) -> StoreResult<bool> {
        let now = Utc::now();
        let mut inner = self.inner.write().await;
        let live = inner
            .leases
            .get(id.as_str())
            .is_some_and(|expiry| *expiry > now);
        if live {
            return Ok(false);
        }
        inner.leases.insert(
            id.as_str().to_string(),
            now + chrono::Duration::from_std(ttl).unwrap_or_default(),
        );
        Ok(true)
    }

    async fn renew_lease(&self, id: &JobId, ttl: Duration) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.leases.insert(
            id.as_str().to_string(),
            Utc::now() + chrono::Duration::from_std(ttl).unwrap_or_default(),
        );
        Ok(())
    }

    async fn release_lease(&self, id: &JobId) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.leases.remove(id.as_str());
        Ok(())
    }

    async fn lease_held(&self, id: &JobId) -> StoreResult<bool> {
        let inner = self.inner.read().await;
        Ok(inner
            .leases
            .get(id.as_str())
            .is_some_and(|expiry| *expiry > Utc::now()))
    }
}

#[async_trait]
impl CheckpointStore for MemoryStore {
    async fn save(&self, id: &JobId, stage: Stage) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner
            .checkpoints
            .entry(id.as_str().to_string())
            .or_default()
            .record(stage);
        Ok(())
    }

    async fn load(&self, id: &JobId) -> StoreResult<Option<Checkpoint>> {
        let inner = self.inner.read().await;
        Ok(inner.checkpoints.get(id.as_str()).cloned())
    }

    async fn delete(&self, id: &JobId) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.checkpoints.remove(id.as_str());
        Ok(())
    }
}

#[async_trait]
impl AssetLedger for MemoryStore {
    async fn is_rejected(&self, clip_id: &str) -> StoreResult<bool> {
        Ok(self.inner.read().await.rejected.contains_key(clip_id))
    }

    async fn is_approved(&self, clip_id: &str) -> StoreResult<bool> {
        Ok(self.inner.read().await.approved.contains_key(clip_id))
    }

    async fn add_approved(&self, clip_id: &str, confidence: Option<f64>) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if inner.rejected.contains_key(clip_id) {
            return Err(StoreError::ledger_conflict(format!(
                "clip {clip_id} is blacklisted"
            )));
        }
        inner.approved.insert(
            clip_id.to_string(),
            AssetRecord::approved(clip_id, confidence),
        );
        Ok(())
    }

    async fn add_rejected(
        &self,
        clip_id: &str,
        reason: &str,
        confidence: Option<f64>,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.approved.remove(clip_id);
        inner.rejected.insert(
            clip_id.to_string(),
            AssetRecord::rejected(clip_id, reason, confidence),
        );
        Ok(())
    }

    async fn get(&self, clip_id: &str) -> StoreResult<Option<AssetRecord>> {
        let inner = self.inner.read().await;
        Ok(inner
            .approved
            .get(clip_id)
            .or_else(|| inner.rejected.get(clip_id))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reel_models::AssetDecision;

    #[tokio::test]
    async fn test_job_roundtrip_and_list() {
        let store = MemoryStore::new();
        let mut job = Job::new("surf", "/audio/a.wav", 3600);
        JobStore::save(&store, &job).await.unwrap();

        let loaded = JobStore::get(&store, &job.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, job.id);

        job.complete();
        JobStore::save(&store, &job).await.unwrap();

        let completed = store
            .list(Some(JobStatus::Completed), 10)
            .await
            .unwrap();
        assert_eq!(completed.len(), 1);
        let queued = store.list(Some(JobStatus::Queued), 10).await.unwrap();
        assert!(queued.is_empty());

        assert!(JobStore::delete(&store, &job.id).await.unwrap());
        assert!(!JobStore::delete(&store, &job.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_find_stale_skips_terminal_and_fresh() {
        let store = MemoryStore::new();

        let mut stale = Job::new("a", "/audio/a.wav", 3600);
        stale.status = JobStatus::Assembling;
        stale.updated_at = Utc::now() - chrono::Duration::seconds(600);
        JobStore::save(&store, &stale).await.unwrap();

        let mut done = Job::new("b", "/audio/b.wav", 3600);
        done.complete();
        done.updated_at = Utc::now() - chrono::Duration::seconds(600);
        JobStore::save(&store, &done).await.unwrap();

        let fresh = Job::new("c", "/audio/c.wav", 3600);
        JobStore::save(&store, &fresh).await.unwrap();

        let found = store.find_stale(Duration::from_secs(300)).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, stale.id);
    }

    #[tokio::test]
    async fn test_lease_exclusion_and_expiry() {
        let store = MemoryStore::new();
        let id = JobId::new();

        assert!(store
            .acquire_lease(&id, Duration::from_secs(60))
            .await
            .unwrap());
        assert!(!store
            .acquire_lease(&id, Duration::from_secs(60))
            .await
            .unwrap());
        assert!(store.lease_held(&id).await.unwrap());

        store.release_lease(&id).await.unwrap();
        assert!(!store.lease_held(&id).await.unwrap());

        // An expired lease is as good as released
        assert!(store
            .acquire_lease(&id, Duration::from_secs(0))
            .await
            .unwrap());
        assert!(!store.lease_held(&id).await.unwrap());
        assert!(store
            .acquire_lease(&id, Duration::from_secs(60))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_ledger_mutual_exclusion() {
        let store = MemoryStore::new();

        store.add_approved("clip-1", Some(0.1)).await.unwrap();
        assert!(store.is_approved("clip-1").await.unwrap());

        // Rejection evicts the approval
        store
            .add_rejected("clip-1", "unwanted content", Some(0.9))
            .await
            .unwrap();
        assert!(store.is_rejected("clip-1").await.unwrap());
        assert!(!store.is_approved("clip-1").await.unwrap());

        // And is permanent
        let err = store.add_approved("clip-1", None).await.unwrap_err();
        assert!(matches!(err, StoreError::LedgerConflict(_)));
        assert!(store.is_rejected("clip-1").await.unwrap());

        let record = AssetLedger::get(&store, "clip-1").await.unwrap().unwrap();
        assert_eq!(record.decision, AssetDecision::Rejected);
        assert_eq!(record.reason.as_deref(), Some("unwanted content"));
    }
}
