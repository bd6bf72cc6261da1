//! Redis-backed store implementations.
//!
//! Jobs are JSON values under a per-record TTL, indexed by `updated_at` in a
//! sorted set so stale scans never walk the whole keyspace. Checkpoints get
//! their own, longer TTL. Leases are standalone `SET NX EX` keys so renewal
//! never races with job saves. The ledger is a pair of hashes.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::{debug, warn};

use reel_models::{AssetRecord, Job, JobId, JobStatus, Stage};

use crate::error::{StoreError, StoreResult};
use crate::traits::{AssetLedger, Checkpoint, CheckpointStore, JobStore};

/// Upper bound on index entries walked by a filtered `list`.
const LIST_SCAN_LIMIT: isize = 512;

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Redis URL
    pub redis_url: String,
    /// Key prefix for all records
    pub key_prefix: String,
    /// Job record TTL
    pub job_ttl: Duration,
    /// Checkpoint TTL; must outlive transient job unavailability
    pub checkpoint_ttl: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: "reel".to_string(),
            job_ttl: Duration::from_secs(24 * 3600),
            checkpoint_ttl: Duration::from_secs(72 * 3600),
        }
    }
}

impl StoreConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            key_prefix: std::env::var("REEL_KEY_PREFIX").unwrap_or_else(|_| "reel".to_string()),
            job_ttl: Duration::from_secs(
                std::env::var("REEL_JOB_TTL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(24 * 3600),
            ),
            checkpoint_ttl: Duration::from_secs(
                std::env::var("REEL_CHECKPOINT_TTL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(72 * 3600),
            ),
        }
    }
}

/// Redis store implementing all three storage traits.
#[derive(Clone)]
pub struct RedisStore {
    client: redis::Client,
    config: StoreConfig,
}

impl RedisStore {
    /// Create a new store.
    pub fn new(config: StoreConfig) -> StoreResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> StoreResult<Self> {
        Self::new(StoreConfig::from_env())
    }

    async fn conn(&self) -> StoreResult<redis::aio::MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    fn job_key(&self, id: &JobId) -> String {
        format!("{}:job:{}", self.config.key_prefix, id)
    }

    fn index_key(&self) -> String {
        format!("{}:jobs:index", self.config.key_prefix)
    }

    fn checkpoint_key(&self, id: &JobId) -> String {
        format!("{}:checkpoint:{}", self.config.key_prefix, id)
    }

    fn lease_key(&self, id: &JobId) -> String {
        format!("{}:lease:{}", self.config.key_prefix, id)
    }

    fn ledger_key(&self, set: &str) -> String {
        format!("{}:ledger:{}", self.config.key_prefix, set)
    }

    /// Load jobs for a list of ids, dropping (and unindexing) entries whose
    /// record has expired underneath the index.
    async fn load_indexed(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        ids: Vec<String>,
    ) -> StoreResult<Vec<Job>> {
        let mut jobs = Vec::with_capacity(ids.len());
        for id in ids {
            let payload: Option<String> = conn.get(self.job_key(&JobId::from_string(&id))).await?;
            match payload {
                Some(json) => match serde_json::from_str::<Job>(&json) {
                    Ok(job) => jobs.push(job),
                    Err(e) => warn!(job_id = %id, "Skipping unparseable job record: {}", e),
                },
                None => {
                    debug!(job_id = %id, "Removing expired job from index");
                    conn.zrem::<_, _, ()>(self.index_key(), &id).await?;
                }
            }
        }
        Ok(jobs)
    }
}

#[async_trait]
impl JobStore for RedisStore {
    async fn save(&self, job: &Job) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        let payload = serde_json::to_string(job)?;

        conn.set_ex::<_, _, ()>(
            self.job_key(&job.id),
            payload,
            self.config.job_ttl.as_secs(),
        )
        .await?;
        conn.zadd::<_, _, _, ()>(
            self.index_key(),
            job.id.as_str(),
            job.updated_at.timestamp_millis() as f64 / 1000.0,
        )
        .await?;

        Ok(())
    }

    async fn get(&self, id: &JobId) -> StoreResult<Option<Job>> {
        let mut conn = self.conn().await?;
        let payload: Option<String> = conn.get(self.job_key(id)).await?;
        match payload {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn list(&self, status: Option<JobStatus>, limit: usize) -> StoreResult<Vec<Job>> {
        let mut conn = self.conn().await?;
        let ids: Vec<String> = conn
            .zrevrange(self.index_key(), 0, LIST_SCAN_LIMIT - 1)
            .await?;

        let mut jobs = self.load_indexed(&mut conn, ids).await?;
        if let Some(status) = status {
            jobs.retain(|j| j.status == status);
        }
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn delete(&self, id: &JobId) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        let removed: u32 = conn.del(self.job_key(id)).await?;
        conn.zrem::<_, _, ()>(self.index_key(), id.as_str()).await?;
        conn.del::<_, ()>(self.lease_key(id)).await?;
        Ok(removed > 0)
    }

    async fn find_stale(&self, max_age: Duration) -> StoreResult<Vec<Job>> {
        let mut conn = self.conn().await?;
        let cutoff =
            chrono::Utc::now().timestamp_millis() as f64 / 1000.0 - max_age.as_secs_f64();

        let ids: Vec<String> = conn
            .zrangebyscore(self.index_key(), "-inf", cutoff)
            .await?;

        let mut jobs = self.load_indexed(&mut conn, ids).await?;
        jobs.retain(|j| !j.is_terminal());
        Ok(jobs)
    }

    async fn acquire_lease(&self, id: &JobId, ttl: Duration) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        let acquired: Option<String> = redis::cmd("SET")
            .arg(self.lease_key(id))
            .arg("held")
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs())
            .query_async(&mut conn)
            .await?;
        Ok(acquired.is_some())
    }

    async fn renew_lease(&self, id: &JobId, ttl: Duration) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        conn.set_ex::<_, _, ()>(self.lease_key(id), "held", ttl.as_secs())
            .await?;
        Ok(())
    }

    async fn release_lease(&self, id: &JobId) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        conn.del::<_, ()>(self.lease_key(id)).await?;
        Ok(())
    }

    async fn lease_held(&self, id: &JobId) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        Ok(conn.exists(self.lease_key(id)).await?)
    }
}

#[async_trait]
impl CheckpointStore for RedisStore {
    async fn save(&self, id: &JobId, stage: Stage) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        let key = self.checkpoint_key(id);

        let mut checkpoint: Checkpoint = match conn.get::<_, Option<String>>(&key).await? {
            Some(json) => serde_json::from_str(&json)?,
            None => Checkpoint::default(),
        };
        checkpoint.record(stage);

        conn.set_ex::<_, _, ()>(
            &key,
            serde_json::to_string(&checkpoint)?,
            self.config.checkpoint_ttl.as_secs(),
        )
        .await?;

        debug!(job_id = %id, stage = %stage, "Checkpointed stage");
        Ok(())
    }

    async fn load(&self, id: &JobId) -> StoreResult<Option<Checkpoint>> {
        let mut conn = self.conn().await?;
        let payload: Option<String> = conn.get(self.checkpoint_key(id)).await?;
        match payload {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn delete(&self, id: &JobId) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        conn.del::<_, ()>(self.checkpoint_key(id)).await?;
        Ok(())
    }
}

#[async_trait]
impl AssetLedger for RedisStore {
    async fn is_rejected(&self, clip_id: &str) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        Ok(conn.hexists(self.ledger_key("rejected"), clip_id).await?)
    }

    async fn is_approved(&self, clip_id: &str) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        Ok(conn.hexists(self.ledger_key("approved"), clip_id).await?)
    }

    async fn add_approved(&self, clip_id: &str, confidence: Option<f64>) -> StoreResult<()> {
        let mut conn = self.conn().await?;

        // Rejection is permanent: never let an approval shadow it.
        let rejected: bool = conn.hexists(self.ledger_key("rejected"), clip_id).await?;
        if rejected {
            return Err(StoreError::ledger_conflict(format!(
                "clip {clip_id} is blacklisted"
            )));
        }

        let record = AssetRecord::approved(clip_id, confidence);
        conn.hset::<_, _, _, ()>(
            self.ledger_key("approved"),
            clip_id,
            serde_json::to_string(&record)?,
        )
        .await?;
        metrics::counter!("reel_ledger_approvals_total").increment(1);
        Ok(())
    }

    async fn add_rejected(
        &self,
        clip_id: &str,
        reason: &str,
        confidence: Option<f64>,
    ) -> StoreResult<()> {
        let mut conn = self.conn().await?;

        let record = AssetRecord::rejected(clip_id, reason, confidence);
        conn.hset::<_, _, _, ()>(
            self.ledger_key("rejected"),
            clip_id,
            serde_json::to_string(&record)?,
        )
        .await?;
        // Mutual exclusion: a rejection evicts any prior approval.
        conn.hdel::<_, _, ()>(self.ledger_key("approved"), clip_id)
            .await?;
        metrics::counter!("reel_ledger_rejections_total").increment(1);
        Ok(())
    }

    async fn get(&self, clip_id: &str) -> StoreResult<Option<AssetRecord>> {
        let mut conn = self.conn().await?;
        let approved: Option<String> = conn.hget(self.ledger_key("approved"), clip_id).await?;
        if let Some(json) = approved {
            return Ok(Some(serde_json::from_str(&json)?));
        }
        let rejected: Option<String> = conn.hget(self.ledger_key("rejected"), clip_id).await?;
        match rejected {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }
}
