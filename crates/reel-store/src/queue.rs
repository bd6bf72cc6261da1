//! Dispatch queue over Redis Streams.
//!
//! Carries only job ids: the job record itself lives in the JobStore. The
//! queue runtime (supervision, scaling) is outside this crate; workers
//! consume through a consumer group and re-claim messages from crashed
//! peers.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use reel_models::JobId;

use crate::error::{StoreError, StoreResult};

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Stream name for dispatches
    pub stream_name: String,
    /// Consumer group name
    pub consumer_group: String,
    /// Idle time before a pending dispatch may be re-claimed
    pub claim_min_idle: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            stream_name: "reel:dispatch".to_string(),
            consumer_group: "reel:workers".to_string(),
            claim_min_idle: Duration::from_secs(300),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            stream_name: std::env::var("REEL_DISPATCH_STREAM")
                .unwrap_or_else(|_| "reel:dispatch".to_string()),
            consumer_group: std::env::var("REEL_CONSUMER_GROUP")
                .unwrap_or_else(|_| "reel:workers".to_string()),
            claim_min_idle: Duration::from_secs(
                std::env::var("REEL_CLAIM_MIN_IDLE_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(300),
            ),
        }
    }
}

/// One queued unit of work: run the pipeline for a job id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dispatch {
    /// Job to run
    pub job_id: JobId,
    /// When the dispatch was enqueued
    pub enqueued_at: DateTime<Utc>,
    /// Whether this is a recovery re-dispatch
    #[serde(default)]
    pub resumed: bool,
}

impl Dispatch {
    pub fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            enqueued_at: Utc::now(),
            resumed: false,
        }
    }

    pub fn resumed(job_id: JobId) -> Self {
        Self {
            job_id,
            enqueued_at: Utc::now(),
            resumed: true,
        }
    }
}

/// Anything that can hand a job to a worker.
///
/// Implemented by `DispatchQueue`; tests substitute a recording fake so the
/// recovery scanner can be exercised without Redis.
#[async_trait]
pub trait JobDispatcher: Send + Sync {
    async fn dispatch(&self, dispatch: Dispatch) -> StoreResult<()>;
}

/// Dispatch queue client.
pub struct DispatchQueue {
    client: redis::Client,
    config: QueueConfig,
}

impl DispatchQueue {
    /// Create a new queue client.
    pub fn new(config: QueueConfig) -> StoreResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> StoreResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    /// Idle threshold for re-claiming pending dispatches.
    pub fn claim_min_idle(&self) -> Duration {
        self.config.claim_min_idle
    }

    /// Initialize the queue (create the consumer group if missing).
    pub async fn init(&self) -> StoreResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group: {}", self.config.consumer_group),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!(
                    "Consumer group already exists: {}",
                    self.config.consumer_group
                );
            }
            Err(e) => return Err(StoreError::Redis(e)),
        }

        Ok(())
    }

    /// Enqueue a dispatch.
    pub async fn enqueue(&self, dispatch: &Dispatch) -> StoreResult<String> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(dispatch)?;

        let message_id: String = redis::cmd("XADD")
            .arg(&self.config.stream_name)
            .arg("*")
            .arg("dispatch")
            .arg(&payload)
            .query_async(&mut conn)
            .await?;

        info!(
            job_id = %dispatch.job_id,
            resumed = dispatch.resumed,
            "Enqueued dispatch with message ID {}", message_id
        );
        Ok(message_id)
    }

    /// Acknowledge a dispatch (mark as handled).
    pub async fn ack(&self, message_id: &str) -> StoreResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        redis::cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;
        redis::cmd("XDEL")
            .arg(&self.config.stream_name)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        debug!("Acknowledged dispatch: {}", message_id);
        Ok(())
    }

    /// Consume dispatches for this consumer.
    pub async fn consume(
        &self,
        consumer_name: &str,
        block_ms: u64,
        count: usize,
    ) -> StoreResult<Vec<(String, Dispatch)>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let result: redis::streams::StreamReadReply = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block_ms)
            .arg("STREAMS")
            .arg(&self.config.stream_name)
            .arg(">")
            .query_async(&mut conn)
            .await?;

        let mut dispatches = Vec::new();
        for stream_key in result.keys {
            for entry in stream_key.ids {
                if let Some((id, dispatch)) = self.parse_entry(entry).await {
                    dispatches.push((id, dispatch));
                }
            }
        }
        Ok(dispatches)
    }

    /// Claim dispatches left pending by crashed workers.
    pub async fn claim_pending(
        &self,
        consumer_name: &str,
        count: usize,
    ) -> StoreResult<Vec<(String, Dispatch)>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let result: redis::streams::StreamAutoClaimReply = redis::cmd("XAUTOCLAIM")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg(self.config.claim_min_idle.as_millis() as u64)
            .arg("0-0")
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await?;

        let mut dispatches = Vec::new();
        for entry in result.claimed {
            if let Some((id, dispatch)) = self.parse_entry(entry).await {
                info!(job_id = %dispatch.job_id, "Claimed pending dispatch");
                dispatches.push((id, dispatch));
            }
        }
        Ok(dispatches)
    }

    async fn parse_entry(&self, entry: redis::streams::StreamId) -> Option<(String, Dispatch)> {
        let message_id = entry.id.clone();
        let payload = match entry.map.get("dispatch") {
            Some(redis::Value::BulkString(bytes)) => String::from_utf8_lossy(bytes).into_owned(),
            _ => {
                warn!("Dispatch entry {} has no payload, dropping", message_id);
                self.ack(&message_id).await.ok();
                return None;
            }
        };
        match serde_json::from_str::<Dispatch>(&payload) {
            Ok(dispatch) => Some((message_id, dispatch)),
            Err(e) => {
                warn!("Failed to parse dispatch payload: {}", e);
                // Ack the malformed message to prevent reprocessing
                self.ack(&message_id).await.ok();
                None
            }
        }
    }
}

#[async_trait]
impl JobDispatcher for DispatchQueue {
    async fn dispatch(&self, dispatch: Dispatch) -> StoreResult<()> {
        self.enqueue(&dispatch).await.map(|_| ())
    }
}
