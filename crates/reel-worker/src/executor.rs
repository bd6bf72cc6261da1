//! Queue executor.
//!
//! Pulls dispatches from the shared stream, takes the job's processing
//! lease, and runs the stage runner under a concurrency semaphore. A
//! heartbeat task renews the lease while the job executes so the recovery
//! scanner can tell a slow worker from a dead one.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use reel_store::{Dispatch, DispatchQueue};

use crate::context::WorkerContext;
use crate::error::WorkerResult;
use crate::runner::StageRunner;

/// Worker loop consuming dispatches.
pub struct QueueExecutor {
    ctx: Arc<WorkerContext>,
    queue: Arc<DispatchQueue>,
    job_semaphore: Arc<Semaphore>,
    shutdown: tokio::sync::watch::Sender<bool>,
    consumer_name: String,
}

impl QueueExecutor {
    pub fn new(ctx: Arc<WorkerContext>, queue: DispatchQueue) -> Self {
        let job_semaphore = Arc::new(Semaphore::new(ctx.config.max_concurrent_jobs));
        let (shutdown, _) = tokio::sync::watch::channel(false);
        let consumer_name = format!("worker-{}", Uuid::new_v4());

        Self {
            ctx,
            queue: Arc::new(queue),
            job_semaphore,
            shutdown,
            consumer_name,
        }
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Start the executor.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            "Starting queue executor '{}' with {} max concurrent jobs",
            self.consumer_name, self.ctx.config.max_concurrent_jobs
        );

        self.queue.init().await?;

        let mut shutdown_rx = self.shutdown.subscribe();

        // Periodically re-claim dispatches abandoned by crashed workers.
        let claim_task = {
            let queue = Arc::clone(&self.queue);
            let ctx = Arc::clone(&self.ctx);
            let semaphore = Arc::clone(&self.job_semaphore);
            let consumer_name = self.consumer_name.clone();
            let mut shutdown_rx = self.shutdown.subscribe();

            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(Duration::from_secs(30));
                loop {
                    tokio::select! {
                        _ = shutdown_rx.changed() => {
                            if *shutdown_rx.borrow() {
                                break;
                            }
                        }
                        _ = ticker.tick() => {
                            match queue.claim_pending(&consumer_name, 5).await {
                                Ok(claimed) if !claimed.is_empty() => {
                                    info!("Claimed {} pending dispatches", claimed.len());
                                    for (message_id, dispatch) in claimed {
                                        Self::spawn_job(&ctx, &queue, &semaphore, message_id, dispatch).await;
                                    }
                                }
                                Ok(_) => {}
                                Err(e) => warn!("Failed to claim pending dispatches: {}", e),
                            }
                        }
                    }
                }
            })
        };

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping executor");
                        break;
                    }
                }
                result = self.consume_batch() => {
                    if let Err(e) = result {
                        error!("Error consuming dispatches: {}", e);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        }

        claim_task.abort();

        info!("Waiting for in-flight jobs to complete...");
        let _ = tokio::time::timeout(self.ctx.config.shutdown_timeout, self.wait_for_jobs()).await;

        info!("Queue executor stopped");
        Ok(())
    }

    async fn consume_batch(&self) -> WorkerResult<()> {
        let available = self.job_semaphore.available_permits();
        if available == 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            return Ok(());
        }

        let dispatches = self
            .queue
            .consume(&self.consumer_name, 1000, available.min(5))
            .await?;

        for (message_id, dispatch) in dispatches {
            Self::spawn_job(
                &self.ctx,
                &self.queue,
                &self.job_semaphore,
                message_id,
                dispatch,
            )
            .await;
        }
        Ok(())
    }

    async fn spawn_job(
        ctx: &Arc<WorkerContext>,
        queue: &Arc<DispatchQueue>,
        semaphore: &Arc<Semaphore>,
        message_id: String,
        dispatch: Dispatch,
    ) {
        let Ok(permit) = Arc::clone(semaphore).acquire_owned().await else {
            return;
        };
        let ctx = Arc::clone(ctx);
        let queue = Arc::clone(queue);

        tokio::spawn(async move {
            let _permit = permit;
            Self::execute_dispatch(ctx, queue, message_id, dispatch).await;
        });
    }

    /// Execute one dispatch end to end: lease, heartbeat, run, ack.
    async fn execute_dispatch(
        ctx: Arc<WorkerContext>,
        queue: Arc<DispatchQueue>,
        message_id: String,
        dispatch: Dispatch,
    ) {
        let job_id = dispatch.job_id.clone();

        match ctx
            .jobs
            .acquire_lease(&job_id, ctx.config.lease_ttl)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                // Another worker owns it; leave the message for later so it
                // is retried if that worker dies.
                debug!(job_id = %job_id, "Lease busy, leaving dispatch pending");
                return;
            }
            Err(e) => {
                warn!(job_id = %job_id, "Lease acquisition failed: {}", e);
                return;
            }
        }

        // Renew the lease while the runner works.
        let heartbeat = {
            let ctx = Arc::clone(&ctx);
            let job_id = job_id.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(ctx.config.heartbeat_interval);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    if let Err(e) = ctx.jobs.renew_lease(&job_id, ctx.config.lease_ttl).await {
                        warn!(job_id = %job_id, "Lease renewal failed: {}", e);
                    }
                }
            })
        };

        info!(job_id = %job_id, resumed = dispatch.resumed, "Executing dispatch");
        let result = StageRunner::new(Arc::clone(&ctx)).run(&job_id).await;

        heartbeat.abort();
        if let Err(e) = ctx.jobs.release_lease(&job_id).await {
            warn!(job_id = %job_id, "Lease release failed: {}", e);
        }

        match result {
            Ok(()) => {
                if let Err(e) = queue.ack(&message_id).await {
                    error!(job_id = %job_id, "Failed to ack dispatch: {}", e);
                }
            }
            Err(e) => {
                error!(job_id = %job_id, "Job run failed: {}", e);
                // A job that reached a terminal record is done as far as the
                // queue is concerned; only infrastructure failures leave the
                // dispatch pending for re-claim.
                match ctx.jobs.get(&job_id).await {
                    Ok(Some(job)) if job.is_terminal() => {
                        queue.ack(&message_id).await.ok();
                    }
                    Ok(_) => {
                        debug!(job_id = %job_id, "Leaving dispatch pending for retry");
                    }
                    Err(store_err) => {
                        warn!(job_id = %job_id, "Post-run job lookup failed: {}", store_err);
                    }
                }
            }
        }
    }

    async fn wait_for_jobs(&self) {
        loop {
            if self.job_semaphore.available_permits() == self.ctx.config.max_concurrent_jobs {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}
