//! Video assembly worker binary.

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use reel_media::ArtifactSweeper;
use reel_store::DispatchQueue;
use reel_worker::{OrphanRecoveryScanner, QueueExecutor, WorkerConfig, WorkerContext};

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Load environment variables
    dotenvy::dotenv().ok();

    // Colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env().add_directive("reel=info".parse().unwrap());

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting reel-worker");

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    let ctx = match WorkerContext::from_env(config).await {
        Ok(ctx) => Arc::new(ctx),
        Err(e) => {
            error!("Failed to build worker context: {}", e);
            std::process::exit(1);
        }
    };

    let queue = match DispatchQueue::from_env() {
        Ok(q) => q,
        Err(e) => {
            error!("Failed to create dispatch queue: {}", e);
            std::process::exit(1);
        }
    };

    // Recovery scanner re-dispatches through its own queue handle.
    let recovery_queue = match DispatchQueue::from_env() {
        Ok(q) => Arc::new(q),
        Err(e) => {
            error!("Failed to create recovery queue: {}", e);
            std::process::exit(1);
        }
    };

    let scanner = OrphanRecoveryScanner::new(Arc::clone(&ctx), recovery_queue);
    let scanner_task = tokio::spawn(async move { scanner.run().await });

    let sweeper = ArtifactSweeper::new(
        ctx.layout.clone(),
        ctx.jobs.clone(),
        ctx.ledger.clone(),
        ctx.config.artifact_max_age,
        ctx.config.sweep_interval,
    );
    let sweeper_task = tokio::spawn(async move { sweeper.run().await });

    let executor = Arc::new(QueueExecutor::new(Arc::clone(&ctx), queue));

    // Stop consuming on ctrl-c; in-flight jobs drain under the timeout.
    let signal_executor = Arc::clone(&executor);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        signal_executor.shutdown();
    });

    if let Err(e) = executor.run().await {
        error!("Executor error: {}", e);
        std::process::exit(1);
    }

    scanner_task.abort();
    sweeper_task.abort();

    info!("Worker shutdown complete");
}
