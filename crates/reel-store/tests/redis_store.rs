//! Redis store integration tests.

use std::time::Duration;

use reel_models::{Job, JobStatus, Stage};
use reel_store::{
    AssetLedger, CheckpointStore, Dispatch, DispatchQueue, JobStore, RedisStore,
};

/// Test job save/get/delete cycle.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_job_roundtrip() {
    dotenvy::dotenv().ok();

    let store = RedisStore::from_env().expect("Failed to create store");
    let job = Job::new("mountain timelapse", "/tmp/audio.wav", 3600);

    JobStore::save(&store, &job).await.expect("Failed to save");
    let loaded = JobStore::get(&store, &job.id).await.expect("Failed to get").unwrap();
    assert_eq!(loaded.id, job.id);
    assert_eq!(loaded.status, JobStatus::Queued);

    assert!(JobStore::delete(&store, &job.id).await.expect("Failed to delete"));
    assert!(JobStore::get(&store, &job.id).await.unwrap().is_none());
}

/// Test checkpoint append and resume computation.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_checkpoint_cycle() {
    dotenvy::dotenv().ok();

    let store = RedisStore::from_env().expect("Failed to create store");
    let job = Job::new("city drone shots", "/tmp/audio.wav", 3600);

    CheckpointStore::save(&store, &job.id, Stage::AnalyzingAudio)
        .await
        .expect("Failed to checkpoint");
    CheckpointStore::save(&store, &job.id, Stage::FetchingCandidates)
        .await
        .expect("Failed to checkpoint");

    let checkpoint = CheckpointStore::load(&store, &job.id)
        .await
        .expect("Failed to load")
        .expect("Checkpoint missing");
    assert_eq!(
        checkpoint.resume_stage(),
        Some(Stage::DownloadingCandidates)
    );

    CheckpointStore::delete(&store, &job.id)
        .await
        .expect("Failed to delete");
    assert!(CheckpointStore::load(&store, &job.id).await.unwrap().is_none());
}

/// Test lease exclusion between two logical workers.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_lease_exclusion() {
    dotenvy::dotenv().ok();

    let store = RedisStore::from_env().expect("Failed to create store");
    let job = Job::new("rain loops", "/tmp/audio.wav", 3600);

    assert!(store
        .acquire_lease(&job.id, Duration::from_secs(30))
        .await
        .unwrap());
    assert!(!store
        .acquire_lease(&job.id, Duration::from_secs(30))
        .await
        .unwrap());
    assert!(store.lease_held(&job.id).await.unwrap());

    store.release_lease(&job.id).await.unwrap();
    assert!(!store.lease_held(&job.id).await.unwrap());
}

/// Test ledger permanence across connections.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_ledger_permanence() {
    dotenvy::dotenv().ok();

    let store = RedisStore::from_env().expect("Failed to create store");
    let clip_id = format!("it-clip-{}", uuid::Uuid::new_v4());

    store
        .add_rejected(&clip_id, "unwanted content", Some(0.92))
        .await
        .expect("Failed to reject");
    assert!(store.is_rejected(&clip_id).await.unwrap());

    let err = store.add_approved(&clip_id, None).await;
    assert!(err.is_err(), "approval after rejection must fail");
    assert!(store.is_rejected(&clip_id).await.unwrap());
}

/// Test dispatch enqueue/consume/ack cycle.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_dispatch_cycle() {
    dotenvy::dotenv().ok();

    let queue = DispatchQueue::from_env().expect("Failed to create queue");
    queue.init().await.expect("Failed to init");

    let job = Job::new("test dispatch", "/tmp/audio.wav", 3600);
    let dispatch = Dispatch::new(job.id.clone());
    queue.enqueue(&dispatch).await.expect("Failed to enqueue");

    let consumed = queue
        .consume("it-consumer", 1000, 10)
        .await
        .expect("Failed to consume");
    let found = consumed.iter().find(|(_, d)| d.job_id == job.id);
    let (message_id, _) = found.expect("dispatch not consumed");

    queue.ack(message_id).await.expect("Failed to ack");
}
