//! Video assembly worker.
//!
//! This crate provides:
//! - The stage runner driving jobs through the fixed pipeline
//! - Duration-constrained clip selection
//! - Backoff-governed calls to flaky collaborators
//! - Orphan job recovery and lease heartbeats
//! - The queue executor and worker binary

pub mod backoff;
pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod logging;
pub mod planner;
pub mod recovery;
pub mod runner;
pub mod stages;

pub use backoff::{BackoffExecutor, BackoffPolicy, NoopObserver, RetryObserver};
pub use clock::{Clock, SystemClock};
pub use config::WorkerConfig;
pub use context::WorkerContext;
pub use error::{WorkerError, WorkerResult};
pub use executor::QueueExecutor;
pub use logging::JobLogger;
pub use planner::{plan_selection, SelectionPlan};
pub use recovery::{OrphanRecoveryScanner, RecoveryReport};
pub use runner::StageRunner;
pub use stages::JobArtifacts;
