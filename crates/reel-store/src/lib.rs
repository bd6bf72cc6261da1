//! Durable storage for the Reel backend.
//!
//! This crate provides:
//! - `JobStore`, `CheckpointStore` and `AssetLedger` traits
//! - Redis implementations with per-record TTLs and lease keys
//! - In-memory implementations for tests and local development
//! - A thin Redis-stream dispatch queue handing job ids to workers

pub mod error;
pub mod memory;
pub mod queue;
pub mod redis_store;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use queue::{Dispatch, DispatchQueue, JobDispatcher, QueueConfig};
pub use redis_store::{RedisStore, StoreConfig};
pub use traits::{AssetLedger, Checkpoint, CheckpointStore, JobStore};
