//! Injectable clock.
//!
//! The backoff executor sleeps through this trait so tests can drive retry
//! schedules without real delays.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Time source and sleeper.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
    async fn sleep(&self, duration: Duration);
}

/// Wall-clock implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
