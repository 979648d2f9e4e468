//! Runtime timer adapter for observation waits.

use crate::pipeline::ports::Sleeper;
use async_trait::async_trait;
use std::time::Duration;

/// Sleeper backed by the Tokio runtime timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

impl TokioSleeper {
    /// Creates a runtime-timer sleeper.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
