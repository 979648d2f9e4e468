//! Port for interruptible waiting between observation polls.

use async_trait::async_trait;
use std::time::Duration;

/// Asynchronous waiting contract.
///
/// Production adapters delegate to the runtime timer; tests substitute a
/// recording fake so observation windows elapse instantly.
#[async_trait]
pub trait Sleeper: Send + Sync {
    /// Waits for `duration`.
    async fn sleep(&self, duration: Duration);
}
