use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

use crate::api::StoreError;

/// Whether a request can be replayed after a failure whose delivery is
/// unknown, such as a timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Replay {
    /// Sending it twice has the same effect as once.
    Idempotent,
    /// Creates something or advances server state. Retried only when the
    /// server provably never acted on it.
    Once,
}

/// Request-level retry for transient transport failures. Independent of
/// sync sessions, which never retry a failed batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff_ms: 500,
        }
    }
}

impl RetryPolicy {
    /// Linear backoff: nothing before the first attempt, then one more
    /// `backoff_ms` step per attempt.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_ms * u64::from(attempt.saturating_sub(1)))
    }

    pub async fn run<T, F, Fut>(
        &self,
        what: &str,
        replay: Replay,
        mut op: F,
    ) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;
        loop {
            if attempt > 1 {
                tokio::time::sleep(self.delay_before(attempt)).await;
            }
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < attempts && retryable(&e, replay) => {
                    tracing::warn!(request = what, attempt, "Transient failure, retrying: {e}");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn retryable(e: &StoreError, replay: Replay) -> bool {
    match replay {
        Replay::Idempotent => e.is_transient(),
        Replay::Once => e.is_undelivered(),
    }
}
