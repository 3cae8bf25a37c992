//! Observes a sync that runs on the backend by polling its status.
//!
//! Cancelling a poll only stops the local observation. The remote job keeps
//! running and its outcome is unknown to the caller.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tabsync_core::ItemId;
use tabsync_storage::{StatusProgress, SyncProvider, SyncStatus};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub interval_ms: u64,
    /// Ceiling on the whole observation, not on a single request.
    pub timeout_secs: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: 2000,
            timeout_secs: 300,
        }
    }
}

#[derive(Debug, Error)]
pub enum PollError {
    #[error("No terminal status for {item_id} after {}s", .after.as_secs())]
    Timeout { item_id: ItemId, after: Duration },
    #[error("Polling task ended abnormally: {0}")]
    Aborted(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Completed(StatusProgress),
    Failed(String),
    Cancelled,
}

/// Latest known state of an observed sync.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollProgress {
    pub polls: u32,
    pub status: Option<SyncStatus>,
    pub progress: StatusProgress,
    pub last_error: Option<String>,
}

/// Caller's side of a running poll. Dropping it cancels the poll.
pub struct PollHandle {
    item_id: ItemId,
    progress: watch::Receiver<PollProgress>,
    cancel: CancellationToken,
    task: JoinHandle<Result<PollOutcome, PollError>>,
    _guard: DropGuard,
}

impl PollHandle {
    pub fn item_id(&self) -> &ItemId {
        &self.item_id
    }

    pub fn progress(&self) -> PollProgress {
        self.progress.borrow().clone()
    }

    /// A receiver that sees every progress update, including after the
    /// handle is consumed by [`PollHandle::wait`].
    pub fn subscribe(&self) -> watch::Receiver<PollProgress> {
        self.progress.clone()
    }

    /// Stops the timer and abandons any request in flight.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A token that cancels this poll, for use after the handle is consumed.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn wait(mut self) -> Result<PollOutcome, PollError> {
        match (&mut self.task).await {
            Ok(result) => result,
            Err(e) => Err(PollError::Aborted(e.to_string())),
        }
    }
}

pub struct SyncStatusTracker<P: SyncProvider + ?Sized> {
    provider: Arc<P>,
    config: PollConfig,
}

impl<P: SyncProvider + ?Sized + 'static> SyncStatusTracker<P> {
    pub fn new(provider: Arc<P>, config: PollConfig) -> Self {
        Self { provider, config }
    }

    /// Spawns the poll loop on the current runtime. The first status request
    /// goes out immediately, then one per interval.
    pub fn start_polling(&self, item_id: ItemId) -> PollHandle {
        let (tx, rx) = watch::channel(PollProgress::default());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_poll(
            Arc::clone(&self.provider),
            item_id.clone(),
            self.config,
            tx,
            cancel.clone(),
        ));
        tracing::info!(item = %item_id, interval_ms = self.config.interval_ms, "Started polling");
        PollHandle {
            item_id,
            progress: rx,
            _guard: cancel.clone().drop_guard(),
            cancel,
            task,
        }
    }
}

async fn run_poll<P: SyncProvider + ?Sized>(
    provider: Arc<P>,
    item_id: ItemId,
    config: PollConfig,
    progress: watch::Sender<PollProgress>,
    cancel: CancellationToken,
) -> Result<PollOutcome, PollError> {
    let after = Duration::from_secs(config.timeout_secs);
    let deadline = tokio::time::sleep(after);
    tokio::pin!(deadline);
    let mut tick = tokio::time::interval(Duration::from_millis(config.interval_ms.max(1)));
    let timeout = || PollError::Timeout {
        item_id: item_id.clone(),
        after,
    };

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(cancelled(&item_id)),
            _ = &mut deadline => return Err(timeout()),
            _ = tick.tick() => {}
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(cancelled(&item_id)),
            _ = &mut deadline => return Err(timeout()),
            result = provider.onboarding_status(&item_id) => result,
        };

        match result {
            Ok(status) => {
                progress.send_modify(|p| {
                    p.polls += 1;
                    p.status = Some(status.status);
                    p.progress = status.progress.clone();
                    p.last_error = None;
                });
                if status.status == SyncStatus::Completed || status.completed {
                    tracing::info!(item = %item_id, "Sync finished");
                    return Ok(PollOutcome::Completed(status.progress));
                }
                if status.status == SyncStatus::Error {
                    let message = status
                        .error
                        .unwrap_or_else(|| "Sync reported an error".to_string());
                    tracing::warn!(item = %item_id, error = %message, "Sync failed");
                    return Ok(PollOutcome::Failed(message));
                }
            }
            Err(e) => {
                tracing::warn!(item = %item_id, error = %e, "Status poll failed, will retry");
                progress.send_modify(|p| {
                    p.polls += 1;
                    p.last_error = Some(e.to_string());
                });
            }
        }
    }
}

fn cancelled(item_id: &ItemId) -> PollOutcome {
    tracing::debug!(item = %item_id, "Polling cancelled");
    PollOutcome::Cancelled
}
