use chrono::{DateTime, Utc};
use serde::Serialize;
use tabsync_core::ItemId;
use tabsync_storage::{BatchResponse, SyncStats, SyncStatus};

/// State of one sync call for one item.
///
/// `queued -> in_progress -> completed | error`. Once terminal, further
/// transitions are ignored.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSession {
    pub item_id: ItemId,
    pub cursor: Option<String>,
    pub status: SyncStatus,
    pub stats: SyncStats,
    /// 1-based number of the batch being fetched; 0 while queued.
    pub batch_number: u32,
    pub started_at: DateTime<Utc>,
    pub last_sync: Option<DateTime<Utc>>,
    pub next_sync: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl SyncSession {
    pub fn new(item_id: ItemId) -> Self {
        Self {
            item_id,
            cursor: None,
            status: SyncStatus::Queued,
            stats: SyncStats::default(),
            batch_number: 0,
            started_at: Utc::now(),
            last_sync: None,
            next_sync: None,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn begin(&mut self) {
        if self.status == SyncStatus::Queued {
            self.status = SyncStatus::InProgress;
            self.batch_number = 1;
            self.started_at = Utc::now();
        }
    }

    /// Folds a successful batch into the cumulative stats.
    pub fn record_batch(&mut self, batch: &BatchResponse) {
        if self.status != SyncStatus::InProgress {
            return;
        }
        self.stats.accumulate(&batch.batch_results);
        if let Some(cursor) = &batch.cursor {
            self.cursor = Some(cursor.clone());
        }
    }

    pub fn advance(&mut self) {
        if self.status == SyncStatus::InProgress {
            self.batch_number += 1;
        }
    }

    /// Marks the pull finished. `next_sync` is the backend's schedule for
    /// the item, when it reports one.
    pub fn complete(&mut self, next_sync: Option<DateTime<Utc>>) {
        if !self.is_terminal() {
            self.status = SyncStatus::Completed;
            self.last_sync = Some(Utc::now());
            self.next_sync = next_sync;
        }
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        if !self.is_terminal() {
            self.status = SyncStatus::Error;
            self.error = Some(message.into());
        }
    }
}
