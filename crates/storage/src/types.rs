//! Request and response shapes of the provider-facing endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tabsync_core::{ItemId, Transaction};

/// Counts of changes reported by the provider, per batch or cumulative.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    #[serde(default)]
    pub added: u64,
    #[serde(default)]
    pub modified: u64,
    #[serde(default)]
    pub removed: u64,
}

impl SyncStats {
    pub fn new(added: u64, modified: u64, removed: u64) -> Self {
        Self {
            added,
            modified,
            removed,
        }
    }

    pub fn accumulate(&mut self, batch: &SyncStats) {
        self.added += batch.added;
        self.modified += batch.modified;
        self.removed += batch.removed;
    }

    pub fn total(&self) -> u64 {
        self.added + self.modified + self.removed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Queued,
    InProgress,
    Completed,
    Error,
}

impl SyncStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SyncStatus::Completed | SyncStatus::Error)
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncStatus::Queued => write!(f, "queued"),
            SyncStatus::InProgress => write!(f, "in_progress"),
            SyncStatus::Completed => write!(f, "completed"),
            SyncStatus::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDetails {
    pub message: String,
}

/// One page of the incremental pull for an item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResponse {
    #[serde(default)]
    pub batch_results: SyncStats,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub added_transactions: Option<Vec<Transaction>>,
    #[serde(default)]
    pub has_failures: bool,
    #[serde(default)]
    pub failure_details: Option<FailureDetails>,
    /// Position after this batch, when the backend chooses to expose it.
    #[serde(default)]
    pub cursor: Option<String>,
}

impl BatchResponse {
    pub fn page(batch_results: SyncStats, has_more: bool) -> Self {
        Self {
            batch_results,
            has_more,
            added_transactions: None,
            has_failures: false,
            failure_details: None,
            cursor: None,
        }
    }

    pub fn failure(message: &str) -> Self {
        Self {
            batch_results: SyncStats::default(),
            has_more: false,
            added_transactions: None,
            has_failures: true,
            failure_details: Some(FailureDetails {
                message: message.to_string(),
            }),
            cursor: None,
        }
    }

    pub fn with_transactions(mut self, transactions: Vec<Transaction>) -> Self {
        self.added_transactions = Some(transactions);
        self
    }

    pub fn failure_message(&self) -> String {
        self.failure_details
            .as_ref()
            .map(|d| d.message.clone())
            .unwrap_or_else(|| "Provider reported a batch failure".to_string())
    }
}

/// A linked item as the backend stores it. Only the id is interpreted here;
/// everything else is passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemRecord {
    #[serde(alias = "item_id")]
    pub item_id: ItemId,
    #[serde(flatten)]
    pub details: serde_json::Map<String, serde_json::Value>,
}

impl ItemRecord {
    pub fn new(item_id: ItemId) -> Self {
        Self {
            item_id,
            details: serde_json::Map::new(),
        }
    }

    /// When the backend plans to pull this item again, if it says so.
    pub fn next_sync(&self) -> Option<DateTime<Utc>> {
        self.details
            .get("nextSync")
            .and_then(|v| DateTime::<Utc>::deserialize(v).ok())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusProgress {
    #[serde(default)]
    pub added: u64,
    #[serde(default)]
    pub modified: u64,
    #[serde(default)]
    pub removed: u64,
    #[serde(default)]
    pub last_sync: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_sync: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cursor: Option<String>,
}

/// Response of the onboarding status endpoint, used by the poller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnboardingStatus {
    pub status: SyncStatus,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub progress: StatusProgress,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkToken {
    pub link_token: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeRequest {
    pub public_token: String,
    pub metadata: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_id: Option<ItemId>,
}

/// Either `{itemId}` or `{error}`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeResponse {
    #[serde(default)]
    pub item_id: Option<ItemId>,
    #[serde(default)]
    pub error: Option<String>,
}
