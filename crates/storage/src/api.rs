use async_trait::async_trait;
use tabsync_core::{ItemId, Rule, RuleId, RulePatch};
use thiserror::Error;

use crate::types::{
    BatchResponse, ExchangeRequest, ExchangeResponse, ItemRecord, LinkToken, OnboardingStatus,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),
    /// No response arrived in time. The server may still have acted on it.
    #[error("Request timed out: {0}")]
    Timeout(String),
    #[error("Service unavailable: {0}")]
    Unavailable(String),
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Rejected by store: {0}")]
    Rejected(String),
    #[error("Failed to decode response: {0}")]
    Decode(String),
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl StoreError {
    /// Whether sending the same request again may succeed. Only replay
    /// requests the server treats as idempotent on this basis.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Transport(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            StoreError::Timeout(_) | StoreError::Unavailable(_) => true,
            StoreError::Http { status, .. } => *status >= 500 || *status == 429,
            StoreError::NotFound(_)
            | StoreError::Rejected(_)
            | StoreError::Decode(_)
            | StoreError::Config(_) => false,
        }
    }

    /// Whether the server provably did not act on the request: the
    /// connection was never made, or it answered with a throttle or server
    /// error. Non-idempotent requests are replayed only in these cases.
    pub fn is_undelivered(&self) -> bool {
        match self {
            StoreError::Transport(e) => e.is_connect(),
            StoreError::Unavailable(_) => true,
            StoreError::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

/// `GET/POST/PUT/DELETE rules`.
#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn list_rules(&self) -> Result<Vec<Rule>, StoreError>;

    /// Persists a rule that has no id yet and returns it with the assigned id.
    async fn create_rule(&self, rule: &Rule) -> Result<Rule, StoreError>;

    async fn update_rule(&self, id: &RuleId, patch: &RulePatch) -> Result<Rule, StoreError>;

    async fn delete_rule(&self, id: &RuleId) -> Result<(), StoreError>;
}

/// The `plaid/*` endpoints the sync and link flows depend on.
#[async_trait]
pub trait SyncProvider: Send + Sync {
    async fn list_items(&self) -> Result<Vec<ItemRecord>, StoreError>;

    /// Pulls the next batch for `item_id`. The backend owns the cursor, so
    /// each call advances it.
    async fn next_batch(&self, item_id: &ItemId) -> Result<BatchResponse, StoreError>;

    async fn get_item(&self, item_id: &ItemId) -> Result<ItemRecord, StoreError>;

    async fn onboarding_status(&self, item_id: &ItemId) -> Result<OnboardingStatus, StoreError>;

    /// Link token for a new connection, or for update mode when `item_id` is set.
    async fn create_link_token(&self, item_id: Option<&ItemId>) -> Result<LinkToken, StoreError>;

    async fn exchange_public_token(
        &self,
        request: &ExchangeRequest,
    ) -> Result<ExchangeResponse, StoreError>;
}
