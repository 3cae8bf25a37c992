pub mod api;
pub mod http;
pub mod memory;
pub mod retry;
pub mod types;

pub use api::{RuleStore, StoreError, SyncProvider};
pub use http::{ApiClient, ApiConfig};
pub use memory::{MemoryRuleStore, ScriptedProvider};
pub use retry::{Replay, RetryPolicy};
pub use types::{
    BatchResponse, ExchangeRequest, ExchangeResponse, FailureDetails, ItemRecord, LinkToken,
    OnboardingStatus, StatusProgress, SyncStats, SyncStatus,
};
