//! In-process stand-ins for the remote store and the provider.
//!
//! Used by the test suites of the downstream crates and by offline runs of
//! the binary.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use tabsync_core::{ItemId, Rule, RuleId, RulePatch};

use crate::api::{RuleStore, StoreError, SyncProvider};
use crate::types::{
    BatchResponse, ExchangeRequest, ExchangeResponse, ItemRecord, LinkToken, OnboardingStatus,
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Default)]
struct RuleTable {
    rules: Vec<Rule>,
    next_id: u64,
    fail_next: Option<String>,
}

/// Rule store held in memory. Assigns ids `rule-1`, `rule-2`, ...
#[derive(Debug, Default)]
pub struct MemoryRuleStore {
    table: Mutex<RuleTable>,
}

impl MemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds rules that already carry ids.
    pub fn with_rules(rules: Vec<Rule>) -> Self {
        let store = Self::new();
        lock(&store.table).rules = rules;
        store
    }

    /// Makes the next call fail with [`StoreError::Rejected`].
    pub fn fail_next(&self, message: &str) {
        lock(&self.table).fail_next = Some(message.to_string());
    }

    pub fn snapshot(&self) -> Vec<Rule> {
        lock(&self.table).rules.clone()
    }

    fn check_failure(table: &mut RuleTable) -> Result<(), StoreError> {
        match table.fail_next.take() {
            Some(message) => Err(StoreError::Rejected(message)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RuleStore for MemoryRuleStore {
    async fn list_rules(&self) -> Result<Vec<Rule>, StoreError> {
        let mut table = lock(&self.table);
        Self::check_failure(&mut table)?;
        Ok(table.rules.clone())
    }

    async fn create_rule(&self, rule: &Rule) -> Result<Rule, StoreError> {
        let mut table = lock(&self.table);
        Self::check_failure(&mut table)?;
        table.next_id += 1;
        let mut created = rule.clone();
        created.id = Some(RuleId::new(format!("rule-{}", table.next_id)));
        table.rules.push(created.clone());
        Ok(created)
    }

    async fn update_rule(&self, id: &RuleId, patch: &RulePatch) -> Result<Rule, StoreError> {
        let mut table = lock(&self.table);
        Self::check_failure(&mut table)?;
        let rule = table
            .rules
            .iter_mut()
            .find(|r| r.id.as_ref() == Some(id))
            .ok_or_else(|| StoreError::NotFound(format!("rules/{id}")))?;
        rule.apply_patch(patch);
        Ok(rule.clone())
    }

    async fn delete_rule(&self, id: &RuleId) -> Result<(), StoreError> {
        let mut table = lock(&self.table);
        Self::check_failure(&mut table)?;
        let before = table.rules.len();
        table.rules.retain(|r| r.id.as_ref() != Some(id));
        if table.rules.len() == before {
            return Err(StoreError::NotFound(format!("rules/{id}")));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Script {
    items: Vec<ItemRecord>,
    batches: HashMap<ItemId, VecDeque<Result<BatchResponse, StoreError>>>,
    statuses: HashMap<ItemId, VecDeque<Result<OnboardingStatus, StoreError>>>,
    exchange: Option<ExchangeResponse>,
    calls: Vec<String>,
}

/// A provider that replays queued responses in order and records every call.
///
/// Batches are consumed one per call. Status responses are consumed too,
/// except the last one, which keeps being returned.
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    script: Mutex<Script>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_item(self, item_id: &str) -> Self {
        self.with_record(ItemRecord::new(ItemId::new(item_id)))
    }

    pub fn with_record(self, record: ItemRecord) -> Self {
        lock(&self.script).items.push(record);
        self
    }

    pub fn push_batch(&self, item_id: &str, batch: BatchResponse) {
        self.push_batch_result(item_id, Ok(batch));
    }

    pub fn push_batch_error(&self, item_id: &str, error: StoreError) {
        self.push_batch_result(item_id, Err(error));
    }

    fn push_batch_result(&self, item_id: &str, result: Result<BatchResponse, StoreError>) {
        lock(&self.script)
            .batches
            .entry(ItemId::new(item_id))
            .or_default()
            .push_back(result);
    }

    pub fn push_status(&self, item_id: &str, status: OnboardingStatus) {
        self.push_status_result(item_id, Ok(status));
    }

    pub fn push_status_error(&self, item_id: &str, error: StoreError) {
        self.push_status_result(item_id, Err(error));
    }

    fn push_status_result(&self, item_id: &str, result: Result<OnboardingStatus, StoreError>) {
        lock(&self.script)
            .statuses
            .entry(ItemId::new(item_id))
            .or_default()
            .push_back(result);
    }

    pub fn set_exchange_response(&self, response: ExchangeResponse) {
        lock(&self.script).exchange = Some(response);
    }

    /// Every call made so far, e.g. `batch:item-1`.
    pub fn calls(&self) -> Vec<String> {
        lock(&self.script).calls.clone()
    }

    pub fn remaining_batches(&self, item_id: &str) -> usize {
        lock(&self.script)
            .batches
            .get(&ItemId::new(item_id))
            .map_or(0, VecDeque::len)
    }
}

fn replay_error(e: &StoreError) -> StoreError {
    match e {
        StoreError::Timeout(m) => StoreError::Timeout(m.clone()),
        StoreError::Unavailable(m) => StoreError::Unavailable(m.clone()),
        StoreError::NotFound(m) => StoreError::NotFound(m.clone()),
        StoreError::Rejected(m) => StoreError::Rejected(m.clone()),
        StoreError::Decode(m) => StoreError::Decode(m.clone()),
        StoreError::Config(m) => StoreError::Config(m.clone()),
        StoreError::Http { status, body } => StoreError::Http {
            status: *status,
            body: body.clone(),
        },
        StoreError::Transport(e) => StoreError::Unavailable(e.to_string()),
    }
}

#[async_trait]
impl SyncProvider for ScriptedProvider {
    async fn list_items(&self) -> Result<Vec<ItemRecord>, StoreError> {
        let mut script = lock(&self.script);
        script.calls.push("items".to_string());
        Ok(script.items.clone())
    }

    async fn next_batch(&self, item_id: &ItemId) -> Result<BatchResponse, StoreError> {
        let mut script = lock(&self.script);
        script.calls.push(format!("batch:{item_id}"));
        script
            .batches
            .get_mut(item_id)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Err(StoreError::NotFound(format!("no batch queued for {item_id}"))))
    }

    async fn get_item(&self, item_id: &ItemId) -> Result<ItemRecord, StoreError> {
        let mut script = lock(&self.script);
        script.calls.push(format!("item:{item_id}"));
        Ok(script
            .items
            .iter()
            .find(|i| &i.item_id == item_id)
            .cloned()
            .unwrap_or_else(|| ItemRecord::new(item_id.clone())))
    }

    async fn onboarding_status(&self, item_id: &ItemId) -> Result<OnboardingStatus, StoreError> {
        let mut script = lock(&self.script);
        script.calls.push(format!("status:{item_id}"));
        let queue = script
            .statuses
            .get_mut(item_id)
            .ok_or_else(|| StoreError::NotFound(format!("no status queued for {item_id}")))?;
        let next = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().map(|r| match r {
                Ok(status) => Ok(status.clone()),
                Err(e) => Err(replay_error(e)),
            })
        };
        next.unwrap_or_else(|| Err(StoreError::NotFound(format!("no status queued for {item_id}"))))
    }

    async fn create_link_token(&self, item_id: Option<&ItemId>) -> Result<LinkToken, StoreError> {
        let mut script = lock(&self.script);
        let token = match item_id {
            Some(id) => {
                script.calls.push(format!("link:{id}"));
                format!("link-update-{id}")
            }
            None => {
                script.calls.push("link".to_string());
                "link-new".to_string()
            }
        };
        Ok(LinkToken { link_token: token })
    }

    async fn exchange_public_token(
        &self,
        request: &ExchangeRequest,
    ) -> Result<ExchangeResponse, StoreError> {
        let mut script = lock(&self.script);
        script.calls.push(format!("exchange:{}", request.public_token));
        Ok(script.exchange.clone().unwrap_or_default())
    }
}
