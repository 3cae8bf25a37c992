use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tabsync_core::{ItemId, Transaction};
use tabsync_rules::Workspace;
use tabsync_storage::{ItemRecord, StoreError, SyncProvider, SyncStats, SyncStatus};

use crate::link::{self, LinkError};
use crate::session::SyncSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Pause between consecutive batches of one item.
    pub batch_delay_ms: u64,
    /// Upper bound on batches per session, for providers that never stop
    /// reporting `hasMore`.
    pub max_batches: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_delay_ms: 1000,
            max_batches: 500,
        }
    }
}

/// Where transactions pulled during a sync end up.
pub trait TransactionSink {
    fn receive(&mut self, item_id: &ItemId, transactions: Vec<Transaction>);

    /// Called once when a session ends, whatever its outcome.
    fn finish(&mut self, _item_id: &ItemId) {}
}

impl TransactionSink for Workspace {
    fn receive(&mut self, item_id: &ItemId, transactions: Vec<Transaction>) {
        let count = transactions.len();
        let added = self.upsert_transactions(transactions);
        tracing::debug!(item = %item_id, received = count, added, "Stored transactions");
    }

    fn finish(&mut self, _item_id: &ItemId) {
        self.refresh_all();
    }
}

impl TransactionSink for Vec<Transaction> {
    fn receive(&mut self, _item_id: &ItemId, transactions: Vec<Transaction>) {
        self.extend(transactions);
    }
}

/// Result of syncing one item. Failures are reported here rather than as
/// errors so a multi-item run can carry on.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOutcome {
    pub completed: bool,
    pub item_id: ItemId,
    pub stats: SyncStats,
    pub batches: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item: Option<ItemRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_sync: Option<DateTime<Utc>>,
}

impl SyncOutcome {
    fn from_session(session: SyncSession, item: Option<ItemRecord>) -> Self {
        Self {
            completed: session.status == SyncStatus::Completed,
            item_id: session.item_id,
            stats: session.stats,
            batches: session.batch_number,
            item,
            error: session.error,
            cursor: session.cursor,
            last_sync: session.last_sync,
            next_sync: session.next_sync,
        }
    }
}

/// Drives the batch loop of the incremental pull, one item at a time.
pub struct SyncOrchestrator<P: SyncProvider + ?Sized> {
    provider: Arc<P>,
    config: SyncConfig,
}

impl<P: SyncProvider + ?Sized> SyncOrchestrator<P> {
    pub fn new(provider: Arc<P>, config: SyncConfig) -> Self {
        Self { provider, config }
    }

    /// Pulls batches until the provider reports no more, then fetches the
    /// item record. A failed batch ends the session on the spot and is not
    /// retried.
    pub async fn sync_item(&self, item_id: &ItemId, sink: &mut dyn TransactionSink) -> SyncOutcome {
        let mut session = SyncSession::new(item_id.clone());
        session.begin();
        tracing::info!(item = %item_id, "Starting sync");

        let delay = Duration::from_millis(self.config.batch_delay_ms);
        loop {
            if session.batch_number > self.config.max_batches {
                session.fail(format!(
                    "Gave up after {} batches without reaching the end",
                    self.config.max_batches
                ));
                break;
            }

            let batch = match self.provider.next_batch(item_id).await {
                Ok(batch) => batch,
                Err(e) => {
                    session.fail(format!("Batch {} failed: {e}", session.batch_number));
                    break;
                }
            };
            if batch.has_failures {
                session.fail(batch.failure_message());
                break;
            }

            session.record_batch(&batch);
            tracing::debug!(
                item = %item_id,
                batch = session.batch_number,
                added = batch.batch_results.added,
                modified = batch.batch_results.modified,
                removed = batch.batch_results.removed,
                has_more = batch.has_more,
                "Processed batch"
            );
            if let Some(transactions) = batch.added_transactions {
                if !transactions.is_empty() {
                    sink.receive(item_id, transactions);
                }
            }

            if !batch.has_more {
                break;
            }
            session.advance();
            tokio::time::sleep(delay).await;
        }

        let mut item = None;
        if !session.is_terminal() {
            match self.provider.get_item(item_id).await {
                Ok(record) => {
                    session.complete(record.next_sync());
                    item = Some(record);
                }
                Err(e) => session.fail(format!("Failed to fetch item record: {e}")),
            }
        }
        sink.finish(item_id);

        match &session.error {
            None => tracing::info!(
                item = %item_id,
                batches = session.batch_number,
                added = session.stats.added,
                modified = session.stats.modified,
                removed = session.stats.removed,
                "Sync completed"
            ),
            Some(error) => tracing::warn!(
                item = %item_id,
                batch = session.batch_number,
                %error,
                "Sync failed"
            ),
        }
        SyncOutcome::from_session(session, item)
    }

    /// Syncs items in order, each one finishing before the next starts. A
    /// failed item does not stop the rest.
    pub async fn sync_items(
        &self,
        item_ids: &[ItemId],
        sink: &mut dyn TransactionSink,
    ) -> Vec<SyncOutcome> {
        let mut outcomes = Vec::with_capacity(item_ids.len());
        for item_id in item_ids {
            outcomes.push(self.sync_item(item_id, sink).await);
        }
        let failed = outcomes.iter().filter(|o| !o.completed).count();
        tracing::info!(items = outcomes.len(), failed, "Finished multi-item sync");
        outcomes
    }

    /// Syncs every linked item in the order the backend lists them.
    pub async fn sync_all(
        &self,
        sink: &mut dyn TransactionSink,
    ) -> Result<Vec<SyncOutcome>, StoreError> {
        let items = self.provider.list_items().await?;
        let ids: Vec<ItemId> = items.into_iter().map(|i| i.item_id).collect();
        Ok(self.sync_items(&ids, sink).await)
    }

    /// Exchanges a public token, then syncs the newly linked item.
    pub async fn connect_item(
        &self,
        public_token: &str,
        metadata: serde_json::Value,
        item_id: Option<ItemId>,
        sink: &mut dyn TransactionSink,
    ) -> Result<SyncOutcome, LinkError> {
        let item_id =
            link::exchange_public_token(self.provider.as_ref(), public_token, metadata, item_id)
                .await?;
        Ok(self.sync_item(&item_id, sink).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tabsync_core::{AccountId, Money, Tab, TabId, TransactionId};
    use tabsync_storage::{BatchResponse, ExchangeResponse, ScriptedProvider};

    fn config() -> SyncConfig {
        SyncConfig {
            batch_delay_ms: 1000,
            max_batches: 10,
        }
    }

    fn orchestrator(provider: &Arc<ScriptedProvider>) -> SyncOrchestrator<ScriptedProvider> {
        SyncOrchestrator::new(Arc::clone(provider), config())
    }

    fn tx(id: &str) -> Transaction {
        Transaction {
            id: TransactionId::new(id),
            amount: Money::from_cents(1000),
            category: String::new(),
            date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            name: format!("tx {id}"),
            notes: String::new(),
            account_id: AccountId::new("acc-1"),
            item_id: ItemId::new("item-1"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stats_accumulate_across_batches() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_batch("item-1", BatchResponse::page(SyncStats::new(2, 0, 0), true));
        provider.push_batch("item-1", BatchResponse::page(SyncStats::new(3, 0, 0), false));

        let mut sink: Vec<Transaction> = Vec::new();
        let outcome = orchestrator(&provider)
            .sync_item(&ItemId::new("item-1"), &mut sink)
            .await;

        assert!(outcome.completed);
        assert_eq!(outcome.stats.added, 5);
        assert_eq!(outcome.batches, 2);
        assert!(outcome.item.is_some());
        assert!(outcome.error.is_none());
        assert!(outcome.last_sync.is_some());
        assert!(outcome.next_sync.is_none());
        assert_eq!(
            provider.calls(),
            vec!["batch:item-1", "batch:item-1", "item:item-1"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn batches_are_spaced_by_the_delay() {
        let provider = Arc::new(ScriptedProvider::new());
        for has_more in [true, true, false] {
            provider.push_batch("item-1", BatchResponse::page(SyncStats::new(1, 0, 0), has_more));
        }
        let start = tokio::time::Instant::now();
        let outcome = orchestrator(&provider)
            .sync_item(&ItemId::new("item-1"), &mut Vec::<Transaction>::new())
            .await;
        assert!(outcome.completed);
        assert_eq!(start.elapsed(), Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_batch_ends_the_session() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_batch("item-1", BatchResponse::page(SyncStats::new(4, 0, 0), true));
        provider.push_batch("item-1", BatchResponse::failure("ITEM_LOGIN_REQUIRED"));
        provider.push_batch("item-1", BatchResponse::page(SyncStats::new(9, 0, 0), false));

        let outcome = orchestrator(&provider)
            .sync_item(&ItemId::new("item-1"), &mut Vec::<Transaction>::new())
            .await;

        assert!(!outcome.completed);
        assert_eq!(outcome.error.as_deref(), Some("ITEM_LOGIN_REQUIRED"));
        assert_eq!(outcome.batches, 2);
        assert_eq!(outcome.stats.added, 4);
        assert!(outcome.item.is_none());
        assert_eq!(provider.remaining_batches("item-1"), 1);
        assert!(!provider.calls().contains(&"item:item-1".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn transport_error_ends_the_session() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_batch_error("item-1", StoreError::Unavailable("connection reset".into()));

        let outcome = orchestrator(&provider)
            .sync_item(&ItemId::new("item-1"), &mut Vec::<Transaction>::new())
            .await;
        assert!(!outcome.completed);
        assert!(outcome.error.unwrap().contains("connection reset"));
    }

    #[tokio::test(start_paused = true)]
    async fn endless_provider_hits_the_batch_ceiling() {
        let provider = Arc::new(ScriptedProvider::new());
        for _ in 0..20 {
            provider.push_batch("item-1", BatchResponse::page(SyncStats::new(1, 0, 0), true));
        }
        let outcome = orchestrator(&provider)
            .sync_item(&ItemId::new("item-1"), &mut Vec::<Transaction>::new())
            .await;
        assert!(!outcome.completed);
        assert_eq!(outcome.stats.added, 10);
        assert_eq!(provider.remaining_batches("item-1"), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn items_sync_in_order_and_failures_do_not_stop_the_run() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_batch("a", BatchResponse::page(SyncStats::new(1, 0, 0), false));
        provider.push_batch("b", BatchResponse::failure("boom"));
        provider.push_batch("c", BatchResponse::page(SyncStats::new(2, 0, 0), false));

        let ids = vec![ItemId::new("a"), ItemId::new("b"), ItemId::new("c")];
        let outcomes = orchestrator(&provider)
            .sync_items(&ids, &mut Vec::<Transaction>::new())
            .await;

        let completed: Vec<bool> = outcomes.iter().map(|o| o.completed).collect();
        assert_eq!(completed, vec![true, false, true]);
        assert_eq!(
            provider.calls(),
            vec!["batch:a", "item:a", "batch:b", "batch:c", "item:c"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn sync_all_follows_listed_order() {
        let provider = Arc::new(ScriptedProvider::new().with_item("x").with_item("y"));
        provider.push_batch("x", BatchResponse::page(SyncStats::new(1, 0, 0), false));
        provider.push_batch("y", BatchResponse::page(SyncStats::new(1, 0, 0), false));

        let outcomes = orchestrator(&provider).sync_all(&mut Vec::<Transaction>::new()).await.unwrap();
        let ids: Vec<&str> = outcomes.iter().map(|o| o.item_id.as_str()).collect();
        assert_eq!(ids, vec!["x", "y"]);
        assert_eq!(provider.calls()[0], "items");
    }

    #[tokio::test(start_paused = true)]
    async fn added_transactions_land_in_the_workspace() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_batch(
            "item-1",
            BatchResponse::page(SyncStats::new(2, 0, 0), true).with_transactions(vec![tx("t1"), tx("t2")]),
        );
        provider.push_batch(
            "item-1",
            BatchResponse::page(SyncStats::new(1, 0, 0), false).with_transactions(vec![tx("t3")]),
        );

        let mut workspace = Workspace::new(vec![Tab::new(TabId::new("all"), "All")], Vec::new());
        let outcome = orchestrator(&provider)
            .sync_item(&ItemId::new("item-1"), &mut workspace)
            .await;

        assert!(outcome.completed);
        assert_eq!(workspace.transactions().len(), 3);
        assert_eq!(workspace.view(&TabId::new("all")).unwrap().transactions.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_item_exchanges_then_syncs() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.set_exchange_response(ExchangeResponse {
            item_id: Some(ItemId::new("new-item")),
            error: None,
        });
        provider.push_batch("new-item", BatchResponse::page(SyncStats::new(7, 0, 0), false));

        let outcome = orchestrator(&provider)
            .connect_item("public-1", serde_json::json!({}), None, &mut Vec::<Transaction>::new())
            .await
            .unwrap();
        assert!(outcome.completed);
        assert_eq!(outcome.item_id, ItemId::new("new-item"));
        assert_eq!(provider.calls()[0], "exchange:public-1");
    }

    #[tokio::test(start_paused = true)]
    async fn next_sync_comes_from_the_item_record() {
        let mut record = ItemRecord::new(ItemId::new("item-1"));
        record.details.insert(
            "nextSync".to_string(),
            serde_json::json!("2024-03-02T06:00:00Z"),
        );
        let provider = Arc::new(ScriptedProvider::new().with_record(record));
        provider.push_batch("item-1", BatchResponse::page(SyncStats::new(1, 0, 0), false));

        let outcome = orchestrator(&provider)
            .sync_item(&ItemId::new("item-1"), &mut Vec::<Transaction>::new())
            .await;

        let expected: DateTime<Utc> = "2024-03-02T06:00:00Z".parse().unwrap();
        assert!(outcome.completed);
        assert_eq!(outcome.next_sync, Some(expected));
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["nextSync"], "2024-03-02T06:00:00Z");
    }

    #[test]
    fn outcome_serializes_without_empty_fields() {
        let mut session = SyncSession::new(ItemId::new("item-1"));
        session.begin();
        session.fail("boom");
        let value = serde_json::to_value(SyncOutcome::from_session(session, None)).unwrap();
        assert_eq!(value["completed"], false);
        assert_eq!(value["error"], "boom");
        assert!(value.get("item").is_none());
    }
}
