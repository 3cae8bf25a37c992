use anyhow::Context;
use serde_json::{json, Value};
use std::sync::Arc;
use tabsync_core::{ItemId, Rule, TabId, Transaction};
use tabsync_rules::RuleSetResolver;
use tabsync_storage::{ApiClient, RuleStore};
use tabsync_sync::{
    create_link_token, PollError, PollOutcome, SyncOrchestrator, SyncStatusTracker,
};

use crate::config::AppConfig;

pub async fn sync(client: Arc<ApiClient>, config: &AppConfig, items: Vec<String>) -> anyhow::Result<Value> {
    let orchestrator = SyncOrchestrator::new(client, config.sync);
    let mut received: Vec<Transaction> = Vec::new();
    let outcomes = if items.is_empty() {
        orchestrator
            .sync_all(&mut received)
            .await
            .context("Failed to list linked items")?
    } else {
        let ids: Vec<ItemId> = items.into_iter().map(ItemId::new).collect();
        orchestrator.sync_items(&ids, &mut received).await
    };
    Ok(json!({
        "outcomes": outcomes,
        "receivedTransactions": received.len(),
    }))
}

/// Polls until the backend reports a terminal status. Ctrl-C stops watching
/// without touching the remote job.
pub async fn poll(client: Arc<ApiClient>, config: &AppConfig, item: String) -> anyhow::Result<Value> {
    let tracker = SyncStatusTracker::new(client, config.polling);
    let handle = tracker.start_polling(ItemId::new(item.clone()));
    let progress = handle.subscribe();

    let cancel = handle.cancel_token();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Stopping poll; the remote sync keeps running");
            cancel.cancel();
        }
    });
    let result = handle.wait().await;
    ctrl_c.abort();
    let last = progress.borrow().clone();

    match result {
        Ok(PollOutcome::Completed(final_progress)) => Ok(json!({
            "itemId": item,
            "status": "completed",
            "progress": final_progress,
            "polls": last.polls,
        })),
        Ok(PollOutcome::Failed(error)) => Ok(json!({
            "itemId": item,
            "status": "error",
            "error": error,
            "polls": last.polls,
        })),
        Ok(PollOutcome::Cancelled) => Ok(json!({
            "itemId": item,
            "status": "unknown",
            "progress": last,
        })),
        Err(e @ PollError::Timeout { .. }) => Err(anyhow::Error::new(e)
            .context(format!("Last known status: {:?}", last.status))),
        Err(e) => Err(e.into()),
    }
}

pub async fn link(client: Arc<ApiClient>, item: Option<String>) -> anyhow::Result<Value> {
    let item = item.map(ItemId::new);
    let token = create_link_token(client.as_ref(), item.as_ref()).await?;
    Ok(json!({ "linkToken": token }))
}

/// Exchanges a public token from the link widget and syncs the item it names.
pub async fn exchange(
    client: Arc<ApiClient>,
    config: &AppConfig,
    public_token: String,
    item: Option<String>,
) -> anyhow::Result<Value> {
    let orchestrator = SyncOrchestrator::new(client, config.sync);
    let mut received: Vec<Transaction> = Vec::new();
    let outcome = orchestrator
        .connect_item(&public_token, json!({}), item.map(ItemId::new), &mut received)
        .await?;
    Ok(json!({
        "outcome": outcome,
        "receivedTransactions": received.len(),
    }))
}

pub async fn rules(client: Arc<ApiClient>, tab: Option<String>) -> anyhow::Result<Value> {
    let all = client.list_rules().await.context("Failed to list rules")?;
    let resolver = RuleSetResolver::new(&all);
    let selected: Vec<&Rule> = match &tab {
        Some(tab) => resolver.resolve_for_tab(&TabId::new(tab.as_str())),
        None => all.iter().collect(),
    };
    Ok(serde_json::to_value(selected)?)
}
