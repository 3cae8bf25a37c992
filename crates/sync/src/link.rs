//! Connecting a new account, or repairing an existing connection.

use tabsync_core::ItemId;
use tabsync_storage::{ExchangeRequest, StoreError, SyncProvider};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("Public token is empty")]
    EmptyToken,
    #[error("Token exchange rejected: {0}")]
    Rejected(String),
    #[error("Token exchange returned no item id")]
    MissingItemId,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Requests a link token. With `item_id` the token opens the provider's
/// update mode for that item.
pub async fn create_link_token<P: SyncProvider + ?Sized>(
    provider: &P,
    item_id: Option<&ItemId>,
) -> Result<String, LinkError> {
    let token = provider.create_link_token(item_id).await?;
    tracing::info!(item = ?item_id, "Created link token");
    Ok(token.link_token)
}

/// Exchanges the public token returned by the link widget for an item id.
pub async fn exchange_public_token<P: SyncProvider + ?Sized>(
    provider: &P,
    public_token: &str,
    metadata: serde_json::Value,
    item_id: Option<ItemId>,
) -> Result<ItemId, LinkError> {
    if public_token.trim().is_empty() {
        return Err(LinkError::EmptyToken);
    }
    let request = ExchangeRequest {
        public_token: public_token.to_string(),
        metadata,
        item_id,
    };
    let response = provider.exchange_public_token(&request).await?;
    if let Some(error) = response.error {
        tracing::warn!(%error, "Public token exchange rejected");
        return Err(LinkError::Rejected(error));
    }
    let item_id = response.item_id.ok_or(LinkError::MissingItemId)?;
    tracing::info!(item = %item_id, "Exchanged public token");
    Ok(item_id)
}
