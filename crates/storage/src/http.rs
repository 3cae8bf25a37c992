use async_trait::async_trait;
use reqwest::{Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tabsync_core::{ItemId, Rule, RuleId, RulePatch};

use crate::api::{RuleStore, StoreError, SyncProvider};
use crate::retry::{Replay, RetryPolicy};
use crate::types::{
    BatchResponse, ExchangeRequest, ExchangeResponse, ItemRecord, LinkToken, OnboardingStatus,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Root of the backend API, e.g. `http://localhost:5000/api/`.
    pub base_url: String,
    /// Bearer token forwarded on every request.
    pub token: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000/api/".to_string(),
            token: None,
            timeout_secs: 30,
        }
    }
}

/// HTTP implementation of [`RuleStore`] and [`SyncProvider`].
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base: Url,
    token: Option<String>,
    retry: RetryPolicy,
}

impl ApiClient {
    pub fn new(config: &ApiConfig, retry: RetryPolicy) -> Result<Self, StoreError> {
        let mut base = config.base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base = Url::parse(&base)
            .map_err(|e| StoreError::Config(format!("invalid base_url '{base}': {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base,
            token: config.token.clone(),
            retry,
        })
    }

    fn url(&self, path: &str) -> Result<Url, StoreError> {
        self.base
            .join(path.trim_start_matches('/'))
            .map_err(|e| StoreError::Config(format!("invalid path '{path}': {e}")))
    }

    async fn send_once(
        &self,
        method: Method,
        url: &Url,
        body: Option<&serde_json::Value>,
    ) -> Result<reqwest::Response, StoreError> {
        let mut request = self.http.request(method, url.clone());
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                StoreError::Timeout(url.path().to_string())
            } else {
                StoreError::Transport(e)
            }
        })?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::NOT_FOUND => StoreError::NotFound(url.path().to_string()),
            StatusCode::BAD_REQUEST | StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
                StoreError::Rejected(text)
            }
            _ => StoreError::Http {
                status: status.as_u16(),
                body: text,
            },
        })
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        replay: Replay,
        body: Option<serde_json::Value>,
    ) -> Result<reqwest::Response, StoreError> {
        let url = self.url(path)?;
        tracing::debug!(%method, %url, ?replay, "Sending request");
        self.retry
            .run(path, replay, || {
                self.send_once(method.clone(), &url, body.as_ref())
            })
            .await
    }

    async fn json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        replay: Replay,
        body: Option<serde_json::Value>,
    ) -> Result<T, StoreError> {
        let response = self.send(method, path, replay, body).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))
    }
}

fn to_body<T: Serialize>(value: &T) -> Result<serde_json::Value, StoreError> {
    serde_json::to_value(value).map_err(|e| StoreError::Decode(e.to_string()))
}

/// Decodes stored rules one at a time. A record this client cannot read is
/// skipped with a warning instead of hiding every other rule.
fn decode_rules(records: Vec<serde_json::Value>) -> Vec<Rule> {
    records
        .into_iter()
        .filter_map(|record| {
            let id = record
                .get("_id")
                .or_else(|| record.get("id"))
                .and_then(serde_json::Value::as_str)
                .unwrap_or("<no id>")
                .to_string();
            match serde_json::from_value::<Rule>(record) {
                Ok(rule) => Some(rule),
                Err(e) => {
                    tracing::warn!(rule = %id, error = %e, "Skipping unreadable rule");
                    None
                }
            }
        })
        .collect()
}

#[async_trait]
impl RuleStore for ApiClient {
    async fn list_rules(&self) -> Result<Vec<Rule>, StoreError> {
        let records: Vec<serde_json::Value> =
            self.json(Method::GET, "rules", Replay::Idempotent, None).await?;
        Ok(decode_rules(records))
    }

    async fn create_rule(&self, rule: &Rule) -> Result<Rule, StoreError> {
        self.json(Method::POST, "rules", Replay::Once, Some(to_body(rule)?))
            .await
    }

    async fn update_rule(&self, id: &RuleId, patch: &RulePatch) -> Result<Rule, StoreError> {
        self.json(
            Method::PUT,
            &format!("rules/{id}"),
            Replay::Idempotent,
            Some(to_body(patch)?),
        )
        .await
    }

    async fn delete_rule(&self, id: &RuleId) -> Result<(), StoreError> {
        self.send(Method::DELETE, &format!("rules/{id}"), Replay::Idempotent, None)
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl SyncProvider for ApiClient {
    async fn list_items(&self) -> Result<Vec<ItemRecord>, StoreError> {
        self.json(Method::GET, "plaid/items", Replay::Idempotent, None)
            .await
    }

    async fn next_batch(&self, item_id: &ItemId) -> Result<BatchResponse, StoreError> {
        self.json(
            Method::GET,
            &format!("plaid/sync/latest/transactions/{item_id}"),
            Replay::Once,
            None,
        )
        .await
    }

    async fn get_item(&self, item_id: &ItemId) -> Result<ItemRecord, StoreError> {
        self.json(
            Method::GET,
            &format!("plaid/items/{item_id}"),
            Replay::Idempotent,
            None,
        )
        .await
    }

    async fn onboarding_status(&self, item_id: &ItemId) -> Result<OnboardingStatus, StoreError> {
        self.json(
            Method::GET,
            &format!("plaid/onboarding/status/{item_id}"),
            Replay::Idempotent,
            None,
        )
        .await
    }

    async fn create_link_token(&self, item_id: Option<&ItemId>) -> Result<LinkToken, StoreError> {
        let path = match item_id {
            Some(id) => format!("plaid/connect/link/{id}"),
            None => "plaid/connect/link".to_string(),
        };
        self.json(Method::POST, &path, Replay::Once, None).await
    }

    async fn exchange_public_token(
        &self,
        request: &ExchangeRequest,
    ) -> Result<ExchangeResponse, StoreError> {
        self.json(
            Method::POST,
            "plaid/exchange/token",
            Replay::Once,
            Some(to_body(request)?),
        )
        .await
    }
}
