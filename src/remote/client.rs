//! reqwest implementation of [`CatalogApi`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::Value as JsonValue;
use tracing::debug;
use url::Url;

use super::retry::{RetryPolicy, Sleeper, TokioSleeper, with_retry};
use super::{CatalogApi, RemoteError, RemotePage};
use crate::config::RemoteApiConfig;

/// Header carrying the origin tag of this installation.
pub const ORIGIN_HEADER: &str = "x-origin";

const MAX_ERROR_BODY: usize = 512;

/// Supplier API client.
pub struct RemoteCatalogClient {
    http: Client,
    base_url: String,
    api_token: Option<String>,
    origin: String,
    fetch_policy: RetryPolicy,
    bulk_policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl RemoteCatalogClient {
    pub fn new(config: &RemoteApiConfig) -> Result<Self, RemoteError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .user_agent(concat!("catalog-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RemoteError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_token: config
                .api_token
                .clone()
                .filter(|token| !token.trim().is_empty()),
            origin: config.origin.clone(),
            fetch_policy: config.fetch_retry.policy(),
            bulk_policy: config.bulk_retry.policy(),
            sleeper: Arc::new(TokioSleeper),
        })
    }

    /// Replace the sleeper used between retries.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_policies(mut self, fetch: RetryPolicy, bulk: RetryPolicy) -> Self {
        self.fetch_policy = fetch;
        self.bulk_policy = bulk;
        self
    }

    fn endpoint(&self, path: &str) -> Result<Url, RemoteError> {
        Url::parse(&format!("{}/{}", self.base_url, path.trim_start_matches('/')))
            .map_err(|e| RemoteError::Transport(format!("invalid endpoint {path}: {e}")))
    }

    fn token(&self) -> Result<&str, RemoteError> {
        self.api_token.as_deref().ok_or(RemoteError::MissingToken)
    }

    fn authorized(&self, request: RequestBuilder, token: &str) -> RequestBuilder {
        request
            .bearer_auth(token)
            .header(ORIGIN_HEADER, &self.origin)
    }

    /// Send one request and classify its outcome.
    async fn send_json(
        &self,
        request: RequestBuilder,
        resource: &str,
    ) -> Result<JsonValue, RemoteError> {
        let response = request
            .send()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;

        let status = response.status();
        debug!(resource, status = status.as_u16(), "Supplier API responded");

        if status.is_success() {
            return response
                .json::<JsonValue>()
                .await
                .map_err(|e| RemoteError::Decode(e.to_string()));
        }

        let body = response.text().await.ok().map(truncate_body);
        Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::Forbidden { body },
            StatusCode::NOT_FOUND => RemoteError::NotFound {
                resource: resource.to_string(),
            },
            other => RemoteError::Status {
                status: other.as_u16(),
                body,
            },
        })
    }

    async fn post_once(
        &self,
        path: &str,
        payload: &JsonValue,
    ) -> Result<JsonValue, RemoteError> {
        let token = self.token()?;
        let url = self.endpoint(path)?;
        let request = self.authorized(self.http.post(url), token).json(payload);
        self.send_json(request, path).await
    }
}

fn truncate_body(body: String) -> String {
    if body.len() <= MAX_ERROR_BODY {
        return body;
    }
    let mut end = MAX_ERROR_BODY;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    body[..end].to_string()
}

fn format_since(since: DateTime<Utc>) -> String {
    since.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[async_trait]
impl CatalogApi for RemoteCatalogClient {
    async fn fetch_page(
        &self,
        resource: &str,
        page: u32,
        limit: u32,
        since: Option<DateTime<Utc>>,
    ) -> Result<RemotePage, RemoteError> {
        let token = self.token()?;
        let url = self.endpoint(resource)?;

        let mut query = vec![("page", page.to_string()), ("limit", limit.to_string())];
        if let Some(since) = since {
            query.push(("since", format_since(since)));
        }

        let body = with_retry(&self.bulk_policy, self.sleeper.as_ref(), "fetch_page", |_| {
            let request = self
                .authorized(self.http.get(url.clone()), token)
                .query(&query);
            self.send_json(request, resource)
        })
        .await?;

        let mut remote_page: RemotePage =
            serde_json::from_value(body).map_err(|e| RemoteError::Decode(e.to_string()))?;
        remote_page.page = page;
        remote_page.limit = limit;

        metrics::counter!("catalog_sync_remote_pages_fetched_total").increment(1);
        Ok(remote_page)
    }

    async fn fetch_one(&self, sku: &str) -> Result<JsonValue, RemoteError> {
        let token = self.token()?;
        let mut url = self.endpoint("products")?;
        url.path_segments_mut()
            .map_err(|_| RemoteError::Transport(format!("invalid endpoint for sku {sku}")))?
            .push(sku);

        with_retry(&self.fetch_policy, self.sleeper.as_ref(), "fetch_one", |_| {
            let request = self.authorized(self.http.get(url.clone()), token);
            self.send_json(request, sku)
        })
        .await
    }

    // Order calls are not idempotent on the supplier side, so they get a single attempt.
    async fn submit_order(&self, payload: &JsonValue) -> Result<JsonValue, RemoteError> {
        self.post_once("orders", payload).await
    }

    async fn prepare_order(&self, payload: &JsonValue) -> Result<JsonValue, RemoteError> {
        self.post_once("orders/prepare", payload).await
    }

    async fn notify_sync_complete(&self) -> Result<(), RemoteError> {
        let payload = serde_json::json!({
            "status": "synced",
            "syncedAt": format_since(Utc::now()),
        });
        self.post_once("status", &payload).await.map(|_| ())
    }

    async fn download_image(&self, url: &str) -> Result<Vec<u8>, RemoteError> {
        let parsed = Url::parse(url).map_err(|e| RemoteError::Decode(e.to_string()))?;
        let response = self
            .http
            .get(parsed)
            .send()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;

        match response.status() {
            status if status.is_success() => response
                .bytes()
                .await
                .map(|bytes| bytes.to_vec())
                .map_err(|e| RemoteError::Transport(e.to_string())),
            StatusCode::NOT_FOUND => Err(RemoteError::NotFound {
                resource: url.to_string(),
            }),
            status => Err(RemoteError::Status {
                status: status.as_u16(),
                body: None,
            }),
        }
    }
}
