//! # Remote Catalog Client
//!
//! Outbound calls to the supplier API. [`CatalogApi`] is the seam the
//! orchestrators depend on; [`RemoteCatalogClient`] is the reqwest-backed
//! implementation.

pub mod client;
pub mod retry;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

pub use client::RemoteCatalogClient;
pub use retry::{BackoffKind, RecordingSleeper, RetryPolicy, Sleeper, TokioSleeper, with_retry};

use retry::Retryable;

/// Failures of a single remote call after its retry loop finished.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// No token configured; no request was sent
    #[error("no API token configured")]
    MissingToken,

    #[error("supplier rejected credentials")]
    Forbidden { body: Option<String> },

    #[error("resource {resource} not found")]
    NotFound { resource: String },

    #[error("unexpected status {status}")]
    Status { status: u16, body: Option<String> },

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl RemoteError {
    pub fn is_auth(&self) -> bool {
        matches!(self, RemoteError::MissingToken | RemoteError::Forbidden { .. })
    }
}

impl Retryable for RemoteError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            RemoteError::Status { .. } | RemoteError::Transport(_)
        )
    }
}

/// One page of a paginated listing: `{ total, items }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemotePage {
    #[serde(skip)]
    pub page: u32,
    #[serde(skip)]
    pub limit: u32,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub items: Vec<JsonValue>,
}

impl RemotePage {
    /// Whether another page should be requested after this one.
    pub fn has_more(&self) -> bool {
        !self.items.is_empty() && u64::from(self.page) * u64::from(self.limit) < self.total
    }

    /// Payload as staged in the page store.
    pub fn to_payload(&self) -> JsonValue {
        serde_json::json!({
            "total": self.total,
            "items": self.items,
        })
    }
}

/// Contract of the supplier API as seen by the orchestrators.
#[async_trait]
pub trait CatalogApi: Send + Sync {
    /// `GET {resource}?page=P&limit=L[&since=T]` under the bulk retry policy.
    async fn fetch_page(
        &self,
        resource: &str,
        page: u32,
        limit: u32,
        since: Option<DateTime<Utc>>,
    ) -> Result<RemotePage, RemoteError>;

    /// `GET products/{sku}`; a 404 is reported as [`RemoteError::NotFound`].
    async fn fetch_one(&self, sku: &str) -> Result<JsonValue, RemoteError>;

    async fn submit_order(&self, payload: &JsonValue) -> Result<JsonValue, RemoteError>;

    async fn prepare_order(&self, payload: &JsonValue) -> Result<JsonValue, RemoteError>;

    /// Tell the supplier a full import finished.
    async fn notify_sync_complete(&self) -> Result<(), RemoteError>;

    async fn download_image(&self, url: &str) -> Result<Vec<u8>, RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_stops_at_total_or_empty_page() {
        let mut page = RemotePage {
            page: 2,
            limit: 30,
            total: 75,
            items: vec![serde_json::json!({"id": "a"})],
        };
        assert!(page.has_more());

        page.page = 3;
        assert!(!page.has_more());

        page.page = 1;
        page.items.clear();
        assert!(!page.has_more());
    }

    #[test]
    fn only_transient_failures_are_retryable() {
        assert!(RemoteError::Transport("reset".into()).is_retryable());
        assert!(RemoteError::Status { status: 500, body: None }.is_retryable());
        assert!(!RemoteError::Forbidden { body: None }.is_retryable());
        assert!(!RemoteError::NotFound { resource: "x".into() }.is_retryable());
        assert!(!RemoteError::MissingToken.is_retryable());
        assert!(!RemoteError::Decode("bad".into()).is_retryable());
    }
}
