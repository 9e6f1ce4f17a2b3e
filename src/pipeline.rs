//! Per-item apply step shared by the import and sync orchestrators.
//!
//! One remote record goes through quarantine check, mapping and upsert inside
//! a savepoint of the caller's transaction. Failures are counted and fed to
//! the quarantine; only database failures outside the savepoint escape.

use std::sync::Arc;

use sea_orm::{ConnectionTrait, TransactionTrait};
use serde_json::Value as JsonValue;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::catalog::UpsertEngine;
use crate::error::{SyncError, map_db_err};
use crate::mapper::{MapperOptions, map_value};
use crate::media::ThumbnailStore;
use crate::models::job::ItemOutcome;
use crate::quarantine::FailureQuarantine;
use crate::remote::CatalogApi;

/// Where an item came from, for log context.
#[derive(Debug, Clone, Copy)]
pub struct ItemContext {
    pub job_id: Uuid,
    pub page: Option<u32>,
}

#[derive(Clone)]
pub struct ItemApplier {
    api: Arc<dyn CatalogApi>,
    mapper: MapperOptions,
    quarantine: FailureQuarantine,
    thumbnails: ThumbnailStore,
}

impl ItemApplier {
    pub fn new(
        api: Arc<dyn CatalogApi>,
        mapper: MapperOptions,
        quarantine: FailureQuarantine,
        thumbnails: ThumbnailStore,
    ) -> Self {
        Self {
            api,
            mapper,
            quarantine,
            thumbnails,
        }
    }

    /// Apply one remote record. Item-level failures become
    /// [`ItemOutcome::Failed`]; a quarantined SKU is skipped without another
    /// attempt being recorded.
    pub async fn apply<C>(
        &self,
        conn: &C,
        item: &JsonValue,
        context: ItemContext,
    ) -> Result<ItemOutcome, SyncError>
    where
        C: ConnectionTrait + TransactionTrait,
    {
        let sku = sku_hint(item);

        if let Some(sku) = sku.as_deref()
            && self.quarantine.is_quarantined(conn, sku).await?
        {
            debug!(job_id = %context.job_id, sku, page = ?context.page, "SKU quarantined; skipped");
            metrics::counter!("catalog_sync_items_skipped_total").increment(1);
            return Ok(ItemOutcome::Failed);
        }

        let mapped = match map_value(item, &self.mapper) {
            Ok(mapped) => mapped,
            Err(err) => {
                warn!(
                    job_id = %context.job_id,
                    sku = ?sku,
                    page = ?context.page,
                    error = %err,
                    "Record could not be mapped"
                );
                if let Some(sku) = sku.as_deref() {
                    self.quarantine
                        .record_failure(conn, sku, &err.to_string())
                        .await?;
                }
                metrics::counter!("catalog_sync_items_failed_total").increment(1);
                return Ok(ItemOutcome::Failed);
            }
        };

        for warning in &mapped.warnings {
            debug!(job_id = %context.job_id, sku = %mapped.sku, warning = ?warning, "Mapping warning");
        }

        let savepoint = conn
            .begin()
            .await
            .map_err(|e| map_db_err("Failed to open item savepoint", e))?;

        match UpsertEngine::upsert(&savepoint, &mapped).await {
            Ok(outcome) => {
                savepoint
                    .commit()
                    .await
                    .map_err(|e| map_db_err("Failed to release item savepoint", e))?;
                self.quarantine.clear(conn, &mapped.sku).await?;
                self.store_thumbnail(conn, outcome.product_id, mapped.image_url.as_deref())
                    .await;
                metrics::counter!("catalog_sync_items_processed_total").increment(1);
                Ok(if outcome.created {
                    ItemOutcome::Created
                } else {
                    ItemOutcome::Existing
                })
            }
            Err(err) => {
                savepoint
                    .rollback()
                    .await
                    .map_err(|e| map_db_err("Failed to roll back item savepoint", e))?;
                let record = self
                    .quarantine
                    .record_failure(conn, &mapped.sku, &err.to_string())
                    .await?;
                warn!(
                    job_id = %context.job_id,
                    sku = %mapped.sku,
                    page = ?context.page,
                    attempts = record.attempts,
                    error = %err,
                    "Upsert failed"
                );
                metrics::counter!("catalog_sync_items_failed_total").increment(1);
                Ok(ItemOutcome::Failed)
            }
        }
    }

    /// Download the primary image; failures never fail the product.
    async fn store_thumbnail<C: ConnectionTrait>(
        &self,
        conn: &C,
        product_id: Uuid,
        image_url: Option<&str>,
    ) {
        let Some(url) = image_url else {
            return;
        };
        if !self.thumbnails.is_enabled() {
            return;
        }

        match self.thumbnails.ensure(self.api.as_ref(), url).await {
            Ok(Some(path)) => {
                if let Err(err) =
                    UpsertEngine::set_thumbnail(conn, product_id, &path.to_string_lossy()).await
                {
                    warn!(product_id = %product_id, error = %err, "Failed to record thumbnail");
                }
            }
            Ok(None) => {}
            Err(err) => {
                warn!(product_id = %product_id, url, error = %err, "Thumbnail download failed");
            }
        }
    }
}

/// SKU of a raw record, readable even when the record fails to map.
pub fn sku_hint(item: &JsonValue) -> Option<String> {
    match item.get("id")? {
        JsonValue::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sku_hint_reads_string_and_numeric_ids() {
        assert_eq!(sku_hint(&json!({"id": " A-1 "})), Some("A-1".to_string()));
        assert_eq!(sku_hint(&json!({"id": 17})), Some("17".to_string()));
        assert_eq!(sku_hint(&json!({"id": ""})), None);
        assert_eq!(sku_hint(&json!({"title": "x"})), None);
    }
}
