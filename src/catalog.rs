//! # Product Upsert Engine
//!
//! Writes mapped supplier products into the local catalog.
//!
//! Lookups are exact: first by live SKU, then by the former SKU a deprecated
//! product keeps in `backup_sku`. A hit on the former SKU restores that
//! product instead of creating a duplicate. Every write overwrites the local
//! state with the mapped input, so repeating an upsert is harmless.

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter,
    Set, sea_query::Expr,
};
use serde_json::{Value as JsonValue, json};
use uuid::Uuid;

use crate::error::{SyncError, map_db_err};
use crate::mapper::{MappedProduct, MappedVariant, MappingError};
use crate::models::product::{self, STOCK_OUT, stock_status_for};
use crate::models::product_variation;
use crate::repositories::{OptionRepository, ProductRepository};

/// Running count of deprecations, kept for operators.
pub const DEPRECATED_COUNT_KEY: &str = "catalog:deprecated_count";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub product_id: Uuid,
    pub created: bool,
    /// The product was found by its former SKU and brought back
    pub restored: bool,
}

/// Who or what asked for a deprecation.
pub mod actor {
    pub const IMPORT: &str = "import";
    pub const SYNC: &str = "sync";
    pub const OPERATOR: &str = "operator";
}

/// Stateless writer over any connection or transaction.
pub struct UpsertEngine;

fn clamp_stock(quantity: i64) -> i32 {
    quantity.clamp(0, i64::from(i32::MAX)) as i32
}

fn string_list(values: &[String]) -> Option<JsonValue> {
    (!values.is_empty()).then(|| json!(values))
}

impl UpsertEngine {
    /// Dispatch on the mapped topology.
    pub async fn upsert<C: ConnectionTrait>(
        conn: &C,
        mapped: &MappedProduct,
    ) -> Result<UpsertOutcome, SyncError> {
        if mapped.is_variable() {
            Self::upsert_variable(conn, mapped).await
        } else {
            Self::upsert_simple(conn, mapped).await
        }
    }

    pub async fn upsert_simple<C: ConnectionTrait>(
        conn: &C,
        mapped: &MappedProduct,
    ) -> Result<UpsertOutcome, SyncError> {
        if mapped.is_variable() {
            return Err(topology_mismatch(mapped));
        }

        let now = Utc::now();
        let outcome = Self::write_product(conn, mapped, now).await?;

        // A product that used to be variable loses its variations.
        let removed = product_variation::Entity::delete_many()
            .filter(product_variation::Column::ProductId.eq(outcome.product_id))
            .exec(conn)
            .await
            .map_err(|e| map_db_err("Failed to remove variations of simple product", e))?;
        if removed.rows_affected > 0 {
            tracing::info!(
                sku = %mapped.sku,
                removed = removed.rows_affected,
                "Product became simple; variations removed"
            );
        }

        Ok(outcome)
    }

    pub async fn upsert_variable<C: ConnectionTrait>(
        conn: &C,
        mapped: &MappedProduct,
    ) -> Result<UpsertOutcome, SyncError> {
        if !mapped.is_variable() {
            return Err(topology_mismatch(mapped));
        }

        let now = Utc::now();
        let outcome = Self::write_product(conn, mapped, now).await?;

        // Nothing stays purchasable unless the current payload lists it.
        Self::variations_out_of_stock(conn, outcome.product_id, now).await?;

        let existing = ProductRepository::variations(conn, outcome.product_id).await?;
        for variant in &mapped.variants {
            let current = existing
                .iter()
                .find(|row| row.variant_key == variant.variant_key);
            Self::write_variation(conn, outcome.product_id, current, variant, now).await?;
        }

        Ok(outcome)
    }

    /// Take a product the supplier no longer returns off sale and free its SKU.
    ///
    /// The SKU moves to `backup_sku` so a later upsert restores this row.
    /// Returns false when the product was already deprecated.
    pub async fn deprecate<C: ConnectionTrait>(
        conn: &C,
        product_id: Uuid,
        reason: &str,
        actor: &str,
    ) -> Result<bool, SyncError> {
        Self::retire(conn, product_id, reason, actor, true).await
    }

    /// Force a product out of stock with a deprecation marker, keeping its SKU.
    pub async fn set_out_of_stock<C: ConnectionTrait>(
        conn: &C,
        product_id: Uuid,
        reason: &str,
        actor: &str,
    ) -> Result<bool, SyncError> {
        Self::retire(conn, product_id, reason, actor, false).await
    }

    /// Bring a deprecated product back under `sku`.
    pub async fn restore<C: ConnectionTrait>(
        conn: &C,
        product_id: Uuid,
        sku: &str,
    ) -> Result<product::Model, SyncError> {
        let existing = ProductRepository::get(conn, product_id).await?;
        let now = Utc::now().fixed_offset();

        let mut active: product::ActiveModel = existing.into();
        active.sku = Set(Some(sku.to_string()));
        active.backup_sku = Set(None);
        active.deprecated = Set(false);
        active.deprecated_reason = Set(None);
        active.deprecated_by = Set(None);
        active.deprecated_at = Set(None);
        active.updated_at = Set(now);

        let model = active
            .update(conn)
            .await
            .map_err(|e| map_db_err("Failed to restore product", e))?;

        tracing::info!(product_id = %product_id, sku, "Deprecated product restored");
        Ok(model)
    }

    pub async fn set_thumbnail<C: ConnectionTrait>(
        conn: &C,
        product_id: Uuid,
        path: &str,
    ) -> Result<(), SyncError> {
        product::Entity::update_many()
            .col_expr(product::Column::ThumbnailPath, Expr::value(path))
            .filter(product::Column::Id.eq(product_id))
            .exec(conn)
            .await
            .map_err(|e| map_db_err("Failed to record product thumbnail", e))?;
        Ok(())
    }

    pub async fn deprecated_count<C: ConnectionTrait>(conn: &C) -> Result<i64, SyncError> {
        Ok(OptionRepository::get(conn, DEPRECATED_COUNT_KEY)
            .await?
            .and_then(|value| value.as_i64())
            .unwrap_or(0))
    }

    async fn locate<C: ConnectionTrait>(
        conn: &C,
        sku: &str,
    ) -> Result<Option<(product::Model, bool)>, SyncError> {
        if let Some(found) = ProductRepository::find_by_sku(conn, sku).await? {
            return Ok(Some((found, false)));
        }
        Ok(ProductRepository::find_by_backup_sku(conn, sku)
            .await?
            .map(|found| (found, true)))
    }

    async fn write_product<C: ConnectionTrait>(
        conn: &C,
        mapped: &MappedProduct,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome, SyncError> {
        let located = Self::locate(conn, &mapped.sku).await?;

        let outcome = match located {
            Some((existing, restored)) => {
                let product_id = existing.id;
                let image_changed = existing.image_url != mapped.image_url;

                let mut active: product::ActiveModel = existing.into();
                apply_mapped(&mut active, mapped, now);
                if image_changed {
                    active.thumbnail_path = Set(None);
                }

                active
                    .update(conn)
                    .await
                    .map_err(|e| map_db_err("Failed to update product", e))?;

                if restored {
                    tracing::info!(product_id = %product_id, sku = %mapped.sku, "Deprecated product restored by upsert");
                    metrics::counter!("catalog_sync_products_restored_total").increment(1);
                }

                UpsertOutcome {
                    product_id,
                    created: false,
                    restored,
                }
            }
            None => {
                let product_id = Uuid::new_v4();
                let mut active = product::ActiveModel {
                    id: Set(product_id),
                    thumbnail_path: Set(None),
                    created_at: Set(now.fixed_offset()),
                    ..Default::default()
                };
                apply_mapped(&mut active, mapped, now);

                active
                    .insert(conn)
                    .await
                    .map_err(|e| map_db_err("Failed to insert product", e))?;

                metrics::counter!("catalog_sync_products_created_total").increment(1);
                UpsertOutcome {
                    product_id,
                    created: true,
                    restored: false,
                }
            }
        };

        tracing::debug!(
            product_id = %outcome.product_id,
            sku = %mapped.sku,
            kind = mapped.kind,
            created = outcome.created,
            "Product upserted"
        );
        Ok(outcome)
    }

    async fn write_variation<C: ConnectionTrait>(
        conn: &C,
        product_id: Uuid,
        current: Option<&product_variation::Model>,
        variant: &MappedVariant,
        now: DateTime<Utc>,
    ) -> Result<(), SyncError> {
        let stock = clamp_stock(variant.stock_quantity);
        let attributes = (!variant.attributes.is_empty()).then(|| json!(variant.attributes));

        let mut active: product_variation::ActiveModel = match current {
            Some(row) => row.clone().into(),
            None => product_variation::ActiveModel {
                id: Set(Uuid::new_v4()),
                product_id: Set(product_id),
                variant_key: Set(variant.variant_key.clone()),
                created_at: Set(now.fixed_offset()),
                ..Default::default()
            },
        };

        active.attributes = Set(attributes);
        active.regular_price = Set(variant.price.regular);
        active.sale_price = Set(variant.price.sale);
        active.price = Set(variant.price.active);
        active.price_for_resell = Set(variant.price_for_resell);
        active.stock_quantity = Set(stock);
        active.stock_status = Set(stock_status_for(stock).to_string());
        active.updated_at = Set(now.fixed_offset());

        match current {
            Some(_) => active
                .update(conn)
                .await
                .map(|_| ())
                .map_err(|e| map_db_err("Failed to update variation", e)),
            None => active
                .insert(conn)
                .await
                .map(|_| ())
                .map_err(|e| map_db_err("Failed to insert variation", e)),
        }
    }

    async fn variations_out_of_stock<C: ConnectionTrait>(
        conn: &C,
        product_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, SyncError> {
        let result = product_variation::Entity::update_many()
            .col_expr(product_variation::Column::StockQuantity, Expr::value(0))
            .col_expr(product_variation::Column::StockStatus, Expr::value(STOCK_OUT))
            .col_expr(
                product_variation::Column::UpdatedAt,
                Expr::value(now.fixed_offset()),
            )
            .filter(product_variation::Column::ProductId.eq(product_id))
            .exec(conn)
            .await
            .map_err(|e| map_db_err("Failed to mark variations out of stock", e))?;
        Ok(result.rows_affected)
    }

    async fn retire<C: ConnectionTrait>(
        conn: &C,
        product_id: Uuid,
        reason: &str,
        actor: &str,
        release_sku: bool,
    ) -> Result<bool, SyncError> {
        let existing = ProductRepository::get(conn, product_id).await?;
        if existing.deprecated && (!release_sku || existing.sku.is_none()) {
            return Ok(false);
        }

        let now = Utc::now();
        let sku = existing.sku.clone();
        let newly_deprecated = !existing.deprecated;

        let mut active: product::ActiveModel = existing.into();
        active.stock_quantity = Set(0);
        active.stock_status = Set(STOCK_OUT.to_string());
        active.deprecated = Set(true);
        active.deprecated_reason = Set(Some(reason.to_string()));
        active.deprecated_by = Set(Some(actor.to_string()));
        active.deprecated_at = Set(Some(now.fixed_offset()));
        active.updated_at = Set(now.fixed_offset());
        if release_sku && let Some(sku) = sku.clone() {
            active.backup_sku = Set(Some(sku));
            active.sku = Set(None);
        }

        active
            .update(conn)
            .await
            .map_err(|e| map_db_err("Failed to deprecate product", e))?;
        Self::variations_out_of_stock(conn, product_id, now).await?;

        if newly_deprecated {
            let total = OptionRepository::increment(conn, DEPRECATED_COUNT_KEY, 1).await?;
            metrics::counter!("catalog_sync_products_deprecated_total").increment(1);
            tracing::info!(
                product_id = %product_id,
                sku = sku.as_deref().unwrap_or_default(),
                reason,
                actor,
                deprecated_total = total,
                "Product deprecated"
            );
        }

        Ok(true)
    }
}

fn topology_mismatch(mapped: &MappedProduct) -> SyncError {
    SyncError::Mapping(MappingError::InvalidField {
        field: "kind".to_string(),
        reason: format!("unexpected {} product {}", mapped.kind, mapped.sku),
    })
}

/// Overwrite every supplier-owned column from the mapped input.
fn apply_mapped(active: &mut product::ActiveModel, mapped: &MappedProduct, now: DateTime<Utc>) {
    let stock = clamp_stock(mapped.stock_quantity);
    let now = now.fixed_offset();

    active.sku = Set(Some(mapped.sku.clone()));
    active.backup_sku = Set(None);
    active.kind = Set(mapped.kind.to_string());
    active.name = Set(mapped.name.clone());
    active.description = Set(mapped.description.clone());
    active.regular_price = Set(mapped.price.regular);
    active.sale_price = Set(mapped.price.sale);
    active.price = Set(mapped.price.active);
    active.stock_quantity = Set(stock);
    active.stock_status = Set(stock_status_for(stock).to_string());
    active.categories = Set(string_list(&mapped.categories));
    active.category_path = Set(string_list(&mapped.category_path));
    active.image_url = Set(mapped.image_url.clone());
    active.gallery = Set(string_list(&mapped.gallery));
    active.attributes = Set((!mapped.attributes.is_empty()).then(|| json!(mapped.attributes)));
    active.shipments = Set((!mapped.shipments.is_empty()).then(|| json!(mapped.shipments)));
    active.shipments_reference = Set(mapped
        .shipments_reference
        .as_ref()
        .map(|reference| json!(reference)));
    active.price_snapshot = Set(Some(mapped.price_snapshot()));
    active.deprecated = Set(false);
    active.deprecated_reason = Set(None);
    active.deprecated_by = Set(None);
    active.deprecated_at = Set(None);
    active.last_synced_at = Set(Some(now));
    active.sync_attempted_at = Set(Some(now));
    active.updated_at = Set(now);
}
