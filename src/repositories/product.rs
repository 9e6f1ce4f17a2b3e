//! # Product Repository
//!
//! Narrow read access to the local catalog used by the upsert engine and the
//! sync orchestrator. Writes go through [`crate::catalog`].

use chrono::{DateTime, Utc};
use sea_orm::{
    ColumnTrait, ConnectionTrait, EntityTrait, Order, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, sea_query::{Expr, NullOrdering},
};
use uuid::Uuid;

use crate::error::{SyncError, map_db_err};
use crate::models::product::{Column, Entity, Model};
use crate::models::product_variation::{
    Column as VariationColumn, Entity as Variation, Model as VariationModel,
};

/// Repository for local products
pub struct ProductRepository;

impl ProductRepository {
    pub async fn find<C: ConnectionTrait>(conn: &C, id: Uuid) -> Result<Option<Model>, SyncError> {
        Entity::find_by_id(id)
            .one(conn)
            .await
            .map_err(|e| map_db_err("Failed to load product", e))
    }

    pub async fn get<C: ConnectionTrait>(conn: &C, id: Uuid) -> Result<Model, SyncError> {
        Self::find(conn, id)
            .await?
            .ok_or(SyncError::ProductNotFound(id))
    }

    /// Exact match on the external SKU key.
    pub async fn find_by_sku<C: ConnectionTrait>(
        conn: &C,
        sku: &str,
    ) -> Result<Option<Model>, SyncError> {
        Entity::find()
            .filter(Column::Sku.eq(sku))
            .one(conn)
            .await
            .map_err(|e| map_db_err("Failed to look up product by sku", e))
    }

    /// Exact match on the former SKU of a deprecated product.
    pub async fn find_by_backup_sku<C: ConnectionTrait>(
        conn: &C,
        sku: &str,
    ) -> Result<Option<Model>, SyncError> {
        Entity::find()
            .filter(Column::BackupSku.eq(sku))
            .order_by_desc(Column::UpdatedAt)
            .one(conn)
            .await
            .map_err(|e| map_db_err("Failed to look up product by backup sku", e))
    }

    pub async fn variations<C: ConnectionTrait>(
        conn: &C,
        product_id: Uuid,
    ) -> Result<Vec<VariationModel>, SyncError> {
        Variation::find()
            .filter(VariationColumn::ProductId.eq(product_id))
            .order_by_asc(VariationColumn::VariantKey)
            .all(conn)
            .await
            .map_err(|e| map_db_err("Failed to load product variations", e))
    }

    /// `(id, sku)` of every product that still carries a live SKU.
    pub async fn list_active_skus<C: ConnectionTrait>(
        conn: &C,
    ) -> Result<Vec<(Uuid, String)>, SyncError> {
        let rows: Vec<(Uuid, Option<String>)> = Entity::find()
            .select_only()
            .column(Column::Id)
            .column(Column::Sku)
            .filter(Column::Sku.is_not_null())
            .filter(Column::Deprecated.eq(false))
            .order_by_asc(Column::Sku)
            .into_tuple()
            .all(conn)
            .await
            .map_err(|e| map_db_err("Failed to list product skus", e))?;

        Ok(rows
            .into_iter()
            .filter_map(|(id, sku)| sku.map(|sku| (id, sku)))
            .collect())
    }

    /// Products never re-sync attempted, or last attempted before `cutoff`,
    /// oldest attempt first.
    pub async fn list_sync_candidates<C: ConnectionTrait>(
        conn: &C,
        cutoff: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<Model>, SyncError> {
        Entity::find()
            .filter(Column::Sku.is_not_null())
            .filter(
                Column::SyncAttemptedAt
                    .is_null()
                    .or(Column::SyncAttemptedAt.lt(cutoff.fixed_offset())),
            )
            .order_by_with_nulls(Column::SyncAttemptedAt, Order::Asc, NullOrdering::First)
            .order_by_asc(Column::Id)
            .limit(limit)
            .all(conn)
            .await
            .map_err(|e| map_db_err("Failed to list sync candidates", e))
    }

    pub async fn count_sync_candidates<C: ConnectionTrait>(
        conn: &C,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, SyncError> {
        Entity::find()
            .filter(Column::Sku.is_not_null())
            .filter(
                Column::SyncAttemptedAt
                    .is_null()
                    .or(Column::SyncAttemptedAt.lt(cutoff.fixed_offset())),
            )
            .count(conn)
            .await
            .map_err(|e| map_db_err("Failed to count sync candidates", e))
    }

    /// Record a re-sync attempt so the product leaves the candidate set.
    pub async fn mark_sync_attempted<C: ConnectionTrait>(
        conn: &C,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), SyncError> {
        Entity::update_many()
            .col_expr(Column::SyncAttemptedAt, Expr::value(at.fixed_offset()))
            .filter(Column::Id.eq(id))
            .exec(conn)
            .await
            .map_err(|e| map_db_err("Failed to record sync attempt", e))?;
        Ok(())
    }

    pub async fn count<C: ConnectionTrait>(conn: &C) -> Result<u64, SyncError> {
        Entity::find()
            .count(conn)
            .await
            .map_err(|e| map_db_err("Failed to count products", e))
    }
}
