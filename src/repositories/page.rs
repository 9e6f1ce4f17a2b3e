//! # Page Repository
//!
//! Staging rows that decouple fetching every remote page from applying them.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, sea_query::Expr,
};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::{SyncError, map_db_err};
use crate::models::page::{ActiveModel, Column, Entity, Model};

/// Repository for staged pages
pub struct PageRepository;

impl PageRepository {
    /// Insert a page, or replace the payload of an already-staged `(key, page)`.
    pub async fn stage<C: ConnectionTrait>(
        conn: &C,
        key: &str,
        page: u32,
        payload: JsonValue,
    ) -> Result<Model, SyncError> {
        let page_number = page as i32;
        let now = Utc::now().fixed_offset();

        let existing = Entity::find()
            .filter(Column::Key.eq(key))
            .filter(Column::Page.eq(page_number))
            .one(conn)
            .await
            .map_err(|e| map_db_err("Failed to look up staged page", e))?;

        let model = match existing {
            Some(existing) => {
                let mut active: ActiveModel = existing.into();
                active.response = Set(payload);
                active.processed = Set(false);
                active.created_at = Set(now);
                active
                    .update(conn)
                    .await
                    .map_err(|e| map_db_err("Failed to replace staged page", e))?
            }
            None => ActiveModel {
                id: Set(Uuid::new_v4()),
                key: Set(key.to_string()),
                response: Set(payload),
                processed: Set(false),
                page: Set(page_number),
                created_at: Set(now),
            }
            .insert(conn)
            .await
            .map_err(|e| map_db_err("Failed to stage page", e))?,
        };

        tracing::debug!(key, page, page_id = %model.id, "Page staged");
        Ok(model)
    }

    /// Lowest-numbered page of `key` not yet processed.
    pub async fn next_unprocessed<C: ConnectionTrait>(
        conn: &C,
        key: &str,
    ) -> Result<Option<Model>, SyncError> {
        Entity::find()
            .filter(Column::Key.eq(key))
            .filter(Column::Processed.eq(false))
            .order_by_asc(Column::Page)
            .one(conn)
            .await
            .map_err(|e| map_db_err("Failed to load next unprocessed page", e))
    }

    /// Flip `processed` to true; a second call is a no-op.
    pub async fn mark_processed<C: ConnectionTrait>(conn: &C, page_id: Uuid) -> Result<(), SyncError> {
        Entity::update_many()
            .col_expr(Column::Processed, Expr::value(true))
            .filter(Column::Id.eq(page_id))
            .filter(Column::Processed.eq(false))
            .exec(conn)
            .await
            .map_err(|e| map_db_err("Failed to mark page processed", e))?;
        Ok(())
    }

    /// Drop every staged page of `key`; returns the number removed.
    pub async fn clear_all<C: ConnectionTrait>(conn: &C, key: &str) -> Result<u64, SyncError> {
        let result = Entity::delete_many()
            .filter(Column::Key.eq(key))
            .exec(conn)
            .await
            .map_err(|e| map_db_err("Failed to clear staged pages", e))?;
        Ok(result.rows_affected)
    }

    pub async fn list<C: ConnectionTrait>(conn: &C, key: &str) -> Result<Vec<Model>, SyncError> {
        Entity::find()
            .filter(Column::Key.eq(key))
            .order_by_asc(Column::Page)
            .all(conn)
            .await
            .map_err(|e| map_db_err("Failed to list staged pages", e))
    }

    pub async fn count_unprocessed<C: ConnectionTrait>(conn: &C, key: &str) -> Result<u64, SyncError> {
        Entity::find()
            .filter(Column::Key.eq(key))
            .filter(Column::Processed.eq(false))
            .count(conn)
            .await
            .map_err(|e| map_db_err("Failed to count unprocessed pages", e))
    }
}
