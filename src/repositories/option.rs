//! # Option Repository
//!
//! Generic durable key-value store with optional expiry. Rows whose
//! `expires_at` has passed are treated as absent by every read.

use chrono::{DateTime, Duration, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
    sea_query::{Condition, OnConflict},
};
use serde_json::Value as JsonValue;

use crate::error::{SyncError, map_db_err};
use crate::models::option::{ActiveModel, Column, Entity, Model};

/// Repository for option rows
pub struct OptionRepository;

fn live(now: DateTime<Utc>) -> Condition {
    Condition::any()
        .add(Column::ExpiresAt.is_null())
        .add(Column::ExpiresAt.gt(now.fixed_offset()))
}

impl OptionRepository {
    pub async fn get<C: ConnectionTrait>(conn: &C, key: &str) -> Result<Option<JsonValue>, SyncError> {
        Ok(Self::get_row(conn, key).await?.map(|row| row.value))
    }

    /// The live row for `key`, if any.
    pub async fn get_row<C: ConnectionTrait>(conn: &C, key: &str) -> Result<Option<Model>, SyncError> {
        Entity::find_by_id(key.to_string())
            .filter(live(Utc::now()))
            .one(conn)
            .await
            .map_err(|e| map_db_err("Failed to read option", e))
    }

    /// Insert or overwrite `key`.
    pub async fn set<C: ConnectionTrait>(
        conn: &C,
        key: &str,
        value: JsonValue,
        ttl: Option<Duration>,
    ) -> Result<(), SyncError> {
        let now = Utc::now();
        let row = ActiveModel {
            key: Set(key.to_string()),
            value: Set(value),
            expires_at: Set(ttl.map(|ttl| (now + ttl).fixed_offset())),
            updated_at: Set(now.fixed_offset()),
        };

        Entity::insert(row)
            .on_conflict(
                OnConflict::column(Column::Key)
                    .update_columns([Column::Value, Column::ExpiresAt, Column::UpdatedAt])
                    .to_owned(),
            )
            .exec(conn)
            .await
            .map_err(|e| map_db_err("Failed to write option", e))?;
        Ok(())
    }

    /// Insert `key` only if no row exists. Returns false when it already does.
    pub async fn insert_new<C: ConnectionTrait>(
        conn: &C,
        key: &str,
        value: JsonValue,
        ttl: Option<Duration>,
    ) -> Result<bool, SyncError> {
        let now = Utc::now();
        let row = ActiveModel {
            key: Set(key.to_string()),
            value: Set(value),
            expires_at: Set(ttl.map(|ttl| (now + ttl).fixed_offset())),
            updated_at: Set(now.fixed_offset()),
        };

        match row.insert(conn).await {
            Ok(_) => Ok(true),
            Err(err) if crate::error::is_unique_violation(&err) => Ok(false),
            Err(err) => Err(map_db_err("Failed to insert option", err)),
        }
    }

    /// Push back the expiry of a live row; returns false if there is none.
    pub async fn touch<C: ConnectionTrait>(
        conn: &C,
        key: &str,
        ttl: Duration,
    ) -> Result<bool, SyncError> {
        let Some(row) = Self::get_row(conn, key).await? else {
            return Ok(false);
        };

        let now = Utc::now();
        let mut active: ActiveModel = row.into();
        active.expires_at = Set(Some((now + ttl).fixed_offset()));
        active.updated_at = Set(now.fixed_offset());
        active
            .update(conn)
            .await
            .map_err(|e| map_db_err("Failed to extend option", e))?;
        Ok(true)
    }

    pub async fn delete<C: ConnectionTrait>(conn: &C, key: &str) -> Result<bool, SyncError> {
        let result = Entity::delete_by_id(key.to_string())
            .exec(conn)
            .await
            .map_err(|e| map_db_err("Failed to delete option", e))?;
        Ok(result.rows_affected > 0)
    }

    /// Delete `key` only if it has expired.
    pub async fn delete_expired<C: ConnectionTrait>(conn: &C, key: &str) -> Result<bool, SyncError> {
        let result = Entity::delete_many()
            .filter(Column::Key.eq(key))
            .filter(Column::ExpiresAt.lte(Utc::now().fixed_offset()))
            .exec(conn)
            .await
            .map_err(|e| map_db_err("Failed to purge expired option", e))?;
        Ok(result.rows_affected > 0)
    }

    /// Live rows whose key starts with `prefix`, in key order.
    pub async fn list_prefix<C: ConnectionTrait>(
        conn: &C,
        prefix: &str,
    ) -> Result<Vec<Model>, SyncError> {
        Entity::find()
            .filter(Column::Key.starts_with(prefix))
            .filter(live(Utc::now()))
            .order_by_asc(Column::Key)
            .all(conn)
            .await
            .map_err(|e| map_db_err("Failed to list options", e))
    }

    /// Delete every row with `prefix`; returns the number removed.
    pub async fn delete_prefix<C: ConnectionTrait>(conn: &C, prefix: &str) -> Result<u64, SyncError> {
        let result = Entity::delete_many()
            .filter(Column::Key.starts_with(prefix))
            .exec(conn)
            .await
            .map_err(|e| map_db_err("Failed to delete options", e))?;
        Ok(result.rows_affected)
    }

    /// Add `delta` to an integer counter stored under `key`.
    pub async fn increment<C: ConnectionTrait>(
        conn: &C,
        key: &str,
        delta: i64,
    ) -> Result<i64, SyncError> {
        let current = Self::get(conn, key)
            .await?
            .and_then(|value| value.as_i64())
            .unwrap_or(0);
        let next = current + delta;
        Self::set(conn, key, JsonValue::from(next), None).await?;
        Ok(next)
    }
}
