//! Advisory single-flight locks backed by the options table.
//!
//! A lock is a row that expires on its own, so a crashed holder never wedges
//! a pipeline for longer than the TTL.

use chrono::{Duration, Utc};
use sea_orm::ConnectionTrait;
use serde_json::json;

use crate::error::SyncError;
use crate::repositories::OptionRepository;

pub const IMPORT_LOCK: &str = "lock:import";
pub const INCREMENTAL_SYNC_LOCK: &str = "lock:sync_incremental";
pub const FORCE_SYNC_LOCK: &str = "lock:sync_force";

/// Lock service owned by one process.
#[derive(Debug, Clone)]
pub struct LockService {
    owner: String,
}

impl LockService {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
        }
    }

    /// Take `key` for `ttl` unless someone holds it. Never waits.
    pub async fn try_acquire<C: ConnectionTrait>(
        &self,
        conn: &C,
        key: &str,
        ttl: Duration,
    ) -> Result<bool, SyncError> {
        if OptionRepository::delete_expired(conn, key).await? {
            tracing::warn!(lock = key, "Expired lock reclaimed");
        }

        let acquired = OptionRepository::insert_new(
            conn,
            key,
            json!({
                "owner": self.owner,
                "acquired_at": Utc::now(),
            }),
            Some(ttl),
        )
        .await?;

        if acquired {
            tracing::debug!(lock = key, owner = %self.owner, "Lock acquired");
        } else {
            tracing::debug!(lock = key, "Lock held elsewhere");
        }
        Ok(acquired)
    }

    pub async fn release<C: ConnectionTrait>(&self, conn: &C, key: &str) -> Result<bool, SyncError> {
        let released = OptionRepository::delete(conn, key).await?;
        if released {
            tracing::debug!(lock = key, "Lock released");
        }
        Ok(released)
    }

    /// Extend a held lock; false if it already expired or was cleared.
    pub async fn refresh<C: ConnectionTrait>(
        &self,
        conn: &C,
        key: &str,
        ttl: Duration,
    ) -> Result<bool, SyncError> {
        OptionRepository::touch(conn, key, ttl).await
    }

    pub async fn is_held<C: ConnectionTrait>(&self, conn: &C, key: &str) -> Result<bool, SyncError> {
        Ok(OptionRepository::get_row(conn, key).await?.is_some())
    }
}
