//! Per-SKU failure quarantine.
//!
//! Each failed upsert bumps a durable attempt counter. Once it reaches the
//! threshold the SKU is skipped until an operator clears it or a later
//! success deletes the record.

use chrono::{DateTime, Utc};
use sea_orm::ConnectionTrait;
use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::repositories::OptionRepository;

const PREFIX: &str = "quarantine:";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuarantineRecord {
    pub attempts: u32,
    pub last_attempt: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct FailureQuarantine {
    max_attempts: u32,
}

fn key(sku: &str) -> String {
    format!("{PREFIX}{sku}")
}

impl FailureQuarantine {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub async fn get<C: ConnectionTrait>(
        &self,
        conn: &C,
        sku: &str,
    ) -> Result<Option<QuarantineRecord>, SyncError> {
        let Some(value) = OptionRepository::get(conn, &key(sku)).await? else {
            return Ok(None);
        };

        match serde_json::from_value(value) {
            Ok(record) => Ok(Some(record)),
            Err(err) => {
                tracing::warn!(sku, error = %err, "Unreadable quarantine record ignored");
                Ok(None)
            }
        }
    }

    pub async fn is_quarantined<C: ConnectionTrait>(
        &self,
        conn: &C,
        sku: &str,
    ) -> Result<bool, SyncError> {
        Ok(self
            .get(conn, sku)
            .await?
            .is_some_and(|record| record.attempts >= self.max_attempts))
    }

    /// Count one more failure; returns the updated record.
    pub async fn record_failure<C: ConnectionTrait>(
        &self,
        conn: &C,
        sku: &str,
        error: &str,
    ) -> Result<QuarantineRecord, SyncError> {
        let attempts = self
            .get(conn, sku)
            .await?
            .map_or(0, |record| record.attempts)
            + 1;

        let record = QuarantineRecord {
            attempts,
            last_attempt: Utc::now(),
            last_error: Some(error.to_string()),
        };
        OptionRepository::set(conn, &key(sku), serde_json::to_value(&record)?, None).await?;

        if attempts == self.max_attempts {
            tracing::warn!(sku, attempts, "SKU quarantined after repeated failures");
            metrics::counter!("catalog_sync_quarantined_total").increment(1);
        }
        Ok(record)
    }

    /// Forget the SKU's failures.
    pub async fn clear<C: ConnectionTrait>(&self, conn: &C, sku: &str) -> Result<bool, SyncError> {
        OptionRepository::delete(conn, &key(sku)).await
    }

    pub async fn clear_all<C: ConnectionTrait>(&self, conn: &C) -> Result<u64, SyncError> {
        OptionRepository::delete_prefix(conn, PREFIX).await
    }

    /// Every tracked SKU with its record, in SKU order.
    pub async fn list<C: ConnectionTrait>(
        &self,
        conn: &C,
    ) -> Result<Vec<(String, QuarantineRecord)>, SyncError> {
        let rows = OptionRepository::list_prefix(conn, PREFIX).await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let sku = row.key.strip_prefix(PREFIX)?.to_string();
                let record = serde_json::from_value(row.value).ok()?;
                Some((sku, record))
            })
            .collect())
    }
}
