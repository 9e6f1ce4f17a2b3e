//! Durable operator notices.
//!
//! One notice per kind; posting again replaces the message and bumps the
//! occurrence count.

use chrono::{DateTime, Utc};
use sea_orm::ConnectionTrait;
use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::repositories::OptionRepository;

const PREFIX: &str = "notice:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    AuthFailure,
    StuckProcess,
    DeprecatedProducts,
    FetchAborted,
}

impl NoticeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoticeKind::AuthFailure => "auth_failure",
            NoticeKind::StuckProcess => "stuck_process",
            NoticeKind::DeprecatedProducts => "deprecated_products",
            NoticeKind::FetchAborted => "fetch_aborted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
    pub occurrences: u32,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Notice board over the options table.
#[derive(Debug, Clone, Copy, Default)]
pub struct Notices;

impl Notices {
    pub async fn post<C: ConnectionTrait>(
        &self,
        conn: &C,
        kind: NoticeKind,
        message: impl Into<String>,
    ) -> Result<Notice, SyncError> {
        let key = format!("{PREFIX}{}", kind.as_str());
        let now = Utc::now();
        let previous: Option<Notice> = OptionRepository::get(conn, &key)
            .await?
            .and_then(|value| serde_json::from_value(value).ok());

        let notice = Notice {
            kind,
            message: message.into(),
            occurrences: previous.as_ref().map_or(0, |n| n.occurrences) + 1,
            first_seen: previous.map_or(now, |n| n.first_seen),
            last_seen: now,
        };

        OptionRepository::set(conn, &key, serde_json::to_value(&notice)?, None).await?;
        tracing::warn!(notice = kind.as_str(), message = %notice.message, "Operator notice posted");
        Ok(notice)
    }

    pub async fn list<C: ConnectionTrait>(&self, conn: &C) -> Result<Vec<Notice>, SyncError> {
        let rows = OptionRepository::list_prefix(conn, PREFIX).await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| serde_json::from_value(row.value).ok())
            .collect())
    }

    pub async fn dismiss<C: ConnectionTrait>(
        &self,
        conn: &C,
        kind: NoticeKind,
    ) -> Result<bool, SyncError> {
        OptionRepository::delete(conn, &format!("{PREFIX}{}", kind.as_str())).await
    }
}
