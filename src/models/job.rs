//! Job entity model
//!
//! This module contains the SeaORM entity model for the jobs table, which
//! records one long-running import or sync run together with its counters,
//! heartbeat and resumption checkpoint.

use chrono::{DateTime, Utc};
use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Job entity representing one import or sync run
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "jobs")]
pub struct Model {
    /// Opaque job identifier (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Lifecycle status (pending, in_progress, paused, completed, failed, cancelled)
    pub status: String,

    /// Free-text origin tag, e.g. `anar_api` or `sync_force`
    pub source: String,

    /// Number of products the run expects to touch, once known
    pub total_products: i64,

    pub processed_products: i64,
    pub created_products: i64,
    pub existing_products: i64,
    pub failed_products: i64,

    pub start_time: DateTimeWithTimeZone,
    pub end_time: Option<DateTimeWithTimeZone>,

    /// Refreshed on every progress update while the job is active
    pub last_heartbeat: DateTimeWithTimeZone,

    pub error_log: Option<String>,
    pub retry_count: i32,

    /// Serialized [`Checkpoint`] describing where the next tick resumes
    #[sea_orm(column_type = "JsonBinary")]
    pub checkpoint: Option<JsonValue>,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

/// Job lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::InProgress => "in_progress",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(JobStatus::Pending),
            "in_progress" => Some(JobStatus::InProgress),
            "paused" => Some(JobStatus::Paused),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }

    /// Terminal jobs are never mutated again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phase of a resumable run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Fetching,
    Processing,
    Syncing,
}

/// Persisted resumption point of a job.
///
/// For imports `page` is the next page to fetch (fetching phase) or the page
/// currently being processed, and `item_index` is the first item of that page
/// not yet applied. Sync runs additionally carry their window bounds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub phase: Phase,
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub item_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cutoff: Option<DateTime<Utc>>,
}

impl Checkpoint {
    pub fn fetching(page: u32) -> Self {
        Self {
            phase: Phase::Fetching,
            page,
            ..Default::default()
        }
    }

    pub fn processing(page: u32, item_index: usize) -> Self {
        Self {
            phase: Phase::Processing,
            page,
            item_index,
            ..Default::default()
        }
    }
}

/// Absolute counter values written by [`update_progress`](crate::repositories::job::JobRepository::update_progress).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobCounters {
    pub processed: i64,
    pub created: i64,
    pub existing: i64,
    pub failed: i64,
}

impl JobCounters {
    pub fn record(&mut self, outcome: ItemOutcome) {
        self.processed += 1;
        match outcome {
            ItemOutcome::Created => self.created += 1,
            ItemOutcome::Existing => self.existing += 1,
            ItemOutcome::Failed => self.failed += 1,
        }
    }
}

/// How a single remote record ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    Created,
    Existing,
    Failed,
}

/// Operator-facing progress view of a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobProgress {
    pub job_id: Uuid,
    pub status: String,
    pub source: String,
    pub total: i64,
    pub processed: i64,
    pub created: i64,
    pub existing: i64,
    pub failed: i64,
    pub percent: f64,
    pub estimated_remaining_seconds: Option<i64>,
}

impl Model {
    pub fn job_status(&self) -> Option<JobStatus> {
        JobStatus::parse(&self.status)
    }

    pub fn is_terminal(&self) -> bool {
        self.job_status().is_some_and(|status| status.is_terminal())
    }

    pub fn counters(&self) -> JobCounters {
        JobCounters {
            processed: self.processed_products,
            created: self.created_products,
            existing: self.existing_products,
            failed: self.failed_products,
        }
    }

    /// Decode the stored checkpoint; an unreadable payload yields `None`.
    pub fn checkpoint(&self) -> Option<Checkpoint> {
        self.checkpoint
            .as_ref()
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    /// Progress summary with a linear remaining-time estimate.
    pub fn progress(&self, now: DateTime<Utc>) -> JobProgress {
        let percent = if self.total_products > 0 {
            (self.processed_products as f64 / self.total_products as f64 * 100.0).min(100.0)
        } else {
            0.0
        };

        let elapsed = (now - self.start_time.with_timezone(&Utc)).num_seconds();
        let remaining = self.total_products - self.processed_products;
        let estimated_remaining_seconds = if self.processed_products > 0 && remaining > 0 {
            Some(elapsed.max(0) * remaining / self.processed_products)
        } else if remaining <= 0 && self.total_products > 0 {
            Some(0)
        } else {
            None
        };

        JobProgress {
            job_id: self.id,
            status: self.status.clone(),
            source: self.source.clone(),
            total: self.total_products,
            processed: self.processed_products,
            created: self.created_products,
            existing: self.existing_products,
            failed: self.failed_products,
            percent,
            estimated_remaining_seconds,
        }
    }
}
