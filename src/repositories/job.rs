//! # Job Repository
//!
//! Durable record of import and sync runs. Every method takes the connection
//! to run on, so orchestrators can write job state inside the same
//! transaction as the work it describes.
//!
//! Counters are absolute values supplied by the single writer that owns the
//! job. Terminal jobs are immutable; attempts to change them fail with
//! [`SyncError::InvalidTransition`].

use chrono::{DateTime, Duration, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use uuid::Uuid;

use crate::error::{SyncError, map_db_err};
use crate::models::job::{ActiveModel, Checkpoint, Column, Entity, JobCounters, JobStatus, Model};
use crate::telemetry::current_run_id;

/// Repository for job rows
pub struct JobRepository;

fn to_db_time(value: DateTime<Utc>) -> sea_orm::prelude::DateTimeWithTimeZone {
    value.fixed_offset()
}

impl JobRepository {
    /// Create an `in_progress` job for a run that starts now.
    pub async fn create<C: ConnectionTrait>(
        conn: &C,
        source: &str,
        total_estimate: i64,
    ) -> Result<Model, SyncError> {
        Self::insert(conn, source, total_estimate, JobStatus::InProgress).await
    }

    async fn insert<C: ConnectionTrait>(
        conn: &C,
        source: &str,
        total_estimate: i64,
        status: JobStatus,
    ) -> Result<Model, SyncError> {
        let now = to_db_time(Utc::now());

        let job = ActiveModel {
            id: Set(Uuid::new_v4()),
            status: Set(status.as_str().to_string()),
            source: Set(source.to_string()),
            total_products: Set(total_estimate.max(0)),
            processed_products: Set(0),
            created_products: Set(0),
            existing_products: Set(0),
            failed_products: Set(0),
            start_time: Set(now),
            end_time: Set(None),
            last_heartbeat: Set(now),
            error_log: Set(None),
            retry_count: Set(0),
            checkpoint: Set(None),
            updated_at: Set(now),
        };

        let model = job
            .insert(conn)
            .await
            .map_err(|e| map_db_err("Failed to create job", e))?;

        tracing::info!(
            job_id = %model.id,
            source,
            status = %status,
            run_id = ?current_run_id(),
            "Job created"
        );
        Ok(model)
    }

    pub async fn find<C: ConnectionTrait>(conn: &C, job_id: Uuid) -> Result<Option<Model>, SyncError> {
        Entity::find_by_id(job_id)
            .one(conn)
            .await
            .map_err(|e| map_db_err("Failed to load job", e))
    }

    pub async fn get<C: ConnectionTrait>(conn: &C, job_id: Uuid) -> Result<Model, SyncError> {
        Self::find(conn, job_id)
            .await?
            .ok_or(SyncError::JobNotFound(job_id))
    }

    /// Load a job that is still allowed to change.
    async fn get_mutable<C: ConnectionTrait>(
        conn: &C,
        job_id: Uuid,
        attempted: &str,
    ) -> Result<Model, SyncError> {
        let job = Self::get(conn, job_id).await?;
        if job.is_terminal() {
            return Err(SyncError::InvalidTransition {
                job_id,
                from: job.status,
                to: attempted.to_string(),
            });
        }
        Ok(job)
    }

    /// Write absolute counter values and refresh the heartbeat.
    pub async fn update_progress<C: ConnectionTrait>(
        conn: &C,
        job_id: Uuid,
        counters: JobCounters,
    ) -> Result<Model, SyncError> {
        let job = Self::get_mutable(conn, job_id, "progress").await?;
        let now = to_db_time(Utc::now());

        let mut active: ActiveModel = job.into();
        active.processed_products = Set(counters.processed);
        active.created_products = Set(counters.created);
        active.existing_products = Set(counters.existing);
        active.failed_products = Set(counters.failed);
        active.last_heartbeat = Set(now);
        active.updated_at = Set(now);

        active
            .update(conn)
            .await
            .map_err(|e| map_db_err("Failed to update job progress", e))
    }

    pub async fn set_total<C: ConnectionTrait>(
        conn: &C,
        job_id: Uuid,
        total: i64,
    ) -> Result<Model, SyncError> {
        let job = Self::get_mutable(conn, job_id, "total").await?;
        let now = to_db_time(Utc::now());

        let mut active: ActiveModel = job.into();
        active.total_products = Set(total.max(0));
        active.updated_at = Set(now);

        active
            .update(conn)
            .await
            .map_err(|e| map_db_err("Failed to update job total", e))
    }

    /// Move a non-terminal job to another non-terminal status.
    pub async fn update_status<C: ConnectionTrait>(
        conn: &C,
        job_id: Uuid,
        status: JobStatus,
    ) -> Result<Model, SyncError> {
        if status.is_terminal() {
            return Self::complete(conn, job_id, status, None).await;
        }

        let job = Self::get_mutable(conn, job_id, status.as_str()).await?;
        let now = to_db_time(Utc::now());

        let mut active: ActiveModel = job.into();
        active.status = Set(status.as_str().to_string());
        active.last_heartbeat = Set(now);
        active.updated_at = Set(now);

        let model = active
            .update(conn)
            .await
            .map_err(|e| map_db_err("Failed to update job status", e))?;

        tracing::info!(job_id = %job_id, status = %status, "Job status updated");
        Ok(model)
    }

    /// Finish a job exactly once with a terminal status.
    pub async fn complete<C: ConnectionTrait>(
        conn: &C,
        job_id: Uuid,
        status: JobStatus,
        error_log: Option<String>,
    ) -> Result<Model, SyncError> {
        let job = Self::get_mutable(conn, job_id, status.as_str()).await?;
        if !status.is_terminal() {
            return Err(SyncError::InvalidTransition {
                job_id,
                from: job.status,
                to: status.as_str().to_string(),
            });
        }

        let now = to_db_time(Utc::now());
        let mut active: ActiveModel = job.into();
        active.status = Set(status.as_str().to_string());
        active.end_time = Set(Some(now));
        active.updated_at = Set(now);
        if error_log.is_some() {
            active.error_log = Set(error_log);
        }

        let model = active
            .update(conn)
            .await
            .map_err(|e| map_db_err("Failed to complete job", e))?;

        tracing::info!(
            job_id = %job_id,
            status = %status,
            processed = model.processed_products,
            created = model.created_products,
            existing = model.existing_products,
            failed = model.failed_products,
            "Job finished"
        );
        Ok(model)
    }

    pub async fn heartbeat<C: ConnectionTrait>(conn: &C, job_id: Uuid) -> Result<(), SyncError> {
        let job = Self::get_mutable(conn, job_id, "heartbeat").await?;
        let now = to_db_time(Utc::now());

        let mut active: ActiveModel = job.into();
        active.last_heartbeat = Set(now);
        active.updated_at = Set(now);

        active
            .update(conn)
            .await
            .map_err(|e| map_db_err("Failed to refresh job heartbeat", e))?;
        Ok(())
    }

    /// Persist the resumption point and refresh the heartbeat.
    pub async fn save_checkpoint<C: ConnectionTrait>(
        conn: &C,
        job_id: Uuid,
        checkpoint: Option<&Checkpoint>,
    ) -> Result<(), SyncError> {
        let job = Self::get_mutable(conn, job_id, "checkpoint").await?;
        let now = to_db_time(Utc::now());
        let value = checkpoint.map(serde_json::to_value).transpose()?;

        let mut active: ActiveModel = job.into();
        active.checkpoint = Set(value);
        active.last_heartbeat = Set(now);
        active.updated_at = Set(now);

        active
            .update(conn)
            .await
            .map_err(|e| map_db_err("Failed to save job checkpoint", e))?;
        Ok(())
    }

    /// Bump the retry counter after a failed phase; returns the new count.
    pub async fn increment_retry<C: ConnectionTrait>(
        conn: &C,
        job_id: Uuid,
        error: &str,
    ) -> Result<i32, SyncError> {
        let job = Self::get_mutable(conn, job_id, "retry").await?;
        let retry_count = job.retry_count + 1;
        let now = to_db_time(Utc::now());

        let mut active: ActiveModel = job.into();
        active.retry_count = Set(retry_count);
        active.error_log = Set(Some(error.to_string()));
        active.updated_at = Set(now);

        active
            .update(conn)
            .await
            .map_err(|e| map_db_err("Failed to increment job retry count", e))?;
        Ok(retry_count)
    }

    pub async fn reset_counters<C: ConnectionTrait>(
        conn: &C,
        job_id: Uuid,
    ) -> Result<Model, SyncError> {
        Self::update_progress(conn, job_id, JobCounters::default()).await
    }

    /// `in_progress` jobs whose heartbeat is older than the threshold.
    pub async fn list_stale<C: ConnectionTrait>(
        conn: &C,
        older_than_seconds: u64,
    ) -> Result<Vec<Model>, SyncError> {
        let cutoff = Utc::now() - Duration::seconds(older_than_seconds as i64);

        Entity::find()
            .filter(Column::Status.eq(JobStatus::InProgress.as_str()))
            .filter(Column::LastHeartbeat.lt(to_db_time(cutoff)))
            .order_by_asc(Column::LastHeartbeat)
            .all(conn)
            .await
            .map_err(|e| map_db_err("Failed to list stale jobs", e))
    }

    /// `in_progress` or `paused` jobs for a source, oldest first.
    pub async fn list_active<C: ConnectionTrait>(
        conn: &C,
        source: &str,
    ) -> Result<Vec<Model>, SyncError> {
        Self::list_by_status(
            conn,
            source,
            &[JobStatus::InProgress, JobStatus::Paused],
        )
        .await
    }

    /// Jobs of a source in any of the given statuses, oldest first.
    pub async fn list_by_status<C: ConnectionTrait>(
        conn: &C,
        source: &str,
        statuses: &[JobStatus],
    ) -> Result<Vec<Model>, SyncError> {
        Entity::find()
            .filter(Column::Source.eq(source))
            .filter(Column::Status.is_in(statuses.iter().map(JobStatus::as_str)))
            .order_by_asc(Column::StartTime)
            .all(conn)
            .await
            .map_err(|e| map_db_err("Failed to list jobs by status", e))
    }

    pub async fn list_recent<C: ConnectionTrait>(
        conn: &C,
        source: Option<&str>,
        limit: u64,
    ) -> Result<Vec<Model>, SyncError> {
        let mut query = Entity::find().order_by_desc(Column::StartTime);
        if let Some(source) = source {
            query = query.filter(Column::Source.eq(source));
        }

        query
            .limit(limit)
            .all(conn)
            .await
            .map_err(|e| map_db_err("Failed to list recent jobs", e))
    }

    /// Explicit deletion is the only way a terminal job goes away.
    pub async fn delete<C: ConnectionTrait>(conn: &C, job_id: Uuid) -> Result<bool, SyncError> {
        let result = Entity::delete_by_id(job_id)
            .exec(conn)
            .await
            .map_err(|e| map_db_err("Failed to delete job", e))?;
        Ok(result.rows_affected > 0)
    }
}
