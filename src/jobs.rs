//! Operator job controls: pause, resume, cancel and progress views.
//!
//! Orchestrators re-read the job status between items, so a control issued
//! here takes effect at the next item boundary of a running tick.

use chrono::Utc;
use sea_orm::ConnectionTrait;
use uuid::Uuid;

use crate::error::SyncError;
use crate::models::job::{JobProgress, JobStatus, Model as Job};
use crate::repositories::JobRepository;

/// `in_progress` → `paused`.
pub async fn pause_job<C: ConnectionTrait>(conn: &C, job_id: Uuid) -> Result<Job, SyncError> {
    transition(conn, job_id, JobStatus::InProgress, JobStatus::Paused).await
}

/// `paused` → `in_progress`.
pub async fn resume_job<C: ConnectionTrait>(conn: &C, job_id: Uuid) -> Result<Job, SyncError> {
    transition(conn, job_id, JobStatus::Paused, JobStatus::InProgress).await
}

/// Any non-terminal status → `cancelled`.
pub async fn cancel_job<C: ConnectionTrait>(conn: &C, job_id: Uuid) -> Result<Job, SyncError> {
    let job = JobRepository::get(conn, job_id).await?;
    if job.is_terminal() {
        return Err(SyncError::InvalidTransition {
            job_id,
            from: job.status,
            to: JobStatus::Cancelled.as_str().to_string(),
        });
    }

    let job = JobRepository::complete(
        conn,
        job_id,
        JobStatus::Cancelled,
        Some("cancelled by operator".to_string()),
    )
    .await?;
    metrics::counter!("catalog_sync_jobs_cancelled_total").increment(1);
    Ok(job)
}

pub async fn job_progress<C: ConnectionTrait>(
    conn: &C,
    job_id: Uuid,
) -> Result<JobProgress, SyncError> {
    Ok(JobRepository::get(conn, job_id).await?.progress(Utc::now()))
}

pub async fn recent_jobs<C: ConnectionTrait>(
    conn: &C,
    source: Option<&str>,
    limit: u64,
) -> Result<Vec<JobProgress>, SyncError> {
    let now = Utc::now();
    Ok(JobRepository::list_recent(conn, source, limit)
        .await?
        .iter()
        .map(|job| job.progress(now))
        .collect())
}

async fn transition<C: ConnectionTrait>(
    conn: &C,
    job_id: Uuid,
    from: JobStatus,
    to: JobStatus,
) -> Result<Job, SyncError> {
    let job = JobRepository::get(conn, job_id).await?;
    if job.job_status() != Some(from) {
        return Err(SyncError::InvalidTransition {
            job_id,
            from: job.status,
            to: to.as_str().to_string(),
        });
    }

    let job = JobRepository::update_status(conn, job_id, to).await?;
    tracing::info!(job_id = %job_id, from = %from, to = %to, "Job control applied");
    Ok(job)
}
