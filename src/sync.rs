//! # Sync Orchestrator
//!
//! Keeps already-imported products current without going through the page
//! store. Two flavours share the job and lock machinery of the import:
//!
//! - **Incremental**: walks the supplier listing filtered to records changed
//!   since the start of the window, one transaction per item.
//! - **Force / outdated**: re-fetches local products one by one, oldest sync
//!   attempt first. A product the supplier no longer knows is deprecated.
//!
//! Runs are time-sliced like imports: a tick stops when its budget is spent
//! and the job's [`Checkpoint`] tells the next tick where to continue.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use sea_orm::{DatabaseConnection, TransactionTrait};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::catalog::{UpsertEngine, actor};
use crate::config::SyncConfig;
use crate::error::{SyncError, map_db_err};
use crate::import::PRODUCTS_RESOURCE;
use crate::locks::{FORCE_SYNC_LOCK, IMPORT_LOCK, INCREMENTAL_SYNC_LOCK, LockService};
use crate::models::job::{Checkpoint, ItemOutcome, JobCounters, JobStatus, Model as Job, Phase};
use crate::notices::{NoticeKind, Notices};
use crate::pipeline::{ItemApplier, ItemContext};
use crate::remote::CatalogApi;
use crate::repositories::{JobRepository, ProductRepository};

pub const INCREMENTAL_SOURCE: &str = "sync_incremental";
pub const FORCE_SOURCE: &str = "sync_force";
pub const OUTDATED_SOURCE: &str = "sync_outdated";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Incremental,
    Force,
    Outdated,
}

impl SyncMode {
    pub fn source(&self) -> &'static str {
        match self {
            SyncMode::Incremental => INCREMENTAL_SOURCE,
            SyncMode::Force => FORCE_SOURCE,
            SyncMode::Outdated => OUTDATED_SOURCE,
        }
    }

    /// Force and outdated runs share one pipeline lock.
    pub fn lock(&self) -> &'static str {
        match self {
            SyncMode::Incremental => INCREMENTAL_SYNC_LOCK,
            SyncMode::Force | SyncMode::Outdated => FORCE_SYNC_LOCK,
        }
    }

    pub fn from_source(source: &str) -> Option<Self> {
        match source {
            INCREMENTAL_SOURCE => Some(SyncMode::Incremental),
            FORCE_SOURCE => Some(SyncMode::Force),
            OUTDATED_SOURCE => Some(SyncMode::Outdated),
            _ => None,
        }
    }
}

/// What one sync tick ended with.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncTickOutcome {
    /// Nothing to do for this mode
    Idle,
    /// The pipeline lock is held, or an import is running
    Locked,
    Paused { job_id: Uuid },
    Suspended { job_id: Uuid, checkpoint: Checkpoint },
    AuthAborted { job_id: Uuid },
    /// Listing fetch failed; the run resumes on the next tick
    FetchAborted { job_id: Uuid, error: String },
    Completed { job_id: Uuid, counters: JobCounters, deprecated: u64 },
    Failed { job_id: Uuid, error: String },
    Cancelled { job_id: Uuid },
}

pub struct SyncOrchestrator {
    db: DatabaseConnection,
    api: Arc<dyn CatalogApi>,
    config: SyncConfig,
    import_source: String,
    page_limit: u32,
    applier: ItemApplier,
    locks: LockService,
    notices: Notices,
    budget: Duration,
}

impl SyncOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: DatabaseConnection,
        api: Arc<dyn CatalogApi>,
        config: SyncConfig,
        import_source: impl Into<String>,
        page_limit: u32,
        applier: ItemApplier,
        locks: LockService,
        notices: Notices,
    ) -> Self {
        let budget = Duration::from_secs(config.execution_budget_seconds);
        Self {
            db,
            api,
            config,
            import_source: import_source.into(),
            page_limit: page_limit.max(1),
            applier,
            locks,
            notices,
            budget,
        }
    }

    fn lock_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.config.lock_ttl_seconds as i64)
    }

    pub async fn active_job(&self, mode: SyncMode) -> Result<Option<Job>, SyncError> {
        Ok(JobRepository::list_active(&self.db, mode.source())
            .await?
            .into_iter()
            .next())
    }

    /// Whether the scheduler should run `mode` now: a run is active, or the
    /// last one finished at least one interval ago. Force runs are only ever
    /// continued, never started on a timer.
    pub async fn is_due(&self, mode: SyncMode, now: DateTime<Utc>) -> Result<bool, SyncError> {
        if self.active_job(mode).await?.is_some() {
            return Ok(true);
        }

        let interval = match mode {
            SyncMode::Incremental => self.config.incremental_interval_seconds,
            SyncMode::Outdated => self.config.outdated_interval_seconds,
            SyncMode::Force => return Ok(false),
        };

        let last_finished = JobRepository::list_recent(&self.db, Some(mode.source()), 1)
            .await?
            .into_iter()
            .next()
            .and_then(|job| job.end_time);

        Ok(last_finished.is_none_or(|end| {
            now - end.with_timezone(&Utc) >= chrono::Duration::seconds(interval as i64)
        }))
    }

    /// Queue a force re-sync of every product not yet attempted since now.
    ///
    /// Returns `None` when a force run is already active.
    pub async fn start_force_sync(&self) -> Result<Option<Job>, SyncError> {
        if let Some(active) = self.active_job(SyncMode::Force).await? {
            info!(job_id = %active.id, status = %active.status, "Force sync already active; start ignored");
            return Ok(None);
        }

        let cutoff = Utc::now();
        let job = self.create_candidate_job(SyncMode::Force, cutoff).await?;
        info!(job_id = %job.id, total = job.total_products, "Force sync started");
        Ok(Some(job))
    }

    async fn create_candidate_job(
        &self,
        mode: SyncMode,
        cutoff: DateTime<Utc>,
    ) -> Result<Job, SyncError> {
        let total = ProductRepository::count_sync_candidates(&self.db, cutoff).await?;

        let txn = self
            .db
            .begin()
            .await
            .map_err(|e| map_db_err("Failed to start sync job transaction", e))?;
        let job = JobRepository::create(&txn, mode.source(), total as i64).await?;
        let checkpoint = Checkpoint {
            phase: Phase::Syncing,
            cutoff: Some(cutoff),
            ..Default::default()
        };
        JobRepository::save_checkpoint(&txn, job.id, Some(&checkpoint)).await?;
        txn.commit()
            .await
            .map_err(|e| map_db_err("Failed to commit sync job", e))?;

        JobRepository::get(&self.db, job.id).await
    }

    /// Run one bounded slice of the incremental sync, starting a new window
    /// when no run is active.
    pub async fn run_incremental_tick(&self) -> Result<SyncTickOutcome, SyncError> {
        let started = Instant::now();

        if !self
            .locks
            .try_acquire(&self.db, INCREMENTAL_SYNC_LOCK, self.lock_ttl())
            .await?
        {
            debug!("Incremental sync lock held; tick skipped");
            return Ok(SyncTickOutcome::Locked);
        }

        // Checked under our own lock so an import starting now sees it.
        match self.import_running().await {
            Ok(false) => {}
            Ok(true) => {
                debug!("Import in progress; incremental sync skipped");
                self.locks.release(&self.db, INCREMENTAL_SYNC_LOCK).await?;
                return Ok(SyncTickOutcome::Locked);
            }
            Err(err) => {
                self.locks.release(&self.db, INCREMENTAL_SYNC_LOCK).await?;
                return Err(err);
            }
        }

        let result = self.drive_incremental(started).await;
        self.finish_tick(SyncMode::Incremental, started).await;
        result
    }

    /// Continue the active force sync, if there is one.
    pub async fn run_force_sync_tick(&self) -> Result<SyncTickOutcome, SyncError> {
        self.run_candidate_tick(SyncMode::Force).await
    }

    /// Re-sync products not attempted within the outdated threshold, starting
    /// a run when none is active and candidates exist.
    pub async fn run_outdated_sync_tick(&self) -> Result<SyncTickOutcome, SyncError> {
        self.run_candidate_tick(SyncMode::Outdated).await
    }

    async fn run_candidate_tick(&self, mode: SyncMode) -> Result<SyncTickOutcome, SyncError> {
        let started = Instant::now();

        if !self
            .locks
            .try_acquire(&self.db, mode.lock(), self.lock_ttl())
            .await?
        {
            debug!(mode = ?mode, "Force sync lock held; tick skipped");
            return Ok(SyncTickOutcome::Locked);
        }

        let result = self.drive_candidates(mode, started).await;
        self.finish_tick(mode, started).await;
        result
    }

    async fn finish_tick(&self, mode: SyncMode, started: Instant) {
        if let Err(err) = self.locks.release(&self.db, mode.lock()).await {
            warn!(mode = ?mode, error = %err, "Failed to release sync lock");
        }
        metrics::histogram!("catalog_sync_sync_tick_duration_ms", "mode" => mode.source())
            .record(started.elapsed().as_secs_f64() * 1000.0);
    }

    /// An import holding its lock or sitting in progress owns the catalog.
    async fn import_running(&self) -> Result<bool, SyncError> {
        if self.locks.is_held(&self.db, IMPORT_LOCK).await? {
            return Ok(true);
        }
        Ok(!JobRepository::list_by_status(&self.db, &self.import_source, &[JobStatus::InProgress])
            .await?
            .is_empty())
    }

    /// Window start for a new incremental run. Reaches back to the previous
    /// run's start when that is earlier, so slow or missed runs leave no gap.
    async fn incremental_since(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, SyncError> {
        let window_start =
            now - chrono::Duration::seconds(self.config.incremental_window_seconds as i64);

        let previous = JobRepository::list_by_status(
            &self.db,
            INCREMENTAL_SOURCE,
            &[JobStatus::Completed],
        )
        .await?
        .into_iter()
        .last()
        .map(|job| job.start_time.with_timezone(&Utc));

        Ok(previous.map_or(window_start, |start| start.min(window_start)))
    }

    async fn drive_incremental(&self, started: Instant) -> Result<SyncTickOutcome, SyncError> {
        let job = match self.active_job(SyncMode::Incremental).await? {
            Some(job) => job,
            None => {
                let since = self.incremental_since(Utc::now()).await?;
                let job = JobRepository::create(&self.db, INCREMENTAL_SOURCE, 0).await?;
                let checkpoint = Checkpoint {
                    phase: Phase::Syncing,
                    page: 1,
                    since: Some(since),
                    ..Default::default()
                };
                JobRepository::save_checkpoint(&self.db, job.id, Some(&checkpoint)).await?;
                info!(job_id = %job.id, since = %since, "Incremental sync started");
                JobRepository::get(&self.db, job.id).await?
            }
        };

        if job.job_status() == Some(JobStatus::Paused) {
            return Ok(SyncTickOutcome::Paused { job_id: job.id });
        }

        let deadline = started + self.budget;
        let mut checkpoint = job
            .checkpoint()
            .filter(|checkpoint| checkpoint.phase == Phase::Syncing)
            .unwrap_or_else(|| Checkpoint {
                phase: Phase::Syncing,
                page: 1,
                since: Some(job.start_time.with_timezone(&Utc)),
                ..Default::default()
            });
        checkpoint.page = checkpoint.page.max(1);
        let mut counters = job.counters();

        loop {
            let remote = match self
                .api
                .fetch_page(PRODUCTS_RESOURCE, checkpoint.page, self.page_limit, checkpoint.since)
                .await
            {
                Ok(remote) => remote,
                Err(err) => return self.handle_listing_failure(&job, err.into()).await,
            };

            if job.total_products != remote.total as i64 {
                JobRepository::set_total(&self.db, job.id, remote.total as i64).await?;
            }

            let has_more = remote.has_more();
            debug!(
                job_id = %job.id,
                page = checkpoint.page,
                items = remote.items.len(),
                start_index = checkpoint.item_index,
                "Applying changed records"
            );

            while checkpoint.item_index < remote.items.len() {
                let item = &remote.items[checkpoint.item_index];
                let txn = self
                    .db
                    .begin()
                    .await
                    .map_err(|e| map_db_err("Failed to start sync item transaction", e))?;

                let status = JobRepository::get(&txn, job.id).await?.job_status();
                if status != Some(JobStatus::InProgress) {
                    txn.rollback()
                        .await
                        .map_err(|e| map_db_err("Failed to roll back sync item", e))?;
                    return Ok(stopped(job.id, status));
                }

                let context = ItemContext {
                    job_id: job.id,
                    page: Some(checkpoint.page),
                };
                let outcome = self.applier.apply(&txn, item, context).await?;
                counters.record(outcome);
                checkpoint.item_index += 1;

                JobRepository::update_progress(&txn, job.id, counters).await?;
                JobRepository::save_checkpoint(&txn, job.id, Some(&checkpoint)).await?;
                txn.commit()
                    .await
                    .map_err(|e| map_db_err("Failed to commit sync item", e))?;

                let more_here = checkpoint.item_index < remote.items.len();
                if (more_here || has_more) && Instant::now() >= deadline {
                    self.locks
                        .refresh(&self.db, INCREMENTAL_SYNC_LOCK, self.lock_ttl())
                        .await?;
                    let checkpoint = if more_here {
                        checkpoint.clone()
                    } else {
                        next_page(&checkpoint)
                    };
                    JobRepository::save_checkpoint(&self.db, job.id, Some(&checkpoint)).await?;
                    info!(job_id = %job.id, page = checkpoint.page, item_index = checkpoint.item_index, "Sync budget spent; suspending");
                    return Ok(SyncTickOutcome::Suspended {
                        job_id: job.id,
                        checkpoint,
                    });
                }
            }

            if !has_more {
                let job = JobRepository::complete(&self.db, job.id, JobStatus::Completed, None).await?;
                return Ok(SyncTickOutcome::Completed {
                    job_id: job.id,
                    counters: job.counters(),
                    deprecated: 0,
                });
            }

            checkpoint = next_page(&checkpoint);
            JobRepository::save_checkpoint(&self.db, job.id, Some(&checkpoint)).await?;
        }
    }

    async fn handle_listing_failure(
        &self,
        job: &Job,
        err: SyncError,
    ) -> Result<SyncTickOutcome, SyncError> {
        if err.is_auth() {
            self.notices
                .post(
                    &self.db,
                    NoticeKind::AuthFailure,
                    format!("Supplier API rejected the incremental sync: {err}"),
                )
                .await?;
            return Ok(SyncTickOutcome::AuthAborted { job_id: job.id });
        }

        let message = err.to_string();
        let retries = JobRepository::increment_retry(&self.db, job.id, &message).await?;
        warn!(job_id = %job.id, retries, error = %message, "Changed-records fetch failed");

        if retries >= self.config.max_fetch_failures as i32 {
            let error = format!("listing fetch failed {retries} times; last error: {message}");
            JobRepository::complete(&self.db, job.id, JobStatus::Failed, Some(error.clone())).await?;
            return Ok(SyncTickOutcome::Failed {
                job_id: job.id,
                error,
            });
        }

        Ok(SyncTickOutcome::FetchAborted {
            job_id: job.id,
            error: message,
        })
    }

    async fn drive_candidates(
        &self,
        mode: SyncMode,
        started: Instant,
    ) -> Result<SyncTickOutcome, SyncError> {
        let job = match (self.active_job(mode).await?, mode) {
            (Some(job), _) => job,
            (None, SyncMode::Outdated) => {
                let cutoff = Utc::now()
                    - chrono::Duration::seconds(self.config.outdated_after_seconds as i64);
                if ProductRepository::count_sync_candidates(&self.db, cutoff).await? == 0 {
                    return Ok(SyncTickOutcome::Idle);
                }
                let job = self.create_candidate_job(mode, cutoff).await?;
                info!(job_id = %job.id, total = job.total_products, "Outdated sync started");
                job
            }
            (None, _) => return Ok(SyncTickOutcome::Idle),
        };

        if job.job_status() == Some(JobStatus::Paused) {
            return Ok(SyncTickOutcome::Paused { job_id: job.id });
        }

        let deadline = started + self.budget;
        let cutoff = job
            .checkpoint()
            .and_then(|checkpoint| checkpoint.cutoff)
            .unwrap_or_else(|| job.start_time.with_timezone(&Utc));
        let mut counters = job.counters();
        let mut deprecated = 0u64;

        let outcome = loop {
            let batch =
                ProductRepository::list_sync_candidates(&self.db, cutoff, self.config.batch_size)
                    .await?;
            if batch.is_empty() {
                let job = JobRepository::complete(&self.db, job.id, JobStatus::Completed, None).await?;
                break SyncTickOutcome::Completed {
                    job_id: job.id,
                    counters: job.counters(),
                    deprecated,
                };
            }

            let mut stop = None;
            for product in batch {
                let Some(sku) = product.sku.clone() else {
                    continue;
                };

                let fetched = self.api.fetch_one(&sku).await.map_err(SyncError::from);
                if let Err(err) = &fetched
                    && err.is_auth()
                {
                    self.notices
                        .post(
                            &self.db,
                            NoticeKind::AuthFailure,
                            format!("Supplier API rejected the product re-sync: {err}"),
                        )
                        .await?;
                    stop = Some(SyncTickOutcome::AuthAborted { job_id: job.id });
                    break;
                }

                let txn = self
                    .db
                    .begin()
                    .await
                    .map_err(|e| map_db_err("Failed to start re-sync transaction", e))?;

                let status = JobRepository::get(&txn, job.id).await?.job_status();
                if status != Some(JobStatus::InProgress) {
                    txn.rollback()
                        .await
                        .map_err(|e| map_db_err("Failed to roll back re-sync item", e))?;
                    stop = Some(stopped(job.id, status));
                    break;
                }

                let outcome = match fetched {
                    Ok(value) => {
                        let context = ItemContext {
                            job_id: job.id,
                            page: None,
                        };
                        self.applier.apply(&txn, &value, context).await?
                    }
                    Err(SyncError::NotFound { .. }) => {
                        if UpsertEngine::deprecate(
                            &txn,
                            product.id,
                            "not found on supplier",
                            actor::SYNC,
                        )
                        .await?
                        {
                            deprecated += 1;
                        }
                        ItemOutcome::Existing
                    }
                    Err(err) => {
                        warn!(job_id = %job.id, sku = %sku, error = %err, "Product re-fetch failed");
                        metrics::counter!("catalog_sync_items_failed_total").increment(1);
                        ItemOutcome::Failed
                    }
                };

                ProductRepository::mark_sync_attempted(&txn, product.id, Utc::now()).await?;
                counters.record(outcome);
                JobRepository::update_progress(&txn, job.id, counters).await?;
                txn.commit()
                    .await
                    .map_err(|e| map_db_err("Failed to commit re-sync item", e))?;

                if Instant::now() >= deadline {
                    self.locks
                        .refresh(&self.db, mode.lock(), self.lock_ttl())
                        .await?;
                    let checkpoint = job.checkpoint().unwrap_or_default();
                    info!(
                        job_id = %job.id,
                        mode = ?mode,
                        processed = counters.processed,
                        "Re-sync budget spent; suspending"
                    );
                    stop = Some(SyncTickOutcome::Suspended {
                        job_id: job.id,
                        checkpoint,
                    });
                    break;
                }
            }

            if let Some(outcome) = stop {
                break outcome;
            }
        };

        if deprecated > 0 {
            let total = UpsertEngine::deprecated_count(&self.db).await?;
            self.notices
                .post(
                    &self.db,
                    NoticeKind::DeprecatedProducts,
                    format!("{deprecated} products were not found on the supplier ({total} in total)"),
                )
                .await?;
        }

        Ok(outcome)
    }
}

fn next_page(checkpoint: &Checkpoint) -> Checkpoint {
    Checkpoint {
        page: checkpoint.page + 1,
        item_index: 0,
        ..checkpoint.clone()
    }
}

fn stopped(job_id: Uuid, status: Option<JobStatus>) -> SyncTickOutcome {
    match status {
        Some(JobStatus::Paused) => SyncTickOutcome::Paused { job_id },
        _ => SyncTickOutcome::Cancelled { job_id },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modes_round_trip_through_their_source_tags() {
        for mode in [SyncMode::Incremental, SyncMode::Force, SyncMode::Outdated] {
            assert_eq!(SyncMode::from_source(mode.source()), Some(mode));
        }
        assert_eq!(SyncMode::from_source("anar_api"), None);
        assert_eq!(SyncMode::Force.lock(), SyncMode::Outdated.lock());
    }

    #[test]
    fn next_page_keeps_the_window() {
        let since = Utc::now();
        let checkpoint = Checkpoint {
            phase: Phase::Syncing,
            page: 2,
            item_index: 7,
            since: Some(since),
            cutoff: None,
        };

        let next = next_page(&checkpoint);
        assert_eq!(next.page, 3);
        assert_eq!(next.item_index, 0);
        assert_eq!(next.since, Some(since));
    }
}
