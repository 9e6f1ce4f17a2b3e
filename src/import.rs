//! # Import Orchestrator
//!
//! Drives a full catalog import as a resumable state machine:
//! fetch every remote page into the page store, then apply staged pages one
//! transaction at a time, then reconcile products that disappeared upstream.
//!
//! Each tick runs under the import lock, stops cooperatively when its
//! execution budget is spent and persists a [`Checkpoint`] on the job so the
//! next tick resumes exactly where this one stopped.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use sea_orm::{ConnectionTrait, DatabaseConnection, DbBackend, TransactionTrait};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::catalog::{UpsertEngine, actor};
use crate::config::ImportConfig;
use crate::error::{SyncError, map_db_err};
use crate::locks::{IMPORT_LOCK, INCREMENTAL_SYNC_LOCK, LockService};
use crate::models::job::{Checkpoint, JobCounters, JobStatus, Model as Job, Phase};
use crate::models::page::Model as StagedPage;
use crate::notices::{NoticeKind, Notices};
use crate::pipeline::{ItemApplier, ItemContext, sku_hint};
use crate::remote::CatalogApi;
use crate::repositories::{JobRepository, OptionRepository, PageRepository, ProductRepository};

/// Remote listing the import walks.
pub const PRODUCTS_RESOURCE: &str = "products";

pub const PROCESS_STARTED_KEY: &str = "import:process_started";
pub const HEARTBEAT_KEY: &str = "import:heartbeat";

/// What one import tick ended with.
#[derive(Debug, Clone, PartialEq)]
pub enum ImportTickOutcome {
    /// No import job is active
    Idle,
    /// Another import or an incremental sync holds the pipeline
    Locked,
    Paused { job_id: Uuid },
    /// Budget spent; the next tick resumes from the checkpoint
    Suspended { job_id: Uuid, checkpoint: Checkpoint },
    /// Page fetch failed after retries; staged pages are kept
    FetchAborted { job_id: Uuid, error: String },
    /// Credentials missing or rejected
    AuthAborted { job_id: Uuid },
    Completed { job_id: Uuid, counters: JobCounters, deprecated: u64 },
    Failed { job_id: Uuid, error: String },
    Cancelled { job_id: Uuid },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ProcessMarker {
    job_id: Uuid,
    at: DateTime<Utc>,
}

/// Result of a watchdog check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StuckCheck {
    Healthy,
    /// Markers were found past their timeout and cleared
    Recovered,
}

enum FetchResult {
    Done,
    Suspended(u32),
    Aborted(SyncError),
    Stopped(JobStatus),
}

enum PageResult {
    Finished,
    Suspended(Checkpoint),
    Stopped(JobStatus),
}

pub struct ImportOrchestrator {
    db: DatabaseConnection,
    api: Arc<dyn CatalogApi>,
    config: ImportConfig,
    page_limit: u32,
    applier: ItemApplier,
    locks: LockService,
    notices: Notices,
    budget: Duration,
}

impl ImportOrchestrator {
    pub fn new(
        db: DatabaseConnection,
        api: Arc<dyn CatalogApi>,
        config: ImportConfig,
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

    /// The import job that should be driven, if any.
    pub async fn active_job(&self) -> Result<Option<Job>, SyncError> {
        Ok(JobRepository::list_active(&self.db, &self.config.source)
            .await?
            .into_iter()
            .next())
    }

    /// Begin a fresh import unless one is already running.
    ///
    /// Returns `None` without side effects when the import lock is held, an
    /// incremental sync is running, or an import job is still active.
    pub async fn start_import(&self) -> Result<Option<Job>, SyncError> {
        if !self.acquire_pipeline().await? {
            info!("Import already running or sync in progress; start ignored");
            return Ok(None);
        }

        let started = self.create_import().await;
        if let Err(err) = self.locks.release(&self.db, IMPORT_LOCK).await {
            warn!(error = %err, "Failed to release import lock");
        }
        started
    }

    /// Take the import lock, then make sure no incremental sync got in first.
    async fn acquire_pipeline(&self) -> Result<bool, SyncError> {
        if !self
            .locks
            .try_acquire(&self.db, IMPORT_LOCK, self.lock_ttl())
            .await?
        {
            return Ok(false);
        }
        if self.locks.is_held(&self.db, INCREMENTAL_SYNC_LOCK).await? {
            self.locks.release(&self.db, IMPORT_LOCK).await?;
            return Ok(false);
        }
        Ok(true)
    }

    async fn create_import(&self) -> Result<Option<Job>, SyncError> {
        if let Some(active) = self.active_job().await? {
            info!(job_id = %active.id, status = %active.status, "Import job already active; start ignored");
            return Ok(None);
        }

        let txn = self
            .db
            .begin()
            .await
            .map_err(|e| map_db_err("Failed to start import transaction", e))?;
        let cleared = PageRepository::clear_all(&txn, &self.config.page_key).await?;
        let job = JobRepository::create(&txn, &self.config.source, 0).await?;
        JobRepository::save_checkpoint(&txn, job.id, Some(&Checkpoint::fetching(1))).await?;
        txn.commit()
            .await
            .map_err(|e| map_db_err("Failed to commit import start", e))?;

        info!(job_id = %job.id, cleared_pages = cleared, "Import started");
        JobRepository::get(&self.db, job.id).await.map(Some)
    }

    /// Run one bounded slice of the active import.
    pub async fn run_import_tick(&self) -> Result<ImportTickOutcome, SyncError> {
        let started = Instant::now();

        if self.recover_stuck().await? == StuckCheck::Recovered {
            metrics::counter!("catalog_sync_stuck_recoveries_total").increment(1);
        }

        if !self.acquire_pipeline().await? {
            debug!("Import lock or incremental sync holds the catalog; tick skipped");
            return Ok(ImportTickOutcome::Locked);
        }

        let result = self.drive(started).await;

        if let Err(err) = self.clear_markers(&self.db).await {
            warn!(error = %err, "Failed to clear import markers");
        }
        if let Err(err) = self.locks.release(&self.db, IMPORT_LOCK).await {
            warn!(error = %err, "Failed to release import lock");
        }

        metrics::histogram!("catalog_sync_import_tick_duration_ms")
            .record(started.elapsed().as_secs_f64() * 1000.0);

        result
    }

    /// Clear in-progress markers and the lock left behind by a crashed or
    /// hung worker.
    pub async fn recover_stuck(&self) -> Result<StuckCheck, SyncError> {
        let now = Utc::now();
        let process_timeout = chrono::Duration::seconds(self.config.process_timeout_seconds as i64);
        let heartbeat_timeout =
            chrono::Duration::seconds(self.config.heartbeat_timeout_seconds as i64);

        let started = read_marker(&self.db, PROCESS_STARTED_KEY).await?;
        let heartbeat = read_marker(&self.db, HEARTBEAT_KEY).await?;

        let started_expired = started
            .as_ref()
            .is_some_and(|marker| now - marker.at > process_timeout);
        let heartbeat_expired = heartbeat
            .as_ref()
            .is_some_and(|marker| now - marker.at > heartbeat_timeout);

        if !started_expired && !heartbeat_expired {
            return Ok(StuckCheck::Healthy);
        }

        let job_id = started.or(heartbeat).map(|marker| marker.job_id);
        warn!(
            job_id = ?job_id,
            started_expired,
            heartbeat_expired,
            "Stuck import detected; clearing in-progress markers"
        );

        self.clear_markers(&self.db).await?;
        self.locks.release(&self.db, IMPORT_LOCK).await?;
        self.notices
            .post(
                &self.db,
                NoticeKind::StuckProcess,
                format!(
                    "Import worker stopped responding (job {}); it will resume on the next tick",
                    job_id.map(|id| id.to_string()).unwrap_or_default()
                ),
            )
            .await?;

        Ok(StuckCheck::Recovered)
    }

    async fn drive(&self, started: Instant) -> Result<ImportTickOutcome, SyncError> {
        let Some(job) = self.active_job().await? else {
            return Ok(ImportTickOutcome::Idle);
        };

        if job.job_status() == Some(JobStatus::Paused) {
            debug!(job_id = %job.id, "Import job paused");
            return Ok(ImportTickOutcome::Paused { job_id: job.id });
        }

        let deadline = started + self.budget;
        self.write_marker(&self.db, PROCESS_STARTED_KEY, job.id).await?;
        self.write_marker(&self.db, HEARTBEAT_KEY, job.id).await?;

        let mut checkpoint = job.checkpoint().unwrap_or_else(|| Checkpoint::fetching(1));
        info!(
            job_id = %job.id,
            phase = ?checkpoint.phase,
            page = checkpoint.page,
            item_index = checkpoint.item_index,
            "Import tick resuming"
        );

        if checkpoint.phase == Phase::Fetching {
            match self.fetch_pages(&job, checkpoint.page.max(1), deadline).await? {
                FetchResult::Done => checkpoint = Checkpoint::processing(1, 0),
                FetchResult::Suspended(next_page) => {
                    let checkpoint = Checkpoint::fetching(next_page);
                    return Ok(ImportTickOutcome::Suspended {
                        job_id: job.id,
                        checkpoint,
                    });
                }
                FetchResult::Aborted(err) => return self.handle_fetch_abort(&job, err).await,
                FetchResult::Stopped(status) => return Ok(stopped_outcome(job.id, status)),
            }

            if Instant::now() >= deadline {
                return Ok(ImportTickOutcome::Suspended {
                    job_id: job.id,
                    checkpoint,
                });
            }
        }

        loop {
            let Some(page) = PageRepository::next_unprocessed(&self.db, &self.config.page_key).await?
            else {
                break;
            };

            let start_index = if checkpoint.phase == Phase::Processing
                && checkpoint.page == page.page as u32
            {
                checkpoint.item_index
            } else {
                0
            };

            match self.process_page(job.id, &page, start_index, deadline).await? {
                PageResult::Finished => {
                    checkpoint = Checkpoint::processing(page.page as u32 + 1, 0);
                    if Instant::now() >= deadline
                        && PageRepository::count_unprocessed(&self.db, &self.config.page_key).await? > 0
                    {
                        return Ok(ImportTickOutcome::Suspended {
                            job_id: job.id,
                            checkpoint,
                        });
                    }
                }
                PageResult::Suspended(checkpoint) => {
                    return Ok(ImportTickOutcome::Suspended {
                        job_id: job.id,
                        checkpoint,
                    });
                }
                PageResult::Stopped(status) => return Ok(stopped_outcome(job.id, status)),
            }
        }

        if let Some(status) = stop_status(&self.db, job.id).await? {
            return Ok(stopped_outcome(job.id, status));
        }
        self.finalize(job.id).await
    }

    async fn fetch_pages(
        &self,
        job: &Job,
        start_page: u32,
        deadline: Instant,
    ) -> Result<FetchResult, SyncError> {
        let mut page = start_page;

        loop {
            if page > start_page && Instant::now() >= deadline {
                info!(job_id = %job.id, next_page = page, "Fetch budget spent; suspending");
                return Ok(FetchResult::Suspended(page));
            }

            if let Some(status) = stop_status(&self.db, job.id).await? {
                info!(job_id = %job.id, page, status = %status, "Import fetch stopped by job control");
                return Ok(FetchResult::Stopped(status));
            }

            let remote = match self
                .api
                .fetch_page(PRODUCTS_RESOURCE, page, self.page_limit, None)
                .await
            {
                Ok(remote) => remote,
                Err(err) => {
                    warn!(job_id = %job.id, page, error = %err, "Page fetch failed");
                    return Ok(FetchResult::Aborted(err.into()));
                }
            };

            let has_more = remote.has_more();
            let item_count = remote.items.len();
            let total = remote.total as i64;

            let txn = self
                .db
                .begin()
                .await
                .map_err(|e| map_db_err("Failed to start staging transaction", e))?;
            PageRepository::stage(&txn, &self.config.page_key, page, remote.to_payload()).await?;

            // A job cancelled while the request was in flight keeps the page but
            // takes no further writes.
            let current = JobRepository::get(&txn, job.id).await?;
            if current.is_terminal() {
                txn.commit()
                    .await
                    .map_err(|e| map_db_err("Failed to commit staged page", e))?;
                let status = current.job_status().unwrap_or(JobStatus::Cancelled);
                info!(job_id = %job.id, page, status = %status, "Import fetch stopped by job control");
                return Ok(FetchResult::Stopped(status));
            }

            if page == 1 || current.total_products != total {
                JobRepository::set_total(&txn, job.id, total).await?;
            }
            let next = if has_more {
                Checkpoint::fetching(page + 1)
            } else {
                Checkpoint::processing(1, 0)
            };
            JobRepository::save_checkpoint(&txn, job.id, Some(&next)).await?;
            txn.commit()
                .await
                .map_err(|e| map_db_err("Failed to commit staged page", e))?;
            self.write_marker(&self.db, HEARTBEAT_KEY, job.id).await?;
            self.locks.refresh(&self.db, IMPORT_LOCK, self.lock_ttl()).await?;

            debug!(job_id = %job.id, page, items = item_count, total, "Page staged");

            if !has_more {
                info!(job_id = %job.id, pages = page, total, "All pages staged");
                return Ok(FetchResult::Done);
            }
            page += 1;
        }
    }

    async fn handle_fetch_abort(
        &self,
        job: &Job,
        err: SyncError,
    ) -> Result<ImportTickOutcome, SyncError> {
        if err.is_auth() {
            self.notices
                .post(
                    &self.db,
                    NoticeKind::AuthFailure,
                    format!("Supplier API rejected the import: {err}"),
                )
                .await?;
            return Ok(ImportTickOutcome::AuthAborted { job_id: job.id });
        }

        let message = err.to_string();
        let retries = JobRepository::increment_retry(&self.db, job.id, &message).await?;

        if retries >= self.config.max_fetch_failures as i32 {
            let error = format!("fetch phase failed {retries} times; last error: {message}");
            JobRepository::complete(&self.db, job.id, JobStatus::Failed, Some(error.clone())).await?;
            self.notices
                .post(&self.db, NoticeKind::FetchAborted, error.clone())
                .await?;
            return Ok(ImportTickOutcome::Failed {
                job_id: job.id,
                error,
            });
        }

        self.notices
            .post(
                &self.db,
                NoticeKind::FetchAborted,
                format!("Import fetch aborted (attempt {retries}): {message}"),
            )
            .await?;
        Ok(ImportTickOutcome::FetchAborted {
            job_id: job.id,
            error: message,
        })
    }

    /// Apply one staged page inside a single transaction.
    async fn process_page(
        &self,
        job_id: Uuid,
        page: &StagedPage,
        start_index: usize,
        deadline: Instant,
    ) -> Result<PageResult, SyncError> {
        let page_number = page.page as u32;
        let items = page.items();
        let heartbeat_every = self.config.heartbeat_every_items.max(1) as usize;

        let txn = self
            .db
            .begin()
            .await
            .map_err(|e| map_db_err("Failed to start page transaction", e))?;

        // The saved checkpoint already points at this page and index.
        if let Some(status) = stop_status(&txn, job_id).await? {
            txn.rollback()
                .await
                .map_err(|e| map_db_err("Failed to end page transaction", e))?;
            info!(job_id = %job_id, page = page_number, index = start_index, status = %status, "Import stopped by job control");
            return Ok(PageResult::Stopped(status));
        }

        let mut counters = if page_number == 1 && start_index == 0 {
            JobRepository::reset_counters(&txn, job_id).await?;
            JobCounters::default()
        } else {
            JobRepository::get(&txn, job_id).await?.counters()
        };

        debug!(job_id = %job_id, page = page_number, start_index, items = items.len(), "Processing page");

        let mut index = start_index;
        while index < items.len() {
            if let Some(status) = stop_status(&txn, job_id).await? {
                if !status.is_terminal() {
                    JobRepository::update_progress(&txn, job_id, counters).await?;
                    JobRepository::save_checkpoint(
                        &txn,
                        job_id,
                        Some(&Checkpoint::processing(page_number, index)),
                    )
                    .await?;
                }
                txn.commit()
                    .await
                    .map_err(|e| map_db_err("Failed to commit page transaction", e))?;
                info!(job_id = %job_id, page = page_number, index, status = %status, "Import stopped by job control");
                return Ok(PageResult::Stopped(status));
            }

            let context = ItemContext {
                job_id,
                page: Some(page_number),
            };
            let outcome = self.applier.apply(&txn, &items[index], context).await?;
            counters.record(outcome);
            index += 1;

            if index % heartbeat_every == 0 {
                JobRepository::update_progress(&txn, job_id, counters).await?;
                self.beat(&txn, job_id).await?;
            }

            if index < items.len() && Instant::now() >= deadline {
                let checkpoint = Checkpoint::processing(page_number, index);
                JobRepository::update_progress(&txn, job_id, counters).await?;
                JobRepository::save_checkpoint(&txn, job_id, Some(&checkpoint)).await?;
                txn.commit()
                    .await
                    .map_err(|e| map_db_err("Failed to commit page transaction", e))?;
                info!(job_id = %job_id, page = page_number, index, "Import budget spent mid-page");
                return Ok(PageResult::Suspended(checkpoint));
            }
        }

        PageRepository::mark_processed(&txn, page.id).await?;
        JobRepository::update_progress(&txn, job_id, counters).await?;
        JobRepository::save_checkpoint(
            &txn,
            job_id,
            Some(&Checkpoint::processing(page_number + 1, 0)),
        )
        .await?;
        txn.commit()
            .await
            .map_err(|e| map_db_err("Failed to commit page transaction", e))?;

        info!(
            job_id = %job_id,
            page = page_number,
            processed = counters.processed,
            failed = counters.failed,
            "Page processed"
        );
        Ok(PageResult::Finished)
    }

    async fn finalize(&self, job_id: Uuid) -> Result<ImportTickOutcome, SyncError> {
        let deprecated = self.reconcile_removed(job_id).await?;

        if let Err(err) = self.api.notify_sync_complete().await {
            warn!(job_id = %job_id, error = %err, "Failed to notify supplier of completed sync");
        }

        let job = JobRepository::complete(&self.db, job_id, JobStatus::Completed, None).await?;
        Ok(ImportTickOutcome::Completed {
            job_id,
            counters: job.counters(),
            deprecated,
        })
    }

    /// Deprecate local products whose SKU no staged page contains.
    async fn reconcile_removed(&self, job_id: Uuid) -> Result<u64, SyncError> {
        let pages = PageRepository::list(&self.db, &self.config.page_key).await?;
        let remote: HashSet<String> = pages
            .iter()
            .flat_map(|page| page.items())
            .filter_map(|item| sku_hint(&item))
            .collect();

        if remote.is_empty() {
            warn!(job_id = %job_id, "Supplier returned no products; skipping removed-product reconciliation");
            return Ok(0);
        }

        let mut deprecated = 0u64;
        for (product_id, sku) in ProductRepository::list_active_skus(&self.db).await? {
            if remote.contains(&sku) {
                continue;
            }
            if UpsertEngine::deprecate(
                &self.db,
                product_id,
                "missing from supplier catalog",
                actor::IMPORT,
            )
            .await?
            {
                deprecated += 1;
            }
        }

        if deprecated > 0 {
            let total = UpsertEngine::deprecated_count(&self.db).await?;
            self.notices
                .post(
                    &self.db,
                    NoticeKind::DeprecatedProducts,
                    format!("{deprecated} products are no longer offered by the supplier ({total} in total)"),
                )
                .await?;
        }

        info!(job_id = %job_id, remote_skus = remote.len(), deprecated, "Removed-product reconciliation finished");
        Ok(deprecated)
    }

    async fn write_marker<C: ConnectionTrait>(
        &self,
        conn: &C,
        key: &str,
        job_id: Uuid,
    ) -> Result<(), SyncError> {
        let marker = ProcessMarker {
            job_id,
            at: Utc::now(),
        };
        OptionRepository::set(conn, key, serde_json::to_value(&marker)?, None).await
    }

    async fn clear_markers<C: ConnectionTrait>(&self, conn: &C) -> Result<(), SyncError> {
        OptionRepository::delete(conn, PROCESS_STARTED_KEY).await?;
        OptionRepository::delete(conn, HEARTBEAT_KEY).await?;
        Ok(())
    }

    /// Heartbeat marker and lock refresh while a page transaction is open.
    ///
    /// They go on the pool so other workers see them before the page commits.
    /// SQLite allows a single writer, so there they ride on the page
    /// transaction instead.
    async fn beat<C: ConnectionTrait>(&self, txn: &C, job_id: Uuid) -> Result<(), SyncError> {
        if markers_share_page_txn(self.db.get_database_backend()) {
            self.write_marker(txn, HEARTBEAT_KEY, job_id).await?;
            self.locks.refresh(txn, IMPORT_LOCK, self.lock_ttl()).await?;
        } else {
            self.write_marker(&self.db, HEARTBEAT_KEY, job_id).await?;
            self.locks.refresh(&self.db, IMPORT_LOCK, self.lock_ttl()).await?;
        }
        Ok(())
    }
}

fn markers_share_page_txn(backend: DbBackend) -> bool {
    backend == DbBackend::Sqlite
}

/// The job's status when it is no longer in progress.
async fn stop_status<C: ConnectionTrait>(
    conn: &C,
    job_id: Uuid,
) -> Result<Option<JobStatus>, SyncError> {
    let status = JobRepository::get(conn, job_id).await?.job_status();
    Ok(match status {
        Some(JobStatus::InProgress) => None,
        other => Some(other.unwrap_or(JobStatus::Cancelled)),
    })
}

fn stopped_outcome(job_id: Uuid, status: JobStatus) -> ImportTickOutcome {
    match status {
        JobStatus::Paused => ImportTickOutcome::Paused { job_id },
        _ => ImportTickOutcome::Cancelled { job_id },
    }
}

async fn read_marker<C: ConnectionTrait>(
    conn: &C,
    key: &str,
) -> Result<Option<ProcessMarker>, SyncError> {
    Ok(OptionRepository::get(conn, key)
        .await?
        .and_then(|value| serde_json::from_value(value).ok()))
}
