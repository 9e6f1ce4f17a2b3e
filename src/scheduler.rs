//! # Catalog Scheduler
//!
//! Background loop that drives every pipeline one bounded slice at a time.
//! Each tick, in order:
//!
//! 1. releases the pipeline locks of jobs whose heartbeat went stale,
//! 2. runs an import tick (a no-op without an active import),
//! 3. runs the incremental sync when its interval elapsed,
//! 4. runs the outdated re-sync when its interval elapsed,
//! 5. continues an in-progress force sync.
//!
//! A failing step is logged and counted; later steps still run.

use std::sync::Arc;

use chrono::Utc;
use metrics::{counter, histogram};
use rand::Rng;
use tokio::time::{Duration as TokioDuration, Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::app::AppContext;
use crate::config::SchedulerConfig;
use crate::error::SyncError;
use crate::locks::IMPORT_LOCK;
use crate::notices::NoticeKind;
use crate::repositories::JobRepository;
use crate::sync::{SyncMode, SyncTickOutcome};
use crate::telemetry::{RunContext, with_run_context};

/// Background scheduler service.
pub struct CatalogScheduler {
    app: Arc<AppContext>,
}

/// What one tick did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickStats {
    pub stale_jobs_recovered: u64,
    pub import_ran: bool,
    pub incremental_ran: bool,
    pub outdated_ran: bool,
    pub force_ran: bool,
    pub errors: u64,
}

impl CatalogScheduler {
    pub fn new(app: Arc<AppContext>) -> Self {
        Self { app }
    }

    /// Run the scheduler loop until the provided shutdown token fires.
    #[instrument(skip_all)]
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), SyncError> {
        let config = &self.app.config.scheduler;
        info!(
            tick_interval_seconds = config.tick_interval_seconds,
            "Starting catalog scheduler"
        );

        loop {
            let jitter = sample_jitter_seconds(config, config.tick_interval_seconds);
            let wait = TokioDuration::from_secs(config.tick_interval_seconds + jitter);

            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Catalog scheduler shutdown requested");
                    break;
                }
                _ = sleep(wait) => {
                    let tick_started = Instant::now();
                    let stats = with_run_context(RunContext::new("scheduler"), self.tick()).await;
                    if stats.errors > 0 {
                        error!(errors = stats.errors, "Scheduler tick finished with errors");
                    }
                    histogram!("catalog_sync_scheduler_tick_duration_ms")
                        .record(tick_started.elapsed().as_secs_f64() * 1_000.0);
                }
            }
        }

        info!("Catalog scheduler stopped");
        Ok(())
    }

    /// One pass over every pipeline.
    pub async fn tick(&self) -> TickStats {
        let mut stats = TickStats::default();
        let now = Utc::now();

        match self.recover_stale_jobs().await {
            Ok(recovered) => stats.stale_jobs_recovered = recovered,
            Err(err) => {
                stats.errors += 1;
                error!(error = %err, "Stale job recovery failed");
            }
        }

        match self.app.import.run_import_tick().await {
            Ok(outcome) => {
                stats.import_ran = true;
                debug!(outcome = ?outcome, "Import tick finished");
            }
            Err(err) => {
                stats.errors += 1;
                error!(error = %err, "Import tick failed");
            }
        }

        for mode in [SyncMode::Incremental, SyncMode::Outdated, SyncMode::Force] {
            match self.run_sync_if_due(mode, now).await {
                Ok(Some(outcome)) => {
                    match mode {
                        SyncMode::Incremental => stats.incremental_ran = true,
                        SyncMode::Outdated => stats.outdated_ran = true,
                        SyncMode::Force => stats.force_ran = true,
                    }
                    debug!(mode = ?mode, outcome = ?outcome, "Sync tick finished");
                }
                Ok(None) => {}
                Err(err) => {
                    stats.errors += 1;
                    error!(mode = ?mode, error = %err, "Sync tick failed");
                }
            }
        }

        counter!("catalog_sync_scheduler_ticks_total").increment(1);
        debug!(
            stale_recovered = stats.stale_jobs_recovered,
            import = stats.import_ran,
            incremental = stats.incremental_ran,
            outdated = stats.outdated_ran,
            force = stats.force_ran,
            errors = stats.errors,
            "Scheduler tick completed"
        );
        stats
    }

    async fn run_sync_if_due(
        &self,
        mode: SyncMode,
        now: chrono::DateTime<Utc>,
    ) -> Result<Option<SyncTickOutcome>, SyncError> {
        if !self.app.sync.is_due(mode, now).await? {
            return Ok(None);
        }

        let outcome = match mode {
            SyncMode::Incremental => self.app.sync.run_incremental_tick().await?,
            SyncMode::Outdated => self.app.sync.run_outdated_sync_tick().await?,
            SyncMode::Force => self.app.sync.run_force_sync_tick().await?,
        };
        Ok(Some(outcome))
    }

    /// Release the locks of `in_progress` jobs that stopped heartbeating so
    /// the next tick can resume them from their checkpoint.
    pub async fn recover_stale_jobs(&self) -> Result<u64, SyncError> {
        let stale =
            JobRepository::list_stale(&self.app.db, self.app.config.sync.stale_job_seconds).await?;

        let mut recovered = 0;
        for job in stale {
            let Some(lock) = self.lock_for_source(&job.source) else {
                continue;
            };

            if !self.app.locks.release(&self.app.db, lock).await? {
                continue;
            }

            recovered += 1;
            warn!(
                job_id = %job.id,
                source = %job.source,
                last_heartbeat = %job.last_heartbeat,
                "Stale job detected; pipeline lock released"
            );
            self.app
                .notices
                .post(
                    &self.app.db,
                    NoticeKind::StuckProcess,
                    format!(
                        "Job {} ({}) stopped heartbeating; it will resume on the next tick",
                        job.id, job.source
                    ),
                )
                .await?;
        }

        if recovered > 0 {
            counter!("catalog_sync_stale_jobs_recovered_total").increment(recovered);
        }
        Ok(recovered)
    }

    fn lock_for_source(&self, source: &str) -> Option<&'static str> {
        if source == self.app.config.import.source {
            return Some(IMPORT_LOCK);
        }
        SyncMode::from_source(source).map(|mode| mode.lock())
    }
}

fn sample_jitter_seconds(config: &SchedulerConfig, base_interval_seconds: u64) -> u64 {
    let mut rng = rand::thread_rng();
    compute_jitter_seconds(config, base_interval_seconds, &mut rng)
}

fn compute_jitter_seconds<R: Rng + ?Sized>(
    config: &SchedulerConfig,
    base_interval_seconds: u64,
    rng: &mut R,
) -> u64 {
    let max = config.jitter_pct_max.max(0.0);
    if max == 0.0 {
        return 0;
    }

    let jitter_pct = rng.gen_range(0.0..=max);
    (base_interval_seconds as f64 * jitter_pct).round() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn scheduler_config(jitter_pct_max: f64) -> SchedulerConfig {
        SchedulerConfig {
            tick_interval_seconds: 60,
            jitter_pct_max,
        }
    }

    #[test]
    fn jitter_respects_bounds() {
        let config = scheduler_config(0.2);
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);

        for _ in 0..100 {
            let jitter = compute_jitter_seconds(&config, 600, &mut rng);
            assert!(jitter <= 120);
        }
    }

    #[test]
    fn jitter_zero_when_disabled() {
        let config = scheduler_config(0.0);
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        assert_eq!(compute_jitter_seconds(&config, 600, &mut rng), 0);
    }
}
