//! Wiring of the long-lived services shared by the CLI and the scheduler.

use std::sync::Arc;

use anyhow::{Context, Result};
use sea_orm::DatabaseConnection;

use crate::config::AppConfig;
use crate::import::ImportOrchestrator;
use crate::locks::LockService;
use crate::mapper::{Currency, MapperOptions};
use crate::media::ThumbnailStore;
use crate::notices::Notices;
use crate::pipeline::ItemApplier;
use crate::quarantine::FailureQuarantine;
use crate::remote::{CatalogApi, RemoteCatalogClient};
use crate::sync::SyncOrchestrator;

/// Everything a tick needs, built once per process.
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub db: DatabaseConnection,
    pub api: Arc<dyn CatalogApi>,
    pub locks: LockService,
    pub notices: Notices,
    pub quarantine: FailureQuarantine,
    pub import: ImportOrchestrator,
    pub sync: SyncOrchestrator,
}

impl AppContext {
    /// Build the context over an existing pool and supplier client.
    pub fn new(config: AppConfig, db: DatabaseConnection, api: Arc<dyn CatalogApi>) -> Self {
        let config = Arc::new(config);
        let locks = LockService::new(lock_owner());
        let notices = Notices;
        let quarantine = FailureQuarantine::new(config.import.max_item_attempts);
        let mapper = MapperOptions {
            currency: Currency::parse(&config.remote.currency).unwrap_or_default(),
        };
        let applier = ItemApplier::new(
            api.clone(),
            mapper,
            quarantine,
            ThumbnailStore::new(config.import.media_dir.clone()),
        );

        let import = ImportOrchestrator::new(
            db.clone(),
            api.clone(),
            config.import.clone(),
            config.remote.page_limit,
            applier.clone(),
            locks.clone(),
            notices,
        );
        let sync = SyncOrchestrator::new(
            db.clone(),
            api.clone(),
            config.sync.clone(),
            config.import.source.clone(),
            config.remote.page_limit,
            applier,
            locks.clone(),
            notices,
        );

        Self {
            config,
            db,
            api,
            locks,
            notices,
            quarantine,
            import,
            sync,
        }
    }

    /// Connect to the database and the supplier API described by `config`.
    pub async fn connect(config: AppConfig) -> Result<Self> {
        let db = crate::db::init_pool(&config).await?;
        let client = RemoteCatalogClient::new(&config.remote)
            .context("Failed to build supplier API client")?;
        Ok(Self::new(config, db, Arc::new(client)))
    }
}

/// Identifies this process in lock rows.
fn lock_owner() -> String {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
    format!("{host}:{}", std::process::id())
}
