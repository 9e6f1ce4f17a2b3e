//! Configuration loading for the catalog sync service.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `CATALOG_SYNC_`, producing a typed [`AppConfig`].

use std::{collections::BTreeMap, env, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::remote::retry::{BackoffKind, RetryPolicy};

const ENV_PREFIX: &str = "CATALOG_SYNC_";

/// Application configuration derived from `CATALOG_SYNC_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_acquire_timeout_ms")]
    pub db_acquire_timeout_ms: u64,
    #[serde(default)]
    pub remote: RemoteApiConfig,
    #[serde(default)]
    pub import: ImportConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

/// Supplier API connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RemoteApiConfig {
    #[serde(default = "default_remote_base_url")]
    pub base_url: String,

    /// Bearer-style token; absence makes every remote call fail fast
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,

    /// Value of the origin-identifying header sent with every request
    #[serde(default = "default_remote_origin")]
    pub origin: String,

    /// Per-call timeout; bulk pages can be large
    #[serde(default = "default_remote_request_timeout_seconds")]
    pub request_timeout_seconds: u64,

    #[serde(default = "default_remote_page_limit")]
    pub page_limit: u32,

    /// Policy for single-record fetches and order calls
    #[serde(default = "default_fetch_retry")]
    pub fetch_retry: RetrySettings,

    /// Policy for paginated bulk fetches
    #[serde(default = "default_bulk_retry")]
    pub bulk_retry: RetrySettings,

    /// Unit the local store keeps prices in (`rial` or `toman`)
    #[serde(default = "default_remote_currency")]
    pub currency: String,
}

/// Retry knobs as they appear in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub delay_seconds: u64,
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            delay: Duration::from_secs(self.delay_seconds),
            backoff: BackoffKind::Fixed,
        }
    }
}

/// Bulk import pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ImportConfig {
    /// Job source tag for import runs
    #[serde(default = "default_import_source")]
    pub source: String,
    /// Page Store bucket
    #[serde(default = "default_import_page_key")]
    pub page_key: String,
    #[serde(default = "default_execution_budget_seconds")]
    pub execution_budget_seconds: u64,
    #[serde(default = "default_import_heartbeat_every_items")]
    pub heartbeat_every_items: u32,
    #[serde(default = "default_import_process_timeout_seconds")]
    pub process_timeout_seconds: u64,
    #[serde(default = "default_import_heartbeat_timeout_seconds")]
    pub heartbeat_timeout_seconds: u64,
    #[serde(default = "default_lock_ttl_seconds")]
    pub lock_ttl_seconds: u64,
    /// Consecutive failures before a SKU is quarantined
    #[serde(default = "default_import_max_item_attempts")]
    pub max_item_attempts: u32,
    /// Failed fetch phases tolerated before the job is failed
    #[serde(default = "default_max_fetch_failures")]
    pub max_fetch_failures: u32,
    /// Directory for downloaded thumbnails; downloads are skipped when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_dir: Option<PathBuf>,
}

/// Incremental and force/outdated re-sync settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct SyncConfig {
    #[serde(default = "default_sync_incremental_interval_seconds")]
    pub incremental_interval_seconds: u64,
    #[serde(default = "default_sync_incremental_window_seconds")]
    pub incremental_window_seconds: u64,
    #[serde(default = "default_sync_outdated_after_seconds")]
    pub outdated_after_seconds: u64,
    #[serde(default = "default_sync_outdated_interval_seconds")]
    pub outdated_interval_seconds: u64,
    #[serde(default = "default_sync_batch_size")]
    pub batch_size: u64,
    #[serde(default = "default_execution_budget_seconds")]
    pub execution_budget_seconds: u64,
    #[serde(default = "default_lock_ttl_seconds")]
    pub lock_ttl_seconds: u64,
    /// In-progress jobs whose heartbeat is older than this are treated as crashed
    #[serde(default = "default_sync_stale_job_seconds")]
    pub stale_job_seconds: u64,
    /// Failed incremental page fetches tolerated before the run is failed
    #[serde(default = "default_max_fetch_failures")]
    pub max_fetch_failures: u32,
}

/// Scheduler loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct SchedulerConfig {
    #[serde(default = "default_scheduler_tick_interval_seconds")]
    pub tick_interval_seconds: u64,
    #[serde(default = "default_scheduler_jitter_pct_max")]
    pub jitter_pct_max: f64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            database_url: default_database_url(),
            db_max_connections: default_db_max_connections(),
            db_acquire_timeout_ms: default_db_acquire_timeout_ms(),
            remote: RemoteApiConfig::default(),
            import: ImportConfig::default(),
            sync: SyncConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl Default for RemoteApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_remote_base_url(),
            api_token: None,
            origin: default_remote_origin(),
            request_timeout_seconds: default_remote_request_timeout_seconds(),
            page_limit: default_remote_page_limit(),
            fetch_retry: default_fetch_retry(),
            bulk_retry: default_bulk_retry(),
            currency: default_remote_currency(),
        }
    }
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            source: default_import_source(),
            page_key: default_import_page_key(),
            execution_budget_seconds: default_execution_budget_seconds(),
            heartbeat_every_items: default_import_heartbeat_every_items(),
            process_timeout_seconds: default_import_process_timeout_seconds(),
            heartbeat_timeout_seconds: default_import_heartbeat_timeout_seconds(),
            lock_ttl_seconds: default_lock_ttl_seconds(),
            max_item_attempts: default_import_max_item_attempts(),
            max_fetch_failures: default_max_fetch_failures(),
            media_dir: None,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            incremental_interval_seconds: default_sync_incremental_interval_seconds(),
            incremental_window_seconds: default_sync_incremental_window_seconds(),
            outdated_after_seconds: default_sync_outdated_after_seconds(),
            outdated_interval_seconds: default_sync_outdated_interval_seconds(),
            batch_size: default_sync_batch_size(),
            execution_budget_seconds: default_execution_budget_seconds(),
            lock_ttl_seconds: default_lock_ttl_seconds(),
            stale_job_seconds: default_sync_stale_job_seconds(),
            max_fetch_failures: default_max_fetch_failures(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_seconds: default_scheduler_tick_interval_seconds(),
            jitter_pct_max: default_scheduler_jitter_pct_max(),
        }
    }
}

impl AppConfig {
    /// Returns a redacted JSON representation (secrets are redacted).
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut config = self.clone();
        if config.remote.api_token.is_some() {
            config.remote.api_token = Some("[REDACTED]".to_string());
        }
        serde_json::to_string_pretty(&config)
    }

    /// Validates the configuration bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.log_format.as_str(), "json" | "pretty") {
            return Err(ConfigError::InvalidLogFormat {
                value: self.log_format.clone(),
            });
        }

        if self.database_url.trim().is_empty() {
            return Err(ConfigError::MissingDatabaseUrl);
        }

        // Outside local/test a token is mandatory; locally the client still
        // refuses to call out without one.
        if !matches!(self.profile.as_str(), "local" | "test")
            && self.remote.api_token.as_deref().is_none_or(str::is_empty)
        {
            return Err(ConfigError::MissingApiToken);
        }

        self.remote.validate()?;
        self.import.validate()?;
        self.sync.validate()?;
        self.scheduler.validate()?;

        Ok(())
    }
}

impl RemoteApiConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        url::Url::parse(&self.base_url).map_err(|source| ConfigError::InvalidBaseUrl {
            value: self.base_url.clone(),
            source,
        })?;

        if self.page_limit == 0 || self.page_limit > 500 {
            return Err(ConfigError::InvalidPageLimit {
                value: self.page_limit,
            });
        }

        for (name, retry) in [("fetch", self.fetch_retry), ("bulk", self.bulk_retry)] {
            if retry.max_attempts == 0 || retry.max_attempts > 20 {
                return Err(ConfigError::InvalidRetryAttempts {
                    policy: name.to_string(),
                    value: retry.max_attempts,
                });
            }
        }

        if !matches!(self.currency.as_str(), "rial" | "toman") {
            return Err(ConfigError::InvalidCurrency {
                value: self.currency.clone(),
            });
        }

        Ok(())
    }
}

impl ImportConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.execution_budget_seconds == 0 {
            return Err(ConfigError::InvalidExecutionBudget {
                value: self.execution_budget_seconds,
            });
        }

        // A live worker must always be able to heartbeat before the watchdog fires.
        if self.heartbeat_timeout_seconds <= self.execution_budget_seconds {
            return Err(ConfigError::InvalidHeartbeatTimeout {
                timeout: self.heartbeat_timeout_seconds,
                budget: self.execution_budget_seconds,
            });
        }

        if self.lock_ttl_seconds < self.execution_budget_seconds {
            return Err(ConfigError::InvalidLockTtl {
                ttl: self.lock_ttl_seconds,
                budget: self.execution_budget_seconds,
            });
        }

        if self.max_item_attempts == 0 {
            return Err(ConfigError::InvalidMaxItemAttempts);
        }

        Ok(())
    }
}

impl SyncConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.execution_budget_seconds == 0 {
            return Err(ConfigError::InvalidExecutionBudget {
                value: self.execution_budget_seconds,
            });
        }

        if self.lock_ttl_seconds < self.execution_budget_seconds {
            return Err(ConfigError::InvalidLockTtl {
                ttl: self.lock_ttl_seconds,
                budget: self.execution_budget_seconds,
            });
        }

        if self.batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize);
        }

        if self.incremental_window_seconds < self.incremental_interval_seconds {
            return Err(ConfigError::InvalidIncrementalWindow {
                window: self.incremental_window_seconds,
                interval: self.incremental_interval_seconds,
            });
        }

        Ok(())
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_seconds < 10 || self.tick_interval_seconds > 600 {
            return Err(ConfigError::InvalidSchedulerTickInterval {
                value: self.tick_interval_seconds,
            });
        }

        if !(0.0..=1.0).contains(&self.jitter_pct_max) {
            return Err(ConfigError::InvalidSchedulerJitter {
                value: self.jitter_pct_max,
            });
        }

        Ok(())
    }
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_database_url() -> String {
    "sqlite://catalog-sync.db?mode=rwc".to_string()
}

fn default_db_max_connections() -> u32 {
    5
}

fn default_db_acquire_timeout_ms() -> u64 {
    5000
}

fn default_remote_base_url() -> String {
    "https://api.anar360.com/wp".to_string()
}

fn default_remote_origin() -> String {
    "catalog-sync".to_string()
}

fn default_remote_request_timeout_seconds() -> u64 {
    300
}

fn default_remote_page_limit() -> u32 {
    30
}

fn default_fetch_retry() -> RetrySettings {
    RetrySettings {
        max_attempts: 3,
        delay_seconds: 2,
    }
}

fn default_bulk_retry() -> RetrySettings {
    RetrySettings {
        max_attempts: 5,
        delay_seconds: 5,
    }
}

fn default_remote_currency() -> String {
    "toman".to_string()
}

fn default_import_source() -> String {
    "anar_api".to_string()
}

fn default_import_page_key() -> String {
    "products".to_string()
}

fn default_execution_budget_seconds() -> u64 {
    240
}

fn default_import_heartbeat_every_items() -> u32 {
    5
}

fn default_import_process_timeout_seconds() -> u64 {
    300
}

fn default_import_heartbeat_timeout_seconds() -> u64 {
    420
}

fn default_lock_ttl_seconds() -> u64 {
    300
}

fn default_import_max_item_attempts() -> u32 {
    3
}

fn default_max_fetch_failures() -> u32 {
    5
}

fn default_sync_incremental_interval_seconds() -> u64 {
    600
}

fn default_sync_incremental_window_seconds() -> u64 {
    600
}

fn default_sync_outdated_after_seconds() -> u64 {
    86_400
}

fn default_sync_outdated_interval_seconds() -> u64 {
    3_600
}

fn default_sync_batch_size() -> u64 {
    20
}

fn default_sync_stale_job_seconds() -> u64 {
    480
}

fn default_scheduler_tick_interval_seconds() -> u64 {
    60
}

fn default_scheduler_jitter_pct_max() -> f64 {
    0.1
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("log format must be 'json' or 'pretty', got '{value}'")]
    InvalidLogFormat { value: String },
    #[error("database url is empty; set CATALOG_SYNC_DATABASE_URL")]
    MissingDatabaseUrl,
    #[error("supplier API token is missing; set CATALOG_SYNC_REMOTE_API_TOKEN")]
    MissingApiToken,
    #[error("invalid supplier base url '{value}': {source}")]
    InvalidBaseUrl {
        value: String,
        source: url::ParseError,
    },
    #[error("page limit must be between 1 and 500, got {value}")]
    InvalidPageLimit { value: u32 },
    #[error("{policy} retry attempts must be between 1 and 20, got {value}")]
    InvalidRetryAttempts { policy: String, value: u32 },
    #[error("currency must be 'rial' or 'toman', got '{value}'")]
    InvalidCurrency { value: String },
    #[error("execution budget must be positive, got {value}")]
    InvalidExecutionBudget { value: u64 },
    #[error("heartbeat timeout ({timeout}s) must exceed the execution budget ({budget}s)")]
    InvalidHeartbeatTimeout { timeout: u64, budget: u64 },
    #[error("lock ttl ({ttl}s) must be at least the execution budget ({budget}s)")]
    InvalidLockTtl { ttl: u64, budget: u64 },
    #[error("max item attempts must be at least 1")]
    InvalidMaxItemAttempts,
    #[error("sync batch size must be at least 1")]
    InvalidBatchSize,
    #[error(
        "incremental window ({window}s) must cover the incremental interval ({interval}s)"
    )]
    InvalidIncrementalWindow { window: u64, interval: u64 },
    #[error("scheduler tick interval must be between 10 and 600 seconds, got {value}")]
    InvalidSchedulerTickInterval { value: u64 },
    #[error("scheduler jitter must be between 0.0 and 1.0, got {value}")]
    InvalidSchedulerJitter { value: f64 },
}

/// Loads configuration using layered `.env` files and `CATALOG_SYNC_*` env vars.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Loads configuration from the layered files and the process environment.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        // Overlay process environment last so it wins.
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                layered.insert(stripped.to_string(), value);
            }
        }

        Self::from_layered(layered, profile_hint)
    }

    /// Builds and validates a config from already-collected, prefix-stripped keys.
    pub fn from_layered(
        mut layered: BTreeMap<String, String>,
        profile_hint: String,
    ) -> Result<AppConfig, ConfigError> {
        let defaults = AppConfig::default();

        let profile = take_string(&mut layered, "PROFILE").unwrap_or(profile_hint);
        let log_level = take_string(&mut layered, "LOG_LEVEL").unwrap_or(defaults.log_level);
        let log_format = take_string(&mut layered, "LOG_FORMAT").unwrap_or(defaults.log_format);
        let database_url =
            take_string(&mut layered, "DATABASE_URL").unwrap_or(defaults.database_url);
        let db_max_connections =
            take_parsed(&mut layered, "DB_MAX_CONNECTIONS").unwrap_or(defaults.db_max_connections);
        let db_acquire_timeout_ms = take_parsed(&mut layered, "DB_ACQUIRE_TIMEOUT_MS")
            .unwrap_or(defaults.db_acquire_timeout_ms);

        let remote_defaults = defaults.remote;
        let remote = RemoteApiConfig {
            base_url: take_string(&mut layered, "REMOTE_BASE_URL")
                .unwrap_or(remote_defaults.base_url),
            api_token: take_string(&mut layered, "REMOTE_API_TOKEN")
                .map(|token| token.trim().to_string()),
            origin: take_string(&mut layered, "REMOTE_ORIGIN").unwrap_or(remote_defaults.origin),
            request_timeout_seconds: take_parsed(&mut layered, "REMOTE_REQUEST_TIMEOUT_SECONDS")
                .unwrap_or(remote_defaults.request_timeout_seconds),
            page_limit: take_parsed(&mut layered, "REMOTE_PAGE_LIMIT")
                .unwrap_or(remote_defaults.page_limit),
            fetch_retry: RetrySettings {
                max_attempts: take_parsed(&mut layered, "REMOTE_FETCH_RETRY_MAX_ATTEMPTS")
                    .unwrap_or(remote_defaults.fetch_retry.max_attempts),
                delay_seconds: take_parsed(&mut layered, "REMOTE_FETCH_RETRY_DELAY_SECONDS")
                    .unwrap_or(remote_defaults.fetch_retry.delay_seconds),
            },
            bulk_retry: RetrySettings {
                max_attempts: take_parsed(&mut layered, "REMOTE_BULK_RETRY_MAX_ATTEMPTS")
                    .unwrap_or(remote_defaults.bulk_retry.max_attempts),
                delay_seconds: take_parsed(&mut layered, "REMOTE_BULK_RETRY_DELAY_SECONDS")
                    .unwrap_or(remote_defaults.bulk_retry.delay_seconds),
            },
            currency: take_string(&mut layered, "REMOTE_CURRENCY")
                .map(|value| value.to_lowercase())
                .unwrap_or(remote_defaults.currency),
        };

        let import_defaults = defaults.import;
        let import = ImportConfig {
            source: take_string(&mut layered, "IMPORT_SOURCE").unwrap_or(import_defaults.source),
            page_key: take_string(&mut layered, "IMPORT_PAGE_KEY")
                .unwrap_or(import_defaults.page_key),
            execution_budget_seconds: take_parsed(&mut layered, "IMPORT_EXECUTION_BUDGET_SECONDS")
                .unwrap_or(import_defaults.execution_budget_seconds),
            heartbeat_every_items: take_parsed(&mut layered, "IMPORT_HEARTBEAT_EVERY_ITEMS")
                .unwrap_or(import_defaults.heartbeat_every_items),
            process_timeout_seconds: take_parsed(&mut layered, "IMPORT_PROCESS_TIMEOUT_SECONDS")
                .unwrap_or(import_defaults.process_timeout_seconds),
            heartbeat_timeout_seconds: take_parsed(
                &mut layered,
                "IMPORT_HEARTBEAT_TIMEOUT_SECONDS",
            )
            .unwrap_or(import_defaults.heartbeat_timeout_seconds),
            lock_ttl_seconds: take_parsed(&mut layered, "IMPORT_LOCK_TTL_SECONDS")
                .unwrap_or(import_defaults.lock_ttl_seconds),
            max_item_attempts: take_parsed(&mut layered, "IMPORT_MAX_ITEM_ATTEMPTS")
                .unwrap_or(import_defaults.max_item_attempts),
            max_fetch_failures: take_parsed(&mut layered, "IMPORT_MAX_FETCH_FAILURES")
                .unwrap_or(import_defaults.max_fetch_failures),
            media_dir: take_string(&mut layered, "IMPORT_MEDIA_DIR").map(PathBuf::from),
        };

        let sync_defaults = defaults.sync;
        let sync = SyncConfig {
            incremental_interval_seconds: take_parsed(
                &mut layered,
                "SYNC_INCREMENTAL_INTERVAL_SECONDS",
            )
            .unwrap_or(sync_defaults.incremental_interval_seconds),
            incremental_window_seconds: take_parsed(
                &mut layered,
                "SYNC_INCREMENTAL_WINDOW_SECONDS",
            )
            .unwrap_or(sync_defaults.incremental_window_seconds),
            outdated_after_seconds: take_parsed(&mut layered, "SYNC_OUTDATED_AFTER_SECONDS")
                .unwrap_or(sync_defaults.outdated_after_seconds),
            outdated_interval_seconds: take_parsed(&mut layered, "SYNC_OUTDATED_INTERVAL_SECONDS")
                .unwrap_or(sync_defaults.outdated_interval_seconds),
            batch_size: take_parsed(&mut layered, "SYNC_BATCH_SIZE")
                .unwrap_or(sync_defaults.batch_size),
            execution_budget_seconds: take_parsed(&mut layered, "SYNC_EXECUTION_BUDGET_SECONDS")
                .unwrap_or(sync_defaults.execution_budget_seconds),
            lock_ttl_seconds: take_parsed(&mut layered, "SYNC_LOCK_TTL_SECONDS")
                .unwrap_or(sync_defaults.lock_ttl_seconds),
            stale_job_seconds: take_parsed(&mut layered, "SYNC_STALE_JOB_SECONDS")
                .unwrap_or(sync_defaults.stale_job_seconds),
            max_fetch_failures: take_parsed(&mut layered, "SYNC_MAX_FETCH_FAILURES")
                .unwrap_or(sync_defaults.max_fetch_failures),
        };

        let scheduler_defaults = defaults.scheduler;
        let scheduler = SchedulerConfig {
            tick_interval_seconds: take_parsed(&mut layered, "SCHEDULER_TICK_INTERVAL_SECONDS")
                .unwrap_or(scheduler_defaults.tick_interval_seconds),
            jitter_pct_max: take_parsed(&mut layered, "SCHEDULER_JITTER_PCT_MAX")
                .unwrap_or(scheduler_defaults.jitter_pct_max),
        };

        let config = AppConfig {
            profile,
            log_level,
            log_format,
            database_url,
            db_max_connections,
            db_acquire_timeout_ms,
            remote,
            import,
            sync,
            scheduler,
        };

        config.validate()?;
        Ok(config)
    }

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var(format!("{ENV_PREFIX}PROFILE"))
            .ok()
            .or_else(|| values.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}", &profile)),
            &mut values,
        )?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}.local", &profile)),
            &mut values,
        )?;

        Ok((values, profile))
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                        values.insert(stripped.to_string(), value);
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn take_string(layered: &mut BTreeMap<String, String>, key: &str) -> Option<String> {
    layered.remove(key).filter(|value| !value.trim().is_empty())
}

fn take_parsed<T: std::str::FromStr>(layered: &mut BTreeMap<String, String>, key: &str) -> Option<T> {
    layered.remove(key).and_then(|value| value.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layered(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn defaults_validate_for_local_profile() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.remote.fetch_retry.policy().max_attempts, 3);
        assert_eq!(config.remote.bulk_retry.policy().delay, Duration::from_secs(5));
        assert_eq!(config.import.max_item_attempts, 3);
    }

    #[test]
    fn production_profile_requires_token() {
        let result = ConfigLoader::from_layered(layered(&[]), "production".to_string());
        assert!(matches!(result, Err(ConfigError::MissingApiToken)));

        let config = ConfigLoader::from_layered(
            layered(&[("REMOTE_API_TOKEN", " secret ")]),
            "production".to_string(),
        )
        .expect("token satisfies validation");
        assert_eq!(config.remote.api_token.as_deref(), Some("secret"));
    }

    #[test]
    fn layered_values_override_defaults() {
        let config = ConfigLoader::from_layered(
            layered(&[
                ("REMOTE_PAGE_LIMIT", "50"),
                ("REMOTE_CURRENCY", "RIAL"),
                ("IMPORT_MAX_ITEM_ATTEMPTS", "5"),
                ("SYNC_BATCH_SIZE", "7"),
                ("IMPORT_MEDIA_DIR", "/tmp/thumbs"),
            ]),
            "test".to_string(),
        )
        .expect("valid config");

        assert_eq!(config.profile, "test");
        assert_eq!(config.remote.page_limit, 50);
        assert_eq!(config.remote.currency, "rial");
        assert_eq!(config.import.max_item_attempts, 5);
        assert_eq!(config.sync.batch_size, 7);
        assert_eq!(config.import.media_dir, Some(PathBuf::from("/tmp/thumbs")));
    }

    #[test]
    fn heartbeat_timeout_must_exceed_budget() {
        let import = ImportConfig {
            heartbeat_timeout_seconds: 100,
            execution_budget_seconds: 240,
            ..ImportConfig::default()
        };
        assert!(matches!(
            import.validate(),
            Err(ConfigError::InvalidHeartbeatTimeout { .. })
        ));
    }

    #[test]
    fn redacted_json_hides_token() {
        let mut config = AppConfig::default();
        config.remote.api_token = Some("super-secret".to_string());
        let json = config.redacted_json().expect("serializes");
        assert!(!json.contains("super-secret"));
        assert!(json.contains("[REDACTED]"));
    }
}
