//! Database pool setup.
//!
//! Opens the SeaORM pool the stores share and, when asked, brings the schema
//! up to date.

use std::time::Duration;

use anyhow::{Context, Result};
use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Statement};
use tokio::time::sleep;

use crate::config::AppConfig;

const CONNECT_ATTEMPTS: u32 = 5;
const FIRST_CONNECT_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("database url is empty")]
    MissingUrl,
    #[error("could not connect after {attempts} attempts: {source}")]
    Unreachable {
        attempts: u32,
        source: sea_orm::DbErr,
    },
}

fn connect_options(cfg: &AppConfig) -> ConnectOptions {
    let mut opt = ConnectOptions::new(&cfg.database_url);
    opt.max_connections(cfg.db_max_connections)
        .acquire_timeout(Duration::from_millis(cfg.db_acquire_timeout_ms))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .sqlx_logging(true)
        .sqlx_logging_level(log::LevelFilter::Debug);
    opt
}

/// Open the pool, retrying with a doubling delay while the database comes up.
pub async fn init_pool(cfg: &AppConfig) -> Result<DatabaseConnection> {
    if cfg.database_url.trim().is_empty() {
        return Err(DatabaseError::MissingUrl.into());
    }

    let options = connect_options(cfg);
    let mut delay = FIRST_CONNECT_DELAY;
    let mut attempt = 1;

    loop {
        match Database::connect(options.clone()).await {
            Ok(conn) => {
                tracing::info!(attempt, "Connected to database");
                return Ok(conn);
            }
            Err(source) if attempt >= CONNECT_ATTEMPTS => {
                tracing::error!(attempts = attempt, error = %source, "Giving up on database");
                return Err(DatabaseError::Unreachable {
                    attempts: attempt,
                    source,
                }
                .into());
            }
            Err(err) => {
                tracing::warn!(
                    attempt,
                    error = %err,
                    retry_in_ms = delay.as_millis() as u64,
                    "Database not reachable yet"
                );
                sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
        }
    }
}

/// Apply pending migrations.
pub async fn migrate(db: &DatabaseConnection) -> Result<()> {
    Migrator::up(db, None)
        .await
        .context("Failed to apply database migrations")
}

/// `SELECT 1` round trip.
pub async fn health_check(db: &DatabaseConnection) -> Result<()> {
    let stmt = Statement::from_string(db.get_database_backend(), "SELECT 1".to_string());
    db.query_one(stmt)
        .await
        .context("Database health check failed")?;
    Ok(())
}
