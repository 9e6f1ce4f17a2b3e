//! # Error Handling
//!
//! Crate-level error taxonomy for the import and sync pipelines. Item-level
//! failures are caught inside the orchestrator loops; only run-level
//! conditions (auth, fetch-phase transport failures, database outages)
//! propagate out of a tick.

use thiserror::Error;
use uuid::Uuid;

use crate::mapper::MappingError;
use crate::remote::RemoteError;

/// Errors surfaced by stores, the upsert engine and the orchestrators.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Missing or rejected credentials; never retried
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Network, timeout or unexpected status after retries were exhausted
    #[error("transport error: {0}")]
    Transport(String),

    /// The supplier no longer knows this SKU
    #[error("remote product {sku} not found")]
    NotFound { sku: String },

    #[error(transparent)]
    Mapping(#[from] MappingError),

    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("job {0} not found")]
    JobNotFound(Uuid),

    #[error("job {job_id} cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: Uuid,
        from: String,
        to: String,
    },

    #[error("product {0} not found")]
    ProductNotFound(Uuid),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SyncError {
    /// Auth failures abort the whole tick rather than a single item.
    pub fn is_auth(&self) -> bool {
        matches!(self, SyncError::Auth(_))
    }
}

impl From<RemoteError> for SyncError {
    fn from(error: RemoteError) -> Self {
        match error {
            RemoteError::MissingToken => SyncError::Auth("no API token configured".to_string()),
            RemoteError::Forbidden { body } => SyncError::Auth(format!(
                "supplier rejected credentials: {}",
                body.unwrap_or_default()
            )),
            RemoteError::NotFound { resource } => SyncError::NotFound { sku: resource },
            other => SyncError::Transport(other.to_string()),
        }
    }
}

/// Log a database failure with its context and wrap it.
pub(crate) fn map_db_err(context: &'static str, err: sea_orm::DbErr) -> SyncError {
    tracing::error!(error = %err, "{context}");
    SyncError::Database(err)
}

/// Detects unique-constraint violations across the supported backends.
pub fn is_unique_violation(error: &sea_orm::DbErr) -> bool {
    use sea_orm::RuntimeErr;

    const PG_UNIQUE: &str = "23505";
    const SQLITE_DUPLICATE_CODES: &[&str] = &["1555", "2067"];

    let runtime_err = match error {
        sea_orm::DbErr::Query(RuntimeErr::SqlxError(sqlx_err))
        | sea_orm::DbErr::Exec(RuntimeErr::SqlxError(sqlx_err)) => sqlx_err,
        _ => return false,
    };

    let Some(db_error) = runtime_err.as_database_error() else {
        return false;
    };

    if db_error.is_unique_violation() {
        return true;
    }

    if let Some(code) = db_error.code() {
        let code_str = code.as_ref();
        if code_str == PG_UNIQUE || SQLITE_DUPLICATE_CODES.contains(&code_str) {
            return true;
        }
    }

    false
}
