//! Tracing setup and run-scoped correlation.
//!
//! Every scheduler tick and CLI command runs inside a [`RunContext`]; its id
//! is attached to a `run` span so all records of one slice of work can be
//! grouped, including the SQL statements sqlx reports through `log`.

use std::sync::OnceLock;

use log::LevelFilter;
use thiserror::Error;
use tokio::task_local;
use tracing::Instrument;
use tracing_log::LogTracer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::{SubscriberInitExt, TryInitError},
};
use uuid::Uuid;

use crate::config::AppConfig;

/// Correlation data for one scheduler tick or CLI invocation.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: String,
    pub trigger: &'static str,
}

impl RunContext {
    pub fn new(trigger: &'static str) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            trigger,
        }
    }
}

task_local! {
    static ACTIVE_RUN: RunContext;
}

#[derive(Debug, Error)]
pub enum TelemetryInitError {
    #[error("invalid log filter '{directive}': {source}")]
    Filter {
        directive: String,
        source: tracing_subscriber::filter::ParseError,
    },
    #[error("failed to install tracing subscriber: {0}")]
    Subscriber(#[from] TryInitError),
}

static INSTALLED: OnceLock<()> = OnceLock::new();

/// Install the global subscriber. Calling it again is a no-op.
///
/// `RUST_LOG` wins over the configured level when set.
pub fn init_tracing(config: &AppConfig) -> Result<(), TelemetryInitError> {
    if INSTALLED.get().is_some() {
        return Ok(());
    }

    // sqlx logs through the `log` facade; a second bridge install just fails.
    let _ = LogTracer::builder()
        .with_max_level(LevelFilter::Debug)
        .init();

    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.log_level).map_err(|source| {
            TelemetryInitError::Filter {
                directive: config.log_level.clone(),
                source,
            }
        })?,
    };

    let fmt_layer = match config.log_format.as_str() {
        "pretty" => fmt::layer().pretty().boxed(),
        _ => fmt::layer().json().with_current_span(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;

    let _ = INSTALLED.set(());
    Ok(())
}

/// Run `future` inside `context`: task-local for lookups, plus a `run` span.
pub async fn with_run_context<Fut, R>(context: RunContext, future: Fut) -> R
where
    Fut: std::future::Future<Output = R>,
{
    let span = tracing::info_span!("run", run_id = %context.run_id, trigger = context.trigger);
    ACTIVE_RUN.scope(context, future.instrument(span)).await
}

/// The run id of the enclosing tick, if any.
pub fn current_run_id() -> Option<String> {
    ACTIVE_RUN.try_with(|ctx| ctx.run_id.clone()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_id_is_scoped_to_the_future() {
        assert!(current_run_id().is_none());

        let context = RunContext::new("test");
        let expected = context.run_id.clone();
        let seen = with_run_context(context, async { current_run_id() }).await;

        assert_eq!(seen, Some(expected));
        assert!(current_run_id().is_none());
    }

    #[test]
    fn bad_level_directive_is_reported() {
        let config = AppConfig {
            log_level: "catalog_sync=loud".to_string(),
            ..AppConfig::default()
        };
        // Only meaningful when RUST_LOG does not override the level.
        if std::env::var("RUST_LOG").is_err() {
            assert!(matches!(
                init_tracing(&config),
                Err(TelemetryInitError::Filter { .. })
            ));
        }
    }
}
