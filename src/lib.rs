//! # Catalog Sync Library
//!
//! Keeps a local merchant catalog in step with a supplier API: resumable bulk
//! imports through a staged page store, incremental and force re-syncs,
//! job tracking with operator controls, and the locks, quarantine and
//! watchdog that keep long runs safe.

pub mod app;
pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod import;
pub mod jobs;
pub mod locks;
pub mod mapper;
pub mod media;
pub mod models;
pub mod notices;
pub mod pipeline;
pub mod quarantine;
pub mod remote;
pub mod repositories;
pub mod scheduler;
pub mod sync;
pub mod telemetry;
pub use migration;
