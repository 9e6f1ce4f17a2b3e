//! Test utilities shared by the integration suites.
//!
//! Provides an in-memory SQLite database with migrations applied, a scripted
//! in-process supplier API and builders for supplier payloads.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use catalog_sync::app::AppContext;
use catalog_sync::config::AppConfig;
use catalog_sync::jobs;
use catalog_sync::remote::{CatalogApi, RemoteError, RemotePage};
use chrono::{DateTime, Utc};
use migration::{Migrator, MigratorTrait};
use sea_orm::{Database, DatabaseConnection};
use serde_json::{Value as JsonValue, json};
use uuid::Uuid;

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;
    Ok(db)
}

/// Configuration used by the suites: small pages, rial prices.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig {
        database_url: "sqlite::memory:".to_string(),
        ..AppConfig::default()
    };
    config.remote.page_limit = 2;
    config.remote.currency = "rial".to_string();
    config
}

/// Build an [`AppContext`] over a fresh database and the given fake API.
pub async fn test_app(api: Arc<FakeCatalogApi>) -> Result<AppContext> {
    test_app_with(api, |_| {}).await
}

pub async fn test_app_with(
    api: Arc<FakeCatalogApi>,
    configure: impl FnOnce(&mut AppConfig),
) -> Result<AppContext> {
    let db = setup_test_db().await?;
    let mut config = test_config();
    configure(&mut config);
    Ok(AppContext::new(config, db, api))
}

/// Operator action the fake API performs while a page request is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobControl {
    Pause,
    Cancel,
}

struct ScheduledControl {
    page: u32,
    db: DatabaseConnection,
    job_id: Uuid,
    control: JobControl,
}

/// Scripted supplier API.
///
/// `catalog` backs the full listing and `fetch_one`; `changed` backs listings
/// filtered by `since`. Failures can be injected per page or globally.
#[derive(Default)]
pub struct FakeCatalogApi {
    catalog: Mutex<Vec<JsonValue>>,
    changed: Mutex<Vec<JsonValue>>,
    failing_pages: Mutex<HashSet<u32>>,
    reject_auth: AtomicBool,
    fail_fetch_one: Mutex<HashSet<String>>,
    page_requests: Mutex<Vec<(u32, Option<DateTime<Utc>>)>>,
    fetch_one_requests: Mutex<Vec<String>>,
    sync_notifications: AtomicUsize,
    last_order: Mutex<Option<JsonValue>>,
    scheduled_control: Mutex<Option<ScheduledControl>>,
}

impl FakeCatalogApi {
    pub fn with_catalog(items: Vec<JsonValue>) -> Arc<Self> {
        let api = Self::default();
        api.set_catalog(items);
        Arc::new(api)
    }

    pub fn set_catalog(&self, items: Vec<JsonValue>) {
        *self.catalog.lock().unwrap() = items;
    }

    pub fn set_changed(&self, items: Vec<JsonValue>) {
        *self.changed.lock().unwrap() = items;
    }

    pub fn fail_page(&self, page: u32) {
        self.failing_pages.lock().unwrap().insert(page);
    }

    pub fn heal_pages(&self) {
        self.failing_pages.lock().unwrap().clear();
    }

    pub fn reject_auth(&self, reject: bool) {
        self.reject_auth.store(reject, Ordering::SeqCst);
    }

    pub fn fail_fetch_one(&self, sku: &str) {
        self.fail_fetch_one.lock().unwrap().insert(sku.to_string());
    }

    /// Pause or cancel `job_id` when `page` is requested, as an operator
    /// acting mid-tick would.
    pub fn control_job_on_page(
        &self,
        page: u32,
        db: &DatabaseConnection,
        job_id: Uuid,
        control: JobControl,
    ) {
        *self.scheduled_control.lock().unwrap() = Some(ScheduledControl {
            page,
            db: db.clone(),
            job_id,
            control,
        });
    }

    async fn run_scheduled_control(&self, page: u32) {
        let due = {
            let mut slot = self.scheduled_control.lock().unwrap();
            if slot.as_ref().is_some_and(|scheduled| scheduled.page == page) {
                slot.take()
            } else {
                None
            }
        };
        let Some(scheduled) = due else {
            return;
        };
        match scheduled.control {
            JobControl::Pause => jobs::pause_job(&scheduled.db, scheduled.job_id).await,
            JobControl::Cancel => jobs::cancel_job(&scheduled.db, scheduled.job_id).await,
        }
        .expect("scheduled job control applies");
    }

    pub fn page_requests(&self) -> Vec<(u32, Option<DateTime<Utc>>)> {
        self.page_requests.lock().unwrap().clone()
    }

    pub fn fetch_one_requests(&self) -> Vec<String> {
        self.fetch_one_requests.lock().unwrap().clone()
    }

    pub fn sync_notifications(&self) -> usize {
        self.sync_notifications.load(Ordering::SeqCst)
    }

    fn check_auth(&self) -> Result<(), RemoteError> {
        if self.reject_auth.load(Ordering::SeqCst) {
            return Err(RemoteError::Forbidden {
                body: Some("invalid token".to_string()),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl CatalogApi for FakeCatalogApi {
    async fn fetch_page(
        &self,
        _resource: &str,
        page: u32,
        limit: u32,
        since: Option<DateTime<Utc>>,
    ) -> Result<RemotePage, RemoteError> {
        self.page_requests.lock().unwrap().push((page, since));
        self.run_scheduled_control(page).await;
        self.check_auth()?;

        if self.failing_pages.lock().unwrap().contains(&page) {
            return Err(RemoteError::Status {
                status: 502,
                body: Some("bad gateway".to_string()),
            });
        }

        let source = if since.is_some() {
            self.changed.lock().unwrap().clone()
        } else {
            self.catalog.lock().unwrap().clone()
        };

        let start = ((page.max(1) - 1) * limit) as usize;
        let items = source
            .iter()
            .skip(start)
            .take(limit as usize)
            .cloned()
            .collect();

        Ok(RemotePage {
            page,
            limit,
            total: source.len() as u64,
            items,
        })
    }

    async fn fetch_one(&self, sku: &str) -> Result<JsonValue, RemoteError> {
        self.fetch_one_requests.lock().unwrap().push(sku.to_string());
        self.check_auth()?;

        if self.fail_fetch_one.lock().unwrap().contains(sku) {
            return Err(RemoteError::Transport("connection reset".to_string()));
        }

        self.catalog
            .lock()
            .unwrap()
            .iter()
            .find(|item| item["id"] == json!(sku))
            .cloned()
            .ok_or_else(|| RemoteError::NotFound {
                resource: sku.to_string(),
            })
    }

    async fn submit_order(&self, payload: &JsonValue) -> Result<JsonValue, RemoteError> {
        self.check_auth()?;
        *self.last_order.lock().unwrap() = Some(payload.clone());
        Ok(json!({"success": true}))
    }

    async fn prepare_order(&self, payload: &JsonValue) -> Result<JsonValue, RemoteError> {
        self.check_auth()?;
        Ok(json!({"success": true, "echo": payload}))
    }

    async fn notify_sync_complete(&self) -> Result<(), RemoteError> {
        self.check_auth()?;
        self.sync_notifications.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn download_image(&self, _url: &str) -> Result<Vec<u8>, RemoteError> {
        Ok(vec![0x89, 0x50, 0x4e, 0x47])
    }
}

fn shipping() -> JsonValue {
    json!([{"type": "post", "cost": 0}])
}

/// A sellable simple product. Prices are in rial.
pub fn simple_product(sku: &str, price: i64, stock: i64) -> JsonValue {
    json!({
        "id": sku,
        "title": format!("Product {sku}"),
        "variants": [{"_id": format!("{sku}-v1"), "price": price, "stock": stock}],
        "shipments": shipping(),
        "shipmentsReferenceId": "ref-1",
    })
}

/// A variable product with one `color` attribute; each variant is
/// `(variant_id, price, stock)`.
pub fn variable_product(sku: &str, variants: &[(&str, i64, i64)]) -> JsonValue {
    let values: Vec<String> = variants.iter().map(|(id, _, _)| format!("color-{id}")).collect();
    let variants: Vec<JsonValue> = variants
        .iter()
        .map(|(id, price, stock)| {
            json!({
                "_id": id,
                "price": price,
                "stock": stock,
                "attributes": {"color": format!("color-{id}")},
            })
        })
        .collect();

    json!({
        "id": sku,
        "title": format!("Product {sku}"),
        "attributes": [{"key": "color", "name": "Color", "values": values}],
        "variants": variants,
        "shipments": shipping(),
        "shipmentsReferenceId": "ref-1",
    })
}

/// A record with a SKU that fails validation (no variants).
pub fn broken_product(sku: &str) -> JsonValue {
    json!({"id": sku, "title": format!("Broken {sku}")})
}

pub fn skus(prefix: &str, count: usize) -> Vec<String> {
    (1..=count).map(|i| format!("{prefix}-{i}")).collect()
}

