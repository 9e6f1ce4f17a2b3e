#[path = "test_utils/mod.rs"]
mod test_utils;

use std::sync::Arc;

use catalog_sync::app::AppContext;
use catalog_sync::config::AppConfig;
use catalog_sync::import::ImportTickOutcome;
use catalog_sync::jobs;
use catalog_sync::locks::{FORCE_SYNC_LOCK, IMPORT_LOCK, INCREMENTAL_SYNC_LOCK, LockService};
use catalog_sync::models::job::JobStatus;
use catalog_sync::notices::NoticeKind;
use catalog_sync::repositories::{JobRepository, ProductRepository};
use catalog_sync::sync::{SyncMode, SyncTickOutcome};
use chrono::{Duration, Utc};
use test_utils::{FakeCatalogApi, simple_product, skus, test_app_with};

fn catalog(count: usize) -> Vec<serde_json::Value> {
    skus("SKU", count)
        .iter()
        .map(|sku| simple_product(sku, 10_000, 3))
        .collect()
}

/// App with `count` products already imported.
async fn imported_app(
    count: usize,
    configure: impl FnOnce(&mut AppConfig),
) -> (Arc<FakeCatalogApi>, AppContext) {
    let api = FakeCatalogApi::with_catalog(catalog(count));
    let app = test_app_with(api.clone(), configure).await.unwrap();
    app.import.start_import().await.unwrap();
    let outcome = app.import.run_import_tick().await.unwrap();
    assert!(matches!(outcome, ImportTickOutcome::Completed { .. }));
    (api, app)
}

#[tokio::test]
async fn incremental_sync_applies_changed_records_since_the_window() {
    let (api, app) = imported_app(3, |_| {}).await;
    api.set_changed(vec![
        simple_product("SKU-1", 20_000, 1),
        simple_product("NEW-1", 5_000, 9),
    ]);

    let before = Utc::now();
    let outcome = app.sync.run_incremental_tick().await.unwrap();
    let SyncTickOutcome::Completed { job_id, counters, .. } = outcome else {
        panic!("expected completion, got {outcome:?}");
    };
    assert_eq!(counters.processed, 2);
    assert_eq!(counters.created, 1);
    assert_eq!(counters.existing, 1);

    let (_, since) = api.page_requests().last().cloned().unwrap();
    let since = since.expect("incremental listing carries a since bound");
    let window = Duration::seconds(app.config.sync.incremental_window_seconds as i64);
    assert!(since <= before - window + Duration::seconds(1));

    let updated = ProductRepository::find_by_sku(&app.db, "SKU-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.price, Some(20_000));
    assert_eq!(ProductRepository::count(&app.db).await.unwrap(), 4);

    let job = JobRepository::get(&app.db, job_id).await.unwrap();
    assert_eq!(job.source, SyncMode::Incremental.source());
    assert_eq!(job.job_status(), Some(JobStatus::Completed));
}

#[tokio::test]
async fn incremental_sync_waits_for_a_running_import() {
    let api = FakeCatalogApi::with_catalog(catalog(2));
    let app = test_app_with(api.clone(), |_| {}).await.unwrap();
    app.import.start_import().await.unwrap().unwrap();

    assert_eq!(
        app.sync.run_incremental_tick().await.unwrap(),
        SyncTickOutcome::Locked
    );
    assert!(api.page_requests().is_empty());
    assert!(
        app.sync
            .active_job(SyncMode::Incremental)
            .await
            .unwrap()
            .is_none()
    );
    assert!(!app.locks.is_held(&app.db, INCREMENTAL_SYNC_LOCK).await.unwrap());

    // An import worker holding its lock blocks the sync the same way.
    let importer = LockService::new("importer:3");
    importer
        .try_acquire(&app.db, IMPORT_LOCK, Duration::seconds(300))
        .await
        .unwrap();
    assert_eq!(
        app.sync.run_incremental_tick().await.unwrap(),
        SyncTickOutcome::Locked
    );
    assert!(!app.locks.is_held(&app.db, INCREMENTAL_SYNC_LOCK).await.unwrap());
}

#[tokio::test]
async fn incremental_sync_resumes_mid_page_after_budget() {
    let (api, app) = imported_app(1, |config| {
        config.sync.execution_budget_seconds = 0;
    })
    .await;
    api.set_changed(vec![
        simple_product("CH-1", 1_000, 1),
        simple_product("CH-2", 1_000, 1),
        simple_product("CH-3", 1_000, 1),
    ]);

    let first = app.sync.run_incremental_tick().await.unwrap();
    let SyncTickOutcome::Suspended { checkpoint, .. } = first else {
        panic!("expected suspension, got {first:?}");
    };
    assert_eq!((checkpoint.page, checkpoint.item_index), (1, 1));

    let second = app.sync.run_incremental_tick().await.unwrap();
    let SyncTickOutcome::Suspended { checkpoint, .. } = second else {
        panic!("expected suspension, got {second:?}");
    };
    assert_eq!((checkpoint.page, checkpoint.item_index), (2, 0));

    let third = app.sync.run_incremental_tick().await.unwrap();
    let SyncTickOutcome::Completed { counters, .. } = third else {
        panic!("expected completion, got {third:?}");
    };
    assert_eq!(counters.processed, 3);
    assert_eq!(counters.created, 3);
}

#[tokio::test]
async fn paused_incremental_sync_holds_until_resumed() {
    let (api, app) = imported_app(1, |config| {
        config.sync.execution_budget_seconds = 0;
    })
    .await;
    api.set_changed(vec![
        simple_product("CH-1", 1_000, 1),
        simple_product("CH-2", 1_000, 1),
    ]);

    let SyncTickOutcome::Suspended { job_id, .. } = app.sync.run_incremental_tick().await.unwrap()
    else {
        panic!("expected suspension");
    };

    jobs::pause_job(&app.db, job_id).await.unwrap();
    assert_eq!(
        app.sync.run_incremental_tick().await.unwrap(),
        SyncTickOutcome::Paused { job_id }
    );

    jobs::resume_job(&app.db, job_id).await.unwrap();
    assert!(matches!(
        app.sync.run_incremental_tick().await.unwrap(),
        SyncTickOutcome::Completed { .. }
    ));
}

#[tokio::test]
async fn incremental_auth_failure_posts_a_notice() {
    let (api, app) = imported_app(1, |_| {}).await;
    api.reject_auth(true);

    let outcome = app.sync.run_incremental_tick().await.unwrap();
    assert!(matches!(outcome, SyncTickOutcome::AuthAborted { .. }));
    assert!(
        app.notices
            .list(&app.db)
            .await
            .unwrap()
            .iter()
            .any(|n| n.kind == NoticeKind::AuthFailure)
    );
}

#[tokio::test]
async fn force_sync_refreshes_products_and_deprecates_unknown_skus() {
    let (api, app) = imported_app(3, |_| {}).await;
    api.set_catalog(vec![
        simple_product("SKU-1", 11_000, 2),
        simple_product("SKU-2", 10_000, 3),
    ]);

    assert_eq!(
        app.sync.run_force_sync_tick().await.unwrap(),
        SyncTickOutcome::Idle
    );

    let job = app.sync.start_force_sync().await.unwrap().expect("force sync starts");
    assert_eq!(job.total_products, 3);
    assert!(app.sync.start_force_sync().await.unwrap().is_none());

    let outcome = app.sync.run_force_sync_tick().await.unwrap();
    let SyncTickOutcome::Completed {
        counters,
        deprecated,
        ..
    } = outcome
    else {
        panic!("expected completion, got {outcome:?}");
    };
    assert_eq!(counters.processed, 3);
    assert_eq!(counters.failed, 0);
    assert_eq!(deprecated, 1);

    let mut fetched = api.fetch_one_requests();
    fetched.sort();
    assert_eq!(fetched, vec!["SKU-1", "SKU-2", "SKU-3"]);

    assert_eq!(
        ProductRepository::find_by_sku(&app.db, "SKU-1")
            .await
            .unwrap()
            .unwrap()
            .price,
        Some(11_000)
    );
    let retired = ProductRepository::find_by_backup_sku(&app.db, "SKU-3")
        .await
        .unwrap()
        .unwrap();
    assert!(retired.deprecated);
    assert_eq!(retired.deprecated_by.as_deref(), Some("sync"));
    assert!(
        app.notices
            .list(&app.db)
            .await
            .unwrap()
            .iter()
            .any(|n| n.kind == NoticeKind::DeprecatedProducts)
    );
}

#[tokio::test]
async fn force_sync_counts_transport_failures_and_moves_on() {
    let (api, app) = imported_app(2, |_| {}).await;
    api.fail_fetch_one("SKU-1");

    app.sync.start_force_sync().await.unwrap().unwrap();
    let outcome = app.sync.run_force_sync_tick().await.unwrap();
    let SyncTickOutcome::Completed { counters, .. } = outcome else {
        panic!("expected completion, got {outcome:?}");
    };
    assert_eq!(counters.processed, 2);
    assert_eq!(counters.failed, 1);
    assert!(app.quarantine.list(&app.db).await.unwrap().is_empty());
}

#[tokio::test]
async fn outdated_sync_only_starts_when_products_are_stale() {
    let (_, app) = imported_app(2, |_| {}).await;
    assert_eq!(
        app.sync.run_outdated_sync_tick().await.unwrap(),
        SyncTickOutcome::Idle
    );

    let (api, app) = imported_app(2, |config| {
        config.sync.outdated_after_seconds = 0;
    })
    .await;
    let outcome = app.sync.run_outdated_sync_tick().await.unwrap();
    let SyncTickOutcome::Completed { job_id, counters, .. } = outcome else {
        panic!("expected completion, got {outcome:?}");
    };
    assert_eq!(counters.processed, 2);
    assert_eq!(api.fetch_one_requests().len(), 2);

    let job = JobRepository::get(&app.db, job_id).await.unwrap();
    assert_eq!(job.source, SyncMode::Outdated.source());
}

#[tokio::test]
async fn force_and_outdated_runs_share_a_lock() {
    let (api, app) = imported_app(2, |config| {
        config.sync.outdated_after_seconds = 0;
    })
    .await;
    let other = LockService::new("other:7");
    other
        .try_acquire(&app.db, FORCE_SYNC_LOCK, Duration::seconds(300))
        .await
        .unwrap();

    assert_eq!(
        app.sync.run_outdated_sync_tick().await.unwrap(),
        SyncTickOutcome::Locked
    );
    assert_eq!(
        app.sync.run_force_sync_tick().await.unwrap(),
        SyncTickOutcome::Locked
    );
    assert!(api.fetch_one_requests().is_empty());
}

#[tokio::test]
async fn schedule_due_checks_follow_the_last_run() {
    let (_, app) = imported_app(1, |_| {}).await;
    let now = Utc::now();

    assert!(app.sync.is_due(SyncMode::Incremental, now).await.unwrap());
    assert!(!app.sync.is_due(SyncMode::Force, now).await.unwrap());

    app.sync.run_incremental_tick().await.unwrap();
    assert!(!app.sync.is_due(SyncMode::Incremental, Utc::now()).await.unwrap());
    let later = Utc::now()
        + Duration::seconds(app.config.sync.incremental_interval_seconds as i64 + 1);
    assert!(app.sync.is_due(SyncMode::Incremental, later).await.unwrap());

    app.sync.start_force_sync().await.unwrap().unwrap();
    assert!(app.sync.is_due(SyncMode::Force, Utc::now()).await.unwrap());
}
