#[path = "test_utils/mod.rs"]
mod test_utils;

use catalog_sync::mapper::MapperOptions;
use catalog_sync::media::ThumbnailStore;
use catalog_sync::models::job::ItemOutcome;
use catalog_sync::pipeline::{ItemApplier, ItemContext};
use catalog_sync::quarantine::FailureQuarantine;
use catalog_sync::repositories::ProductRepository;
use tempfile::TempDir;
use test_utils::{FakeCatalogApi, broken_product, setup_test_db, simple_product};
use uuid::Uuid;

fn applier(api: std::sync::Arc<FakeCatalogApi>, thumbnails: ThumbnailStore) -> ItemApplier {
    ItemApplier::new(
        api,
        MapperOptions::default(),
        FailureQuarantine::new(3),
        thumbnails,
    )
}

fn context() -> ItemContext {
    ItemContext {
        job_id: Uuid::new_v4(),
        page: Some(1),
    }
}

#[tokio::test]
async fn repeated_failures_quarantine_the_sku() {
    let db = setup_test_db().await.unwrap();
    let api = FakeCatalogApi::with_catalog(vec![]);
    let applier = applier(api, ThumbnailStore::default());
    let quarantine = FailureQuarantine::new(3);

    for attempt in 1..=3 {
        let outcome = applier
            .apply(&db, &broken_product("BAD-1"), context())
            .await
            .unwrap();
        assert_eq!(outcome, ItemOutcome::Failed);
        let record = quarantine.get(&db, "BAD-1").await.unwrap().unwrap();
        assert_eq!(record.attempts, attempt);
    }
    assert!(quarantine.is_quarantined(&db, "BAD-1").await.unwrap());

    // Once quarantined even a valid payload is skipped and no attempt is added.
    let outcome = applier
        .apply(&db, &simple_product("BAD-1", 1_000, 1), context())
        .await
        .unwrap();
    assert_eq!(outcome, ItemOutcome::Failed);
    assert_eq!(quarantine.get(&db, "BAD-1").await.unwrap().unwrap().attempts, 3);
    assert!(ProductRepository::find_by_sku(&db, "BAD-1").await.unwrap().is_none());

    assert!(quarantine.clear(&db, "BAD-1").await.unwrap());
    let outcome = applier
        .apply(&db, &simple_product("BAD-1", 1_000, 1), context())
        .await
        .unwrap();
    assert_eq!(outcome, ItemOutcome::Created);
}

#[tokio::test]
async fn success_below_threshold_resets_attempts() {
    let db = setup_test_db().await.unwrap();
    let applier = applier(FakeCatalogApi::with_catalog(vec![]), ThumbnailStore::default());
    let quarantine = FailureQuarantine::new(3);

    for _ in 0..2 {
        applier
            .apply(&db, &broken_product("FLAKY-1"), context())
            .await
            .unwrap();
    }
    assert_eq!(quarantine.get(&db, "FLAKY-1").await.unwrap().unwrap().attempts, 2);

    let outcome = applier
        .apply(&db, &simple_product("FLAKY-1", 3_000, 2), context())
        .await
        .unwrap();
    assert_eq!(outcome, ItemOutcome::Created);
    assert!(quarantine.get(&db, "FLAKY-1").await.unwrap().is_none());

    let outcome = applier
        .apply(&db, &simple_product("FLAKY-1", 3_100, 2), context())
        .await
        .unwrap();
    assert_eq!(outcome, ItemOutcome::Existing);
}

#[tokio::test]
async fn record_without_sku_fails_without_quarantine_entry() {
    let db = setup_test_db().await.unwrap();
    let applier = applier(FakeCatalogApi::with_catalog(vec![]), ThumbnailStore::default());

    let outcome = applier
        .apply(&db, &serde_json::json!({"title": "nameless"}), context())
        .await
        .unwrap();
    assert_eq!(outcome, ItemOutcome::Failed);
    assert!(FailureQuarantine::new(3).list(&db).await.unwrap().is_empty());
}

#[tokio::test]
async fn thumbnail_is_downloaded_once_per_url() {
    let db = setup_test_db().await.unwrap();
    let media = TempDir::new().unwrap();
    let store = ThumbnailStore::new(Some(media.path().to_path_buf()));
    let applier = applier(FakeCatalogApi::with_catalog(vec![]), store.clone());

    let mut payload = simple_product("IMG-1", 1_000, 1);
    payload["mainImage"] = serde_json::json!("https://cdn.example.com/img/1.png");

    applier.apply(&db, &payload, context()).await.unwrap();

    let product = ProductRepository::find_by_sku(&db, "IMG-1")
        .await
        .unwrap()
        .expect("product stored");
    let expected = store
        .path_for("https://cdn.example.com/img/1.png")
        .unwrap();
    assert_eq!(
        product.thumbnail_path.as_deref(),
        Some(expected.to_string_lossy().as_ref())
    );
    assert!(expected.exists());
}
