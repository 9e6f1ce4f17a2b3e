#[path = "test_utils/mod.rs"]
mod test_utils;

use catalog_sync::catalog::{UpsertEngine, actor};
use catalog_sync::mapper::{MapperOptions, map_value};
use catalog_sync::models::product::{KIND_SIMPLE, KIND_VARIABLE, STOCK_IN, STOCK_OUT};
use catalog_sync::repositories::ProductRepository;
use serde_json::Value as JsonValue;
use test_utils::{setup_test_db, simple_product, variable_product};

async fn upsert(
    db: &sea_orm::DatabaseConnection,
    payload: &JsonValue,
) -> catalog_sync::catalog::UpsertOutcome {
    let mapped = map_value(payload, &MapperOptions::default()).expect("payload maps");
    UpsertEngine::upsert(db, &mapped).await.expect("upsert succeeds")
}

#[tokio::test]
async fn repeated_upsert_updates_in_place() {
    let db = setup_test_db().await.unwrap();

    let first = upsert(&db, &simple_product("MUG-1", 12_000, 4)).await;
    assert!(first.created);

    let second = upsert(&db, &simple_product("MUG-1", 15_000, 2)).await;
    assert!(!second.created);
    assert_eq!(second.product_id, first.product_id);
    assert_eq!(ProductRepository::count(&db).await.unwrap(), 1);

    let product = ProductRepository::get(&db, first.product_id).await.unwrap();
    assert_eq!(product.kind, KIND_SIMPLE);
    assert_eq!(product.price, Some(15_000));
    assert_eq!(product.stock_quantity, 2);
    assert_eq!(product.stock_status, STOCK_IN);
    assert!(product.last_synced_at.is_some());
}

#[tokio::test]
async fn dropped_variants_go_out_of_stock() {
    let db = setup_test_db().await.unwrap();

    let outcome = upsert(
        &db,
        &variable_product("TEE-1", &[("A", 1_000, 3), ("B", 1_100, 5), ("C", 1_200, 7)]),
    )
    .await;
    upsert(&db, &variable_product("TEE-1", &[("A", 1_000, 3), ("C", 1_250, 6)])).await;

    let variations = ProductRepository::variations(&db, outcome.product_id)
        .await
        .unwrap();
    assert_eq!(variations.len(), 3);

    let by_key = |key: &str| {
        variations
            .iter()
            .find(|row| row.variant_key == key)
            .expect("variation exists")
    };
    assert_eq!(by_key("A").stock_quantity, 3);
    assert_eq!(by_key("B").stock_quantity, 0);
    assert_eq!(by_key("B").stock_status, STOCK_OUT);
    assert_eq!(by_key("C").stock_quantity, 6);
    assert_eq!(by_key("C").price, Some(1_250));

    let parent = ProductRepository::get(&db, outcome.product_id).await.unwrap();
    assert_eq!(parent.kind, KIND_VARIABLE);
    assert_eq!(parent.stock_quantity, 9);
    assert_eq!(parent.price, Some(1_000));
}

#[tokio::test]
async fn topology_change_replaces_variations() {
    let db = setup_test_db().await.unwrap();

    let outcome = upsert(&db, &variable_product("CAP-1", &[("A", 500, 1), ("B", 600, 1)])).await;
    upsert(&db, &simple_product("CAP-1", 700, 2)).await;

    let product = ProductRepository::get(&db, outcome.product_id).await.unwrap();
    assert_eq!(product.kind, KIND_SIMPLE);
    assert!(
        ProductRepository::variations(&db, outcome.product_id)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn deprecated_product_is_restored_by_its_former_sku() {
    let db = setup_test_db().await.unwrap();

    let outcome = upsert(&db, &simple_product("PEN-1", 900, 10)).await;
    assert!(
        UpsertEngine::deprecate(&db, outcome.product_id, "missing upstream", actor::IMPORT)
            .await
            .unwrap()
    );

    let retired = ProductRepository::get(&db, outcome.product_id).await.unwrap();
    assert_eq!(retired.sku, None);
    assert_eq!(retired.backup_sku.as_deref(), Some("PEN-1"));
    assert!(retired.deprecated);
    assert_eq!(retired.stock_quantity, 0);
    assert_eq!(retired.deprecated_by.as_deref(), Some(actor::IMPORT));
    assert!(ProductRepository::find_by_sku(&db, "PEN-1").await.unwrap().is_none());
    assert_eq!(UpsertEngine::deprecated_count(&db).await.unwrap(), 1);

    // A second deprecation is a no-op and does not bump the count.
    assert!(
        !UpsertEngine::deprecate(&db, outcome.product_id, "again", actor::SYNC)
            .await
            .unwrap()
    );
    assert_eq!(UpsertEngine::deprecated_count(&db).await.unwrap(), 1);

    let restored = upsert(&db, &simple_product("PEN-1", 950, 4)).await;
    assert!(restored.restored);
    assert!(!restored.created);
    assert_eq!(restored.product_id, outcome.product_id);

    let product = ProductRepository::get(&db, outcome.product_id).await.unwrap();
    assert_eq!(product.sku.as_deref(), Some("PEN-1"));
    assert_eq!(product.backup_sku, None);
    assert!(!product.deprecated);
    assert_eq!(product.stock_quantity, 4);
    assert_eq!(ProductRepository::count(&db).await.unwrap(), 1);
}

#[tokio::test]
async fn unshippable_product_is_stored_out_of_stock() {
    let db = setup_test_db().await.unwrap();

    let mut payload = simple_product("BOX-1", 2_000, 8);
    payload["shipmentsReferenceId"] = JsonValue::Null;

    let outcome = upsert(&db, &payload).await;
    let product = ProductRepository::get(&db, outcome.product_id).await.unwrap();
    assert_eq!(product.stock_quantity, 0);
    assert_eq!(product.stock_status, STOCK_OUT);
    assert_eq!(product.price, Some(2_000));
}

#[tokio::test]
async fn out_of_stock_hold_keeps_the_sku_until_restored() {
    let db = setup_test_db().await.unwrap();
    let outcome = upsert(
        &db,
        &variable_product("CAP-1", &[("A", 2_000, 4), ("B", 2_100, 2)]),
    )
    .await;

    assert!(
        UpsertEngine::set_out_of_stock(&db, outcome.product_id, "supplier hold", actor::OPERATOR)
            .await
            .unwrap()
    );
    let held = ProductRepository::get(&db, outcome.product_id).await.unwrap();
    assert_eq!(held.sku.as_deref(), Some("CAP-1"));
    assert!(held.deprecated);
    assert_eq!(held.stock_status, STOCK_OUT);
    assert_eq!(held.deprecated_by.as_deref(), Some(actor::OPERATOR));
    let variations = ProductRepository::variations(&db, outcome.product_id)
        .await
        .unwrap();
    assert!(variations.iter().all(|row| row.stock_status == STOCK_OUT));
    assert_eq!(UpsertEngine::deprecated_count(&db).await.unwrap(), 1);

    // Already held; repeating it changes nothing.
    assert!(
        !UpsertEngine::set_out_of_stock(&db, outcome.product_id, "again", actor::OPERATOR)
            .await
            .unwrap()
    );

    let restored = UpsertEngine::restore(&db, outcome.product_id, "CAP-1")
        .await
        .unwrap();
    assert_eq!(restored.sku.as_deref(), Some("CAP-1"));
    assert!(!restored.deprecated);
    assert_eq!(restored.deprecated_reason, None);
    assert_eq!(UpsertEngine::deprecated_count(&db).await.unwrap(), 1);
}
