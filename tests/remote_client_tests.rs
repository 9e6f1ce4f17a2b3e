use std::sync::Arc;
use std::time::Duration;

use catalog_sync::config::RemoteApiConfig;
use catalog_sync::remote::client::ORIGIN_HEADER;
use catalog_sync::remote::{CatalogApi, RecordingSleeper, RemoteCatalogClient, RemoteError};
use chrono::{TimeZone, Utc};
use serde_json::json;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{header, method, path, query_param},
};

fn client_for(server: &MockServer, sleeper: Arc<RecordingSleeper>) -> RemoteCatalogClient {
    let config = RemoteApiConfig {
        base_url: server.uri(),
        api_token: Some("secret".to_string()),
        origin: "shop.example".to_string(),
        ..RemoteApiConfig::default()
    };
    RemoteCatalogClient::new(&config)
        .unwrap()
        .with_sleeper(sleeper)
}

#[tokio::test]
async fn fetch_page_sends_credentials_and_since_bound() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/products"))
        .and(query_param("page", "2"))
        .and(query_param("limit", "30"))
        .and(query_param("since", "2026-01-02T03:04:05Z"))
        .and(header("authorization", "Bearer secret"))
        .and(header(ORIGIN_HEADER, "shop.example"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total": 45,
            "items": [{"id": "SKU-31"}, {"id": "SKU-32"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, Arc::new(RecordingSleeper::new()));
    let since = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
    let page = client
        .fetch_page("products", 2, 30, Some(since))
        .await
        .unwrap();

    assert_eq!(page.page, 2);
    assert_eq!(page.total, 45);
    assert_eq!(page.items.len(), 2);
    assert!(!page.has_more());
}

#[tokio::test]
async fn transient_failures_are_retried_under_the_bulk_policy() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/products"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/products"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total": 1,
            "items": [{"id": "SKU-1"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let sleeper = Arc::new(RecordingSleeper::new());
    let client = client_for(&server, sleeper.clone());
    let page = client.fetch_page("products", 1, 30, None).await.unwrap();

    assert_eq!(page.items.len(), 1);
    assert_eq!(sleeper.waits(), vec![Duration::from_secs(5); 2]);
}

#[tokio::test]
async fn rejected_credentials_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/products/SKU-1"))
        .respond_with(ResponseTemplate::new(403).set_body_string("token revoked"))
        .expect(1)
        .mount(&server)
        .await;

    let sleeper = Arc::new(RecordingSleeper::new());
    let client = client_for(&server, sleeper.clone());
    let err = client.fetch_one("SKU-1").await.unwrap_err();

    assert!(err.is_auth());
    assert!(matches!(err, RemoteError::Forbidden { body: Some(ref b) } if b == "token revoked"));
    assert!(sleeper.waits().is_empty());
}

#[tokio::test]
async fn missing_product_reports_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/products/GONE-1"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, Arc::new(RecordingSleeper::new()));
    assert!(matches!(
        client.fetch_one("GONE-1").await,
        Err(RemoteError::NotFound { .. })
    ));
}

#[tokio::test]
async fn sku_is_sent_as_one_encoded_path_segment() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/products/A%2FB%3F1%23x"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "A/B?1#x"})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, Arc::new(RecordingSleeper::new()));
    let product = client.fetch_one("A/B?1#x").await.unwrap();
    assert_eq!(product["id"], "A/B?1#x");
}

#[tokio::test]
async fn order_calls_get_a_single_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/orders"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let sleeper = Arc::new(RecordingSleeper::new());
    let client = client_for(&server, sleeper.clone());
    let err = client
        .submit_order(&json!({"items": [{"variation": "SKU-1-v1", "amount": 1}]}))
        .await
        .unwrap_err();

    assert!(matches!(err, RemoteError::Status { status: 500, .. }));
    assert!(sleeper.waits().is_empty());
}

#[tokio::test]
async fn completion_notice_posts_synced_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/status"))
        .and(header(ORIGIN_HEADER, "shop.example"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, Arc::new(RecordingSleeper::new()));
    client.notify_sync_complete().await.unwrap();

    let requests = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["status"], json!("synced"));
}

#[tokio::test]
async fn missing_token_sends_nothing() {
    let server = MockServer::start().await;
    let config = RemoteApiConfig {
        base_url: server.uri(),
        api_token: Some("   ".to_string()),
        ..RemoteApiConfig::default()
    };
    let client = RemoteCatalogClient::new(&config).unwrap();

    assert!(matches!(
        client.fetch_page("products", 1, 30, None).await,
        Err(RemoteError::MissingToken)
    ));
    assert!(server.received_requests().await.unwrap().is_empty());
}
