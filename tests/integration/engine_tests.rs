//! Integration tests for the engine
//!
//! These tests use wiremock to serve catalog pages and run the full
//! fetch, classify, extract and cache cycle against a real HTTP client.

use chrono::{TimeZone, Utc};
use shelfscan::cache::{BackingStore, ResultCache, SqliteStore};
use shelfscan::config::{parse_config, Config, ConfigLayer, TargetConfig};
use shelfscan::engine::{Engine, FixedClock, ReqwestTransport, Target};
use shelfscan::extract::{FieldKind, FieldValue};
use shelfscan::{TargetError, TargetState};
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PRODUCT_PAGE: &str = r#"<html><head><title>Kettle</title></head><body>
<h1>Electric kettle</h1>
<span class="availability">В наличии</span>
<span class="price">1299</span>
<span class="article">KT-100</span>
<img class="main" src="/img/kettle.jpg">
</body></html>"#;

const GONE_PAGE: &str = r#"<html><body>
<h1>Electric kettle</h1>
<p>Товар снят с продажи</p>
</body></html>"#;

/// Creates a site bundle for the mock server with no delays and fast retries
fn create_test_bundle(host: &str) -> Config {
    let bundle = format!(
        r#"
[engine]
request-delay = "0"
max-retries = 2
backoff-base-ms = 1
timeout-ms = 2000

[site]
host = "{}"
fields = ["name", "stock", "price", "oldprice", "article", "imageLink"]
optional = ["oldprice"]
parse-codes = {{ 200 = true, 404 = false }}

[[site.bad-link]]
body-contains = "Товар снят с продажи"

[site.extractors.name]
selector = "h1"

[site.extractors.stock]
selector = ".availability"
markers = ["в наличии"]

[site.extractors.price]
selector = ".price"

[site.extractors.oldprice]
selector = ".old-price"

[site.extractors.article]
selector = ".article"

[site.extractors.imageLink]
selector = "img.main"
attr = "src"
"#,
        host
    );
    parse_config(&bundle).expect("Failed to parse test bundle")
}

fn resolve(bundle: &Config) -> Arc<TargetConfig> {
    Arc::new(
        bundle
            .resolve(&ConfigLayer::default())
            .expect("Failed to resolve test bundle"),
    )
}

fn create_engine(bundle: &Config, cache: ResultCache) -> Engine<ReqwestTransport> {
    let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    Engine::new(
        ReqwestTransport::new(),
        bundle.proxy_pools(),
        Arc::new(cache),
    )
    .with_clock(Arc::new(FixedClock::new(at)))
}

#[tokio::test]
async fn test_valid_page_yields_complete_item() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/p/kettle"))
        .respond_with(ResponseTemplate::new(200).set_body_string(PRODUCT_PAGE))
        .expect(1)
        .mount(&mock_server)
        .await;

    let bundle = create_test_bundle(&base_url);
    let engine = create_engine(&bundle, ResultCache::in_memory());
    let target = Target::new(format!("{}/p/kettle", base_url), resolve(&bundle));

    let item = engine.process(&target).await.expect("Expected an item");

    assert_eq!(
        item.get(FieldKind::Name),
        Some(&FieldValue::Text("Electric kettle".to_string()))
    );
    assert_eq!(item.get(FieldKind::Stock), Some(&FieldValue::Availability(true)));
    assert_eq!(item.get(FieldKind::Price), Some(&FieldValue::Number(1299.0)));
    assert_eq!(item.get(FieldKind::OldPrice), Some(&FieldValue::Empty));
    assert_eq!(
        item.get(FieldKind::ImageLink),
        Some(&FieldValue::Link(format!("{}/img/kettle.jpg", base_url)))
    );
    assert_eq!(
        item.timestamp(),
        Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap())
    );
    assert_eq!(item.keys().count(), 7);

    // Second request is served from the cache
    let again = engine.process(&target).await.expect("Expected cached item");
    assert_eq!(again, item);
}

#[tokio::test]
async fn test_not_found_is_cached() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/p/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_string("<h1>Not found</h1>"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let bundle = create_test_bundle(&base_url);
    let engine = create_engine(&bundle, ResultCache::in_memory());
    let target = Target::new(format!("{}/p/missing", base_url), resolve(&bundle));

    for _ in 0..2 {
        let err = engine.process(&target).await.unwrap_err();
        assert!(matches!(err, TargetError::NotFound { status: 404, .. }));
    }
}

#[tokio::test]
async fn test_dead_link_marker_is_cached() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/p/gone"))
        .respond_with(ResponseTemplate::new(200).set_body_string(GONE_PAGE))
        .expect(1)
        .mount(&mock_server)
        .await;

    let bundle = create_test_bundle(&base_url);
    let engine = create_engine(&bundle, ResultCache::in_memory());
    let target = Target::new(format!("{}/p/gone", base_url), resolve(&bundle));

    for _ in 0..2 {
        let err = engine.process(&target).await.unwrap_err();
        match err {
            TargetError::InvalidLink { reason, .. } => {
                assert!(reason.contains("Товар снят с продажи"), "reason: {}", reason)
            }
            other => panic!("Expected InvalidLink, got {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_server_errors_retried_then_reported() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    // One initial attempt plus two retries
    Mock::given(method("GET"))
        .and(path("/p/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&mock_server)
        .await;

    let bundle = create_test_bundle(&base_url);
    let engine = create_engine(&bundle, ResultCache::in_memory());
    let target = Target::new(format!("{}/p/flaky", base_url), resolve(&bundle));

    let err = engine.process(&target).await.unwrap_err();
    match err {
        TargetError::Network { attempts, .. } => assert_eq!(attempts, 3),
        other => panic!("Expected Network, got {:?}", other),
    }
}

#[tokio::test]
async fn test_recovers_after_transient_error() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/p/kettle"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/p/kettle"))
        .respond_with(ResponseTemplate::new(200).set_body_string(PRODUCT_PAGE))
        .mount(&mock_server)
        .await;

    let bundle = create_test_bundle(&base_url);
    let engine = create_engine(&bundle, ResultCache::in_memory());
    let target = Target::new(format!("{}/p/kettle", base_url), resolve(&bundle));

    let item = engine.process(&target).await.expect("Expected recovery");
    assert_eq!(item.get(FieldKind::Price), Some(&FieldValue::Number(1299.0)));
}

#[tokio::test]
async fn test_concurrent_duplicates_fetch_once() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/p/kettle"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(PRODUCT_PAGE)
                .set_delay(std::time::Duration::from_millis(100)),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let bundle = create_test_bundle(&base_url);
    let engine = Arc::new(create_engine(&bundle, ResultCache::in_memory()));
    let config = resolve(&bundle);

    // Equivalent links normalize to the same key
    let targets = vec![
        Target::new(format!("{}/p/kettle", base_url), Arc::clone(&config)),
        Target::new(format!("{}/p/kettle#reviews", base_url), Arc::clone(&config)),
        Target::new(format!("{}/p/kettle", base_url), Arc::clone(&config)),
        Target::new(format!("{}/p/kettle", base_url), Arc::clone(&config)),
    ];

    let reports = engine.run_batch(targets).await;

    assert_eq!(reports.len(), 4);
    for report in &reports {
        assert!(report.result.is_ok(), "{:?}", report.result);
    }
}

#[tokio::test]
async fn test_batch_isolates_failures() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/p/kettle"))
        .respond_with(ResponseTemplate::new(200).set_body_string(PRODUCT_PAGE))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/p/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let bundle = create_test_bundle(&base_url);
    let engine = Arc::new(create_engine(&bundle, ResultCache::in_memory()));
    let config = resolve(&bundle);

    let targets = vec![
        Target::new(format!("{}/p/kettle", base_url), Arc::clone(&config)),
        Target::new(format!("{}/p/missing", base_url), Arc::clone(&config)),
        Target::new("ftp://files.example/p/1", Arc::clone(&config)),
    ];

    let reports = engine.run_batch(targets).await;
    let status = |url: &str| {
        reports
            .iter()
            .find(|r| r.url == url)
            .map(|r| r.to_json()["status"].as_str().unwrap_or_default().to_string())
    };

    assert_eq!(status(&format!("{}/p/kettle", base_url)).as_deref(), Some("ok"));
    assert_eq!(
        status(&format!("{}/p/missing", base_url)).as_deref(),
        Some("not_found")
    );
    assert_eq!(status("ftp://files.example/p/1").as_deref(), Some("bad_link"));
}

#[tokio::test]
async fn test_sqlite_cache_survives_restart() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/p/missing"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&mock_server)
        .await;

    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("cache.db");
    let bundle = create_test_bundle(&base_url);
    let target = Target::new(format!("{}/p/missing", base_url), resolve(&bundle));

    {
        let store = SqliteStore::new(&db_path).expect("Failed to open cache");
        let engine = create_engine(&bundle, ResultCache::new(Arc::new(store)));
        assert!(engine.process(&target).await.is_err());
    }

    let store = SqliteStore::new(&db_path).expect("Failed to reopen cache");
    assert_eq!(
        store.count_by_state().expect("Failed to count entries"),
        vec![(TargetState::CachedNotFound, 1)]
    );
    let engine = create_engine(&bundle, ResultCache::new(Arc::new(store)));
    let err = engine.process(&target).await.unwrap_err();
    assert!(matches!(err, TargetError::NotFound { status: 404, .. }));
}
