//! End-to-end tests through the reqwest transport against a mock HTTP server.

mod common;

use std::sync::Arc;
use std::time::Duration;

use horizon_request::{
    ArgumentsUrlFilter, CachePolicy, CacheStore, DirectContext, HttpMethod, NetworkConfig,
    NetworkError, RequestError, RequestSerializerType, RequestState, ResponseObject,
    ResponseSerializerType, TransferProgress,
};
use parking_lot::Mutex;
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn network_for(server: &MockServer, cache_dir: &std::path::Path) -> NetworkConfig {
    NetworkConfig::builder()
        .base_url(server.uri())
        .cache_store(CacheStore::new(cache_dir))
        .context(Arc::new(DirectContext::new()))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_get_arguments_travel_in_the_query() {
    common::init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users"))
        .and(query_param("page", "2"))
        .and(query_param("filter[active]", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"users": []})))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let request = network_for(&server, dir.path())
        .request("/users")
        .argument(&json!({"page": 2, "filter": {"active": true}}))
        .build();
    request.start();

    assert_eq!(request.wait().await, RequestState::Finished);
    assert_eq!(request.response_status_code(), Some(200));
    assert_eq!(request.response_json(), Some(json!({"users": []})));
}

#[tokio::test]
async fn test_post_json_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/articles"))
        .and(body_json(json!({"title": "Hello"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 7})))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let request = network_for(&server, dir.path())
        .request("/articles")
        .method(HttpMethod::Post)
        .request_serializer(RequestSerializerType::Json)
        .argument(&json!({"title": "Hello"}))
        .build();
    request.start();

    assert_eq!(request.wait().await, RequestState::Finished);
    assert_eq!(request.response_json(), Some(json!({"id": 7})));
}

#[tokio::test]
async fn test_post_form_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/login"))
        .and(header("content-type", "application/x-www-form-urlencoded"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let request = network_for(&server, dir.path())
        .request("/login")
        .method(HttpMethod::Post)
        .argument(&json!({"user": "ada"}))
        .build();
    request.start();

    assert_eq!(request.wait().await, RequestState::Finished);
}

#[tokio::test]
async fn test_headers_auth_and_cache_policy() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/private"))
        .and(header("authorization", "Basic dXNlcjpwYXNz"))
        .and(header("x-client", "tests"))
        .and(header("cache-control", "no-cache"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"secret": 1})))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let request = network_for(&server, dir.path())
        .request("/private")
        .basic_auth("user", "pass")
        .header("x-client", "tests")
        .cache_policy(CachePolicy::ReloadIgnoringLocalCacheData)
        .build();
    request.start();

    assert_eq!(request.wait().await, RequestState::Finished);
}

#[tokio::test]
async fn test_server_error_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/unstable"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let request = network_for(&server, dir.path())
        .request("/unstable")
        .response_serializer(ResponseSerializerType::Http)
        .retry(2, Duration::from_millis(10))
        .build();
    request.start();

    assert_eq!(request.wait().await, RequestState::Failed);
    assert_eq!(request.request_total_count(), 3);
    assert_eq!(request.response_status_code(), Some(500));
}

#[tokio::test]
async fn test_slow_server_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({}))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let request = network_for(&server, dir.path())
        .request("/slow")
        .timeout(Duration::from_millis(100))
        .build();
    request.start();

    assert_eq!(request.wait().await, RequestState::Failed);
    assert_eq!(request.error(), Some(RequestError::Network(NetworkError::Timeout)));
}

#[tokio::test]
async fn test_xml_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("<feed><entry id=\"1\"/></feed>", "application/xml"),
        )
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let request = network_for(&server, dir.path())
        .request("/feed.xml")
        .response_serializer(ResponseSerializerType::Xml)
        .build();
    request.start();

    assert_eq!(request.wait().await, RequestState::Finished);
    match request.response_object() {
        Some(ResponseObject::Xml(document)) => assert_eq!(document.root_name(), "feed"),
        other => panic!("expected an XML document, got {other:?}"),
    }
}

#[tokio::test]
async fn test_url_filter_appends_arguments() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/items"))
        .and(query_param("channel", "beta"))
        .and(query_param("q", "rust"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let network = NetworkConfig::builder()
        .base_url(server.uri())
        .url_filter(ArgumentsUrlFilter::new().argument("channel", "beta"))
        .cache_store(CacheStore::new(dir.path()))
        .context(Arc::new(DirectContext::new()))
        .build()
        .unwrap();
    let request = network
        .request("/items")
        .argument(&json!({"q": "rust"}))
        .build();
    request.start();

    assert_eq!(request.wait().await, RequestState::Finished);
}

#[tokio::test]
async fn test_download_writes_file_and_reports_progress() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/report.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 4096]))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("report.bin");
    let progress: Arc<Mutex<Vec<TransferProgress>>> = Arc::default();
    let sink = progress.clone();

    let request = network_for(&server, dir.path())
        .request("/files/report.bin")
        .resumable_download(&destination)
        .download_progress(move |p| sink.lock().push(*p))
        .build();
    request.start();

    assert_eq!(request.wait().await, RequestState::Finished);
    assert_eq!(std::fs::read(&destination).unwrap(), vec![7u8; 4096]);
    assert_eq!(
        request.response_object(),
        Some(ResponseObject::File(destination.clone()))
    );
    let last = *progress.lock().last().unwrap();
    assert_eq!(last.bytes_transferred, 4096);
    assert_eq!(last.total_bytes, Some(4096));
}

#[tokio::test]
async fn test_download_resumes_partial_file() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/greeting.txt"))
        .and(header("range", "bytes=7-"))
        .respond_with(ResponseTemplate::new(206).set_body_string("World!"))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("greeting.txt");
    std::fs::write(&destination, "Hello, ").unwrap();

    let request = network_for(&server, dir.path())
        .request("/files/greeting.txt")
        .resumable_download(&destination)
        .build();
    request.start();

    assert_eq!(request.wait().await, RequestState::Finished);
    assert_eq!(
        std::fs::read_to_string(&destination).unwrap(),
        "Hello, World!"
    );
}

#[tokio::test]
async fn test_download_restarts_when_range_is_ignored() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/greeting.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("Hello, World!"))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("greeting.txt");
    std::fs::write(&destination, "stale bytes").unwrap();

    let request = network_for(&server, dir.path())
        .request("/files/greeting.txt")
        .resumable_download(&destination)
        .build();
    request.start();

    assert_eq!(request.wait().await, RequestState::Finished);
    assert_eq!(
        std::fs::read_to_string(&destination).unwrap(),
        "Hello, World!"
    );
}
