#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]
//! Remote fetch tests against mock CDN hosts
//!
//! Covers byte-range requests, fallback across failing hosts, per-host
//! timeouts and cancellation.

use std::time::{Duration, Instant};

use tactkit_storage::{CancellationToken, CdnClient, RemoteSource, StorageConfig, StorageError};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const OBJECT: &str = "tpr/wow/data/00/17/0017a402f556fbece46c38dc431a2c9b";

fn client(hosts: &[String], timeout: Duration) -> CdnClient {
    let config = StorageConfig::default()
        .with_hosts(hosts.iter().cloned())
        .with_request_timeout(timeout);
    CdnClient::new(&config).unwrap()
}

#[tokio::test]
async fn range_request_returns_requested_bytes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/{OBJECT}")))
        .and(header("range", "bytes=100-109"))
        .respond_with(ResponseTemplate::new(206).set_body_bytes(b"0123456789".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let cdn = client(&[server.uri()], Duration::from_secs(5));
    let data = cdn
        .fetch_range(OBJECT, 100, 10, &CancellationToken::new())
        .await
        .unwrap()
        .expect("range should be served");
    assert_eq!(&data[..], b"0123456789");
}

#[tokio::test]
async fn range_request_rejects_full_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 64]))
        .mount(&server)
        .await;

    let cdn = client(&[server.uri()], Duration::from_secs(5));
    let data = cdn
        .fetch_range(OBJECT, 0, 10, &CancellationToken::new())
        .await
        .unwrap();
    assert!(data.is_none());
}

#[tokio::test]
async fn server_error_falls_back_to_next_host() {
    let failing = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&failing)
        .await;

    let healthy = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/{OBJECT}")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"archive".to_vec()))
        .expect(1)
        .mount(&healthy)
        .await;

    let cdn = client(&[failing.uri(), healthy.uri()], Duration::from_secs(5));
    let data = cdn
        .fetch(OBJECT, &CancellationToken::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&data[..], b"archive");
}

#[tokio::test]
async fn transport_error_falls_back_to_next_host() {
    let healthy = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ok".to_vec()))
        .expect(1)
        .mount(&healthy)
        .await;

    // Nothing listens on port 1
    let hosts = ["127.0.0.1:1".to_string(), healthy.uri()];
    let cdn = client(&hosts, Duration::from_secs(5));
    let data = cdn
        .fetch(OBJECT, &CancellationToken::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&data[..], b"ok");
}

#[tokio::test]
async fn slow_host_times_out() {
    let slow = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"late".to_vec())
                .set_delay(Duration::from_secs(10)),
        )
        .mount(&slow)
        .await;

    let fast = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"fast".to_vec()))
        .mount(&fast)
        .await;

    let cdn = client(&[slow.uri(), fast.uri()], Duration::from_millis(200));
    let started = Instant::now();
    let data = cdn
        .fetch(OBJECT, &CancellationToken::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&data[..], b"fast");
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn exhausted_hosts_are_not_found() {
    let missing = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .expect(2)
        .mount(&missing)
        .await;

    let cdn = client(&[missing.uri(), missing.uri()], Duration::from_secs(5));
    let data = cdn.fetch(OBJECT, &CancellationToken::new()).await.unwrap();
    assert!(data.is_none());
}

#[tokio::test]
async fn cancellation_interrupts_in_flight_request() {
    let slow = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(10)))
        .mount(&slow)
        .await;

    let cdn = client(&[slow.uri()], Duration::from_secs(30));
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let result = cdn.fetch(OBJECT, &cancel).await;
    assert!(matches!(result, Err(StorageError::Cancelled)));
    assert!(started.elapsed() < Duration::from_secs(5));
}
