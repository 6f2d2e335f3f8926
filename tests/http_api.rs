//! In-process tests of the HTTP surface.

use std::io::Read;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use tokio::sync::Semaphore;

use scanwire::http::handlers::indexer::{INDEX_REPORT_PATH, INDEX_STATE_PATH};
use scanwire::http::handlers::matcher::{UPDATE_OPERATION_PATH, VULNERABILITY_REPORT_PATH};
use scanwire::http::handlers::notifier::NOTIFICATION_PATH;
use scanwire::http::problem::PROBLEM_JSON;
use scanwire::types::{Package, UpdateKind, Version, Vulnerability};
use scanwire::{MemoryBackend, ScanwireConfig};

mod common;
use common::{
    body_bytes, body_json, digest, manifest_json, router, router_with, send, Calls, Mock, StatusLog,
};

fn mock() -> Arc<Mock> {
    Arc::new(Mock::new(Arc::new(MemoryBackend::new())))
}

fn post_manifest(n: u8) -> Request<Body> {
    Request::post(INDEX_REPORT_PATH)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(manifest_json(&digest(n))))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn index_then_revalidate() {
    let mock = mock();
    let app = router(&mock);

    let resp = send(&app, post_manifest(1)).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let location = resp.headers()[header::LOCATION].to_str().unwrap().to_string();
    assert_eq!(location, format!("{INDEX_REPORT_PATH}/{}", digest(1)));
    let links: Vec<_> = resp.headers().get_all(header::LINK).iter().collect();
    assert_eq!(links.len(), 2);
    assert!(resp.headers().contains_key(header::ETAG));

    let resp = send(&app, get(&location)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let etag = resp.headers()[header::ETAG].clone();
    let report = body_json(resp).await;
    assert_eq!(report["manifest_hash"], digest(1).to_string());
    assert_eq!(report["state"], "IndexFinished");

    let lookups = Calls::get(&mock.calls.index_report);
    let resp = send(
        &app,
        Request::get(&location)
            .header(header::IF_NONE_MATCH, etag.clone())
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NOT_MODIFIED);
    assert_eq!(resp.headers()[header::ETAG], etag);
    assert!(body_bytes(resp).await.is_empty());
    assert_eq!(Calls::get(&mock.calls.index_report), lookups, "304 must not fetch the report");
}

#[tokio::test]
async fn unchanged_state_is_412_with_links() {
    let mock = mock();
    let app = router(&mock);

    let state = body_json(send(&app, get(INDEX_STATE_PATH)).await).await;
    let etag = format!("\"{}\"", state["state"].as_str().unwrap());

    let mut req = post_manifest(2);
    req.headers_mut().insert(header::IF_NONE_MATCH, etag.parse().unwrap());
    let resp = send(&app, req).await;
    assert_eq!(resp.status(), StatusCode::PRECONDITION_FAILED);
    assert_eq!(resp.headers().get_all(header::LINK).iter().count(), 2);
    assert_eq!(Calls::get(&mock.calls.index), 0);
}

#[tokio::test]
async fn bogus_manifest_is_a_problem() {
    let app = router(&mock());
    let body = format!(r#"{{"hash":"{}","layers":[]}}"#, digest(3));
    let resp = send(
        &app,
        Request::post(INDEX_REPORT_PATH).body(Body::from(body)).unwrap(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(resp.headers()[header::CONTENT_TYPE], PROBLEM_JSON);
    assert_eq!(resp.headers()[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
    assert!(resp.headers().get(header::LINK).is_none());
    let problem = body_json(resp).await;
    assert_eq!(problem["status"], 400);
    assert_eq!(problem["detail"], "bogus manifest");

    let resp = send(
        &app,
        Request::post(INDEX_REPORT_PATH).body(Body::from("{\"hash\":")).unwrap(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn content_negotiation() {
    let mock = mock();
    let app = router(&mock);
    send(&app, post_manifest(4)).await;
    let uri = format!("{INDEX_REPORT_PATH}/{}", digest(4));

    let resp = send(
        &app,
        Request::get(&uri)
            .header(header::ACCEPT, "application/json;q=0.5, application/vnd.clair.indexreport.v1+json")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::CONTENT_TYPE], "application/vnd.clair.indexreport.v1+json");

    let resp = send(
        &app,
        Request::get(&uri)
            .header(header::ACCEPT, "text/html")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(resp.headers()[header::CONTENT_TYPE], PROBLEM_JSON);
}

#[tokio::test]
async fn missing_report_and_bad_digest() {
    let app = router(&mock());
    let resp = send(&app, get(&format!("{INDEX_REPORT_PATH}/{}", digest(9)))).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(resp).await["detail"], "index report not found");

    let resp = send(&app, get(&format!("{INDEX_REPORT_PATH}/sha256:zz"))).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn bulk_delete_is_idempotent() {
    let mock = mock();
    let app = router(&mock);
    send(&app, post_manifest(5)).await;

    let body = format!(r#"["{}"]"#, digest(5));
    let delete = || Request::delete(INDEX_REPORT_PATH).body(Body::from(body.clone())).unwrap();

    let resp = send(&app, delete()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await, serde_json::json!([digest(5).to_string()]));

    let resp = send(&app, delete()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await, serde_json::json!([]));
}

#[tokio::test]
async fn single_delete_is_204() {
    let app = router(&mock());
    send(&app, post_manifest(6)).await;
    let resp = send(
        &app,
        Request::delete(format!("{INDEX_REPORT_PATH}/{}", digest(6)))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn limiter_rejects_then_recovers() {
    let gate = Arc::new(Semaphore::new(0));
    let mut m = Mock::new(Arc::new(MemoryBackend::new()));
    m.index_gate = Some(gate.clone());
    let mock = Arc::new(m);
    let mut config = ScanwireConfig::default();
    config.indexer.index_report_request_concurrency = 1;
    let app = router_with(&mock, config);

    let first = tokio::spawn({
        let app = app.clone();
        async move { send(&app, post_manifest(7)).await }
    });
    while Calls::get(&mock.calls.index) == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    for _ in 0..10 {
        let resp = send(&app, post_manifest(8)).await;
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], PROBLEM_JSON);
    }

    gate.add_permits(100);
    let resp = first.await.unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    // The permit is held until the body is consumed.
    body_bytes(resp).await;

    let resp = send(&app, post_manifest(8)).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn disconnect_cancels_collaborator_call() {
    let log = StatusLog::default();
    let _capture = log.install();
    let mut m = Mock::new(Arc::new(MemoryBackend::new()));
    m.hang_scan = true;
    let mock = Arc::new(m);
    mock.backend.set_initialized();
    let app = router(&mock);
    send(&app, post_manifest(10)).await;

    let uri = format!("{VULNERABILITY_REPORT_PATH}/{}", digest(10));
    let pending = tokio::spawn({
        let app = app.clone();
        async move { send(&app, get(&uri)).await }
    });
    while Calls::get(&mock.calls.scan) == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    // The client goes away.
    pending.abort();

    tokio::time::timeout(Duration::from_secs(2), async {
        while !mock.scan_dropped.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("scan should be abandoned once the client disconnects");

    // The manifest upload, then the abandoned report.
    assert_eq!(log.wait_for(2).await, vec![201, 499]);
}

#[tokio::test]
async fn request_timeout_is_not_a_disconnect() {
    let log = StatusLog::default();
    let _capture = log.install();
    let mut m = Mock::new(Arc::new(MemoryBackend::new()));
    m.hang_scan = true;
    let mock = Arc::new(m);
    mock.backend.set_initialized();
    let mut config = ScanwireConfig::default();
    config.timeouts.request_secs = 1;
    let app = router_with(&mock, config);
    send(&app, post_manifest(12)).await;

    let resp = send(&app, get(&format!("{VULNERABILITY_REPORT_PATH}/{}", digest(12)))).await;
    assert_eq!(resp.status(), StatusCode::REQUEST_TIMEOUT);
    assert!(mock.scan_dropped.load(Ordering::SeqCst));

    let statuses = log.wait_for(2).await;
    assert_eq!(statuses, vec![201, 408]);
    assert!(!statuses.contains(&499));
}

#[tokio::test]
async fn vulnerability_report_lifecycle() {
    let mock = mock();
    let app = router(&mock);
    let uri = format!("{VULNERABILITY_REPORT_PATH}/{}", digest(11));

    let resp = send(&app, get(&uri)).await;
    assert_eq!(resp.status(), StatusCode::ACCEPTED, "matcher not initialized yet");

    mock.backend.record_update(
        "test-updater",
        UpdateKind::Vulnerability,
        vec![Vulnerability {
            id: "1".into(),
            name: "CVE-2024-0001".into(),
            package: Some(Package {
                name: "openssl".into(),
                ..Default::default()
            }),
            ..Default::default()
        }],
    );
    let resp = send(&app, get(&uri)).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let mut report = scanwire::types::IndexReport {
        hash: digest(11),
        state: "IndexFinished".into(),
        success: true,
        ..Default::default()
    };
    report.packages.insert(
        "p1".into(),
        Package {
            id: "p1".into(),
            name: "openssl".into(),
            version: "3.0.1".into(),
            normalized_version: Version::default(),
            ..Default::default()
        },
    );
    mock.backend.insert_report(report);

    let resp = send(&app, get(&uri)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::CACHE_CONTROL], "max-age=3600");
    let etag = resp.headers()[header::ETAG].clone();
    let v = body_json(resp).await;
    assert_eq!(v["package_vulnerabilities"]["p1"], serde_json::json!(["1"]));

    let scans = Calls::get(&mock.calls.scan);
    let resp = send(
        &app,
        Request::get(&uri)
            .header(header::IF_NONE_MATCH, etag.clone())
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NOT_MODIFIED);
    assert_eq!(Calls::get(&mock.calls.scan), scans);

    // New enrichment data invalidates the cached report.
    mock.backend.record_update("test-enricher", UpdateKind::Enrichment, Vec::new());
    let resp = send(
        &app,
        Request::get(&uri)
            .header(header::IF_NONE_MATCH, etag.clone())
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_ne!(resp.headers()[header::ETAG], etag);
}

#[tokio::test]
async fn gzip_responses_decode() {
    let mock = mock();
    mock.backend.set_initialized();
    let app = router(&mock);
    send(&app, post_manifest(12)).await;

    let resp = send(
        &app,
        Request::get(format!("{VULNERABILITY_REPORT_PATH}/{}", digest(12)))
            .header(header::ACCEPT_ENCODING, "gzip")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::CONTENT_ENCODING], "gzip");
    assert_eq!(resp.headers()[header::VARY], "accept-encoding");
    assert!(resp.headers().get(header::CONTENT_LENGTH).is_none());

    let compressed = body_bytes(resp).await;
    let mut plain = String::new();
    flate2::read::GzDecoder::new(&compressed[..])
        .read_to_string(&mut plain)
        .unwrap();
    let v: serde_json::Value = serde_json::from_str(&plain).unwrap();
    assert_eq!(v["manifest_hash"], digest(12).to_string());
}

#[tokio::test]
async fn unacceptable_encoding_is_406() {
    let app = router(&mock());
    let resp = send(
        &app,
        Request::get("/openapi/v1")
            .header(header::ACCEPT_ENCODING, "br, identity;q=0")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NOT_ACCEPTABLE);
    assert_eq!(resp.headers()[header::CONTENT_TYPE], PROBLEM_JSON);
    assert_eq!(resp.headers()[header::ACCEPT_ENCODING], "gzip, deflate, snappy");
}

#[tokio::test]
async fn wrong_method_is_405() {
    let app = router(&mock());
    let resp = send(
        &app,
        Request::builder()
            .method(Method::PUT)
            .uri(INDEX_REPORT_PATH)
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(resp.headers()[header::CONTENT_TYPE], PROBLEM_JSON);
}

#[tokio::test]
async fn update_operations_validate() {
    let mock = mock();
    let app = router(&mock);

    let resp = send(&app, get(&format!("{UPDATE_OPERATION_PATH}?kind=bogus"))).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let op = mock.backend.record_update("alpine", UpdateKind::Vulnerability, Vec::new());
    let resp = send(&app, get(&format!("{UPDATE_OPERATION_PATH}?latest=true"))).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let etag = resp.headers()[header::ETAG].to_str().unwrap().to_string();
    assert_eq!(etag, format!("\"{}\"", op.reference));
    let v = body_json(resp).await;
    assert_eq!(v["alpine"][0]["ref"], op.reference.to_string());

    let resp = send(
        &app,
        Request::get(UPDATE_OPERATION_PATH)
            .header(header::IF_NONE_MATCH, etag)
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NOT_MODIFIED);
}

#[tokio::test]
async fn notifications_page() {
    let mock = mock();
    let app = router(&mock);
    let id = uuid::Uuid::new_v4();
    mock.backend.push_notifications(id, Vec::new());

    let resp = send(&app, get(&format!("{NOTIFICATION_PATH}/{id}"))).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let v = body_json(resp).await;
    assert_eq!(v["page"]["size"], 500);
    assert_eq!(v["notifications"], serde_json::json!([]));

    let resp = send(&app, get(&format!("{NOTIFICATION_PATH}/not-a-uuid"))).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}
