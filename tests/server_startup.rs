//! Startup, `/version`, and `/metrics` surface tests.

mod common;

use common::{client, TestHarness};

#[tokio::test]
async fn version_endpoint_reports_the_crate_version() {
    let harness = TestHarness::start(&["insights-desktop"], 10.0, 10).await;

    let response = client()
        .get(format!("{}/version", harness.base_url))
        .send()
        .await
        .expect("request failed");

    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.expect("invalid json body");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn version_endpoint_is_not_rate_limited() {
    let harness = TestHarness::start(&[], 0.1, 1).await;
    let c = client();

    for _ in 0..5 {
        let response = c
            .get(format!("{}/version", harness.base_url))
            .send()
            .await
            .expect("request failed");
        assert_eq!(response.status(), 200);
    }
}

#[tokio::test]
async fn metrics_endpoint_exposes_prometheus_text_format() {
    let harness = TestHarness::start(&["a"], 10.0, 10).await;

    client()
        .post(format!("{}/upload/a", harness.base_url))
        .body(r#"{"k":1}"#)
        .send()
        .await
        .expect("upload failed");

    let response = client()
        .get(format!("{}/metrics", harness.base_url))
        .send()
        .await
        .expect("request failed");

    assert_eq!(response.status(), 200);
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(content_type.contains("text/plain"));

    let body = response.text().await.expect("failed to read body");
    assert!(body.contains("insights_ingest_requests_total"));
}
