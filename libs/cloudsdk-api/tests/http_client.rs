#![allow(clippy::unwrap_used, clippy::expect_used)]

//! `ApiClient` over a real connection against a local mock server.

use std::sync::Arc;
use std::time::Duration;

use cloudsdk_api::{ApiClient, ApiConfig, ApiKey, BearerToken, Operation, Region};
use cloudsdk_http::{
    RetryConfig, SharedBuffer, TimeoutAware, TraceConfig, TraceSink, TransportConfig,
};
use httpmock::prelude::*;
use serde_json::json;

fn config(server: &MockServer) -> ApiConfig {
    ApiConfig::new(server.base_url()).with_transport(TransportConfig::for_testing())
}

#[tokio::test]
async fn signed_region_scoped_request() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET)
            .path("/api/v1/regions/us-east-1/platform")
            .header("authorization", "ApiKey s3cr3t");
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!({"version": "3.1.0"}));
    });

    let client = ApiClient::new(
        config(&server)
            .with_region(Region::new("us-east-1").unwrap())
            .with_signer(Arc::new(ApiKey::new("s3cr3t"))),
    )
    .unwrap();

    let body: serde_json::Value = client
        .execute(&Operation::new(http::Method::GET, "/platform"))
        .await
        .unwrap();
    assert_eq!(body["version"], "3.1.0");
    mock.assert();
}

#[tokio::test]
async fn deployments_stay_regionless() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET)
            .path("/api/v1/deployments/d-1")
            .header("authorization", "Bearer tok");
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!({"id": "d-1"}));
    });

    let client = ApiClient::new(
        config(&server)
            .with_region(Region::new("us-east-1").unwrap())
            .with_signer(Arc::new(BearerToken::new("tok"))),
    )
    .unwrap();

    let body: serde_json::Value = client
        .execute(
            &Operation::new(http::Method::GET, "/deployments/{deployment_id}")
                .param("deployment_id", "d-1"),
        )
        .await
        .unwrap();
    assert_eq!(body["id"], "d-1");
    mock.assert();
}

#[tokio::test]
async fn every_attempt_is_signed_and_redacted_in_trace() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET)
            .path("/api/v1/platform")
            .header("authorization", "ApiKey s3cr3t");
        then.status(200).delay(Duration::from_millis(300));
    });

    let buffer = SharedBuffer::new();
    let transport = TransportConfig {
        request_timeout: Duration::from_millis(50),
        retry: RetryConfig::new(1, Duration::from_millis(5)),
        trace: TraceConfig::to(TraceSink::new(buffer.clone())),
        ..TransportConfig::for_testing()
    };
    let client = ApiClient::new(
        config(&server)
            .with_transport(transport)
            .with_signer(Arc::new(ApiKey::new("s3cr3t"))),
    )
    .unwrap();

    let err = client
        .send(&Operation::new(http::Method::GET, "/platform"))
        .await
        .unwrap_err();
    assert!(err.is_timeout());

    let out = buffer.contents();
    assert_eq!(out.matches("Start of Request #").count(), 2);
    assert_eq!(out.matches("Authorization: [REDACTED]").count(), 2);
    assert!(!out.contains("s3cr3t"));
    assert!(mock.calls() >= 1);
}
