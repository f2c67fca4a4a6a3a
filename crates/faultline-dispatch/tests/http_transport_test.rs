//! Integration tests for the HTTPS transport against a mock server.

use std::time::Duration;

use anyhow::Result;
use faultline_dispatch::{HttpTransport, Transport, TransportConfig, TransportError};
use faultline_core::Payload;
use serde_json::json;
use wiremock::{
    matchers::{body_partial_json, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

fn transport_for(server: &MockServer) -> Result<HttpTransport> {
    let config = TransportConfig {
        endpoint: format!("{}/api/1/item/", server.uri()),
        access_token: Some("test-token".to_string()),
        timeout: Duration::from_secs(5),
        ..Default::default()
    };
    Ok(HttpTransport::new(config)?)
}

#[tokio::test]
async fn accepted_payload_decodes_to_code_zero() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/1/item/"))
        .and(header("X-Access-Token", "test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"err": 0, "result": {}})))
        .expect(1)
        .mount(&server)
        .await;

    let transport = transport_for(&server)?;
    let response = transport.send(&Payload::new(json!({"message": "hi"})), &[]).await?;

    assert_eq!(response.error_code, 0);
    assert!(response.is_ok());
    Ok(())
}

#[tokio::test]
async fn throttle_response_decodes_to_429() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(429).set_body_json(json!({"err": 429, "message": "slow down"})),
        )
        .mount(&server)
        .await;

    let transport = transport_for(&server)?;
    let response = transport.send(&Payload::new(json!({})), &[]).await?;

    assert!(response.is_throttled());
    Ok(())
}

#[tokio::test]
async fn server_error_is_a_transport_failure_not_a_verdict() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
        .mount(&server)
        .await;

    let transport = transport_for(&server)?;
    let error = transport
        .send(&Payload::new(json!({})), &[])
        .await
        .expect_err("a 5xx carries no server verdict");

    assert!(matches!(error, TransportError::Other { .. }), "got {error:?}");
    assert!(!error.is_transient(), "5xx spends the whole retry budget");
    Ok(())
}

#[tokio::test]
async fn http_status_backfills_a_missing_error_code() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .mount(&server)
        .await;

    let transport = transport_for(&server)?;
    let response = transport.send(&Payload::new(json!({})), &[]).await?;

    assert_eq!(response.error_code, 429);
    assert!(response.is_throttled());
    Ok(())
}

#[tokio::test]
async fn scrub_fields_are_masked_on_the_wire() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({
            "access_token": "test-token",
            "data": {"message": "login failed", "password": "***"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"err": 0})))
        .expect(1)
        .mount(&server)
        .await;

    let transport = transport_for(&server)?;
    let payload = Payload::new(json!({"message": "login failed", "password": "hunter2"}));
    let response = transport.send(&payload, &["password".to_string()]).await?;

    assert!(response.is_ok());
    Ok(())
}

#[tokio::test]
async fn unreachable_endpoint_is_a_network_error() -> Result<()> {
    let config = TransportConfig {
        // Discard port; nothing listens there.
        endpoint: "http://127.0.0.1:9/api/1/item/".to_string(),
        access_token: Some("test-token".to_string()),
        timeout: Duration::from_secs(2),
        ..Default::default()
    };
    let transport = HttpTransport::new(config)?;

    let error = transport
        .send(&Payload::new(json!({})), &[])
        .await
        .expect_err("nothing listens on the discard port");

    assert!(matches!(error, TransportError::Network { .. }), "got {error:?}");
    assert!(error.is_transient());
    Ok(())
}
