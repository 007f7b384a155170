//! Integration tests for the instance gateway client using wiremock
//!
//! These cover the retry policy split: session lifecycle calls retry
//! transient failures, message sends never retry at the transport level.

use std::time::Duration;

use herald::gateway::{ClientConfig, GatewayClient, SendErrorKind, SendOutcome};
use herald::models::AccountStatus;
use herald::utils::error::GatewayError;
use serde_json::json;
use tokio_test::assert_ok;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Client with millisecond retry delays so retry tests stay fast
fn fast_client() -> GatewayClient {
    let config = ClientConfig {
        request_timeout: Duration::from_secs(5),
        retry_count: 3,
        retry_base_delay_ms: 10,
        api_token: None,
    };
    GatewayClient::new(config).unwrap()
}

#[tokio::test]
async fn test_create_session_success() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/sessions"))
        .and(body_json(json!({ "session_id": "ws-1-main" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": {
                "session_id": "ws-1-main",
                "status": "qr_scanning",
                "ban_risk": 5
            },
            "error": null
        })))
        .mount(&server)
        .await;

    let status = fast_client()
        .create_session(&server.uri(), "ws-1-main")
        .await
        .unwrap();

    assert_eq!(status.session_id, "ws-1-main");
    assert_eq!(status.account_status(), Some(AccountStatus::QrScanning));
    assert_eq!(status.ban_risk, Some(5));
}

#[tokio::test]
async fn test_lifecycle_calls_retry_transient_errors() {
    let server = MockServer::start().await;

    // Two instance errors, then the reconnect goes through
    Mock::given(method("POST"))
        .and(path("/api/sessions/ws-1-main/reconnect"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(2)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/sessions/ws-1-main/reconnect"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let result = fast_client()
        .reconnect_session(&server.uri(), "ws-1-main")
        .await;

    assert_ok!(result);
}

#[tokio::test]
async fn test_status_of_unknown_session_is_terminal() {
    let server = MockServer::start().await;

    // A missing session is not retried; exactly one request must arrive
    Mock::given(method("GET"))
        .and(path("/api/sessions/ghost/status"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let err = fast_client()
        .session_status(&server.uri(), "ghost")
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::SessionNotFound(ref s) if s == "ghost"));
    assert!(!err.is_recoverable());
}

#[tokio::test]
async fn test_disconnect_of_missing_session_is_ok() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/api/sessions/ws-1-main"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let result = fast_client()
        .disconnect_session(&server.uri(), "ws-1-main")
        .await;

    assert!(result.is_ok(), "Repeated disconnects must be harmless");
}

#[tokio::test]
async fn test_send_message_success() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/sessions/ws-1-main/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": { "message_id": "wamid.42" },
            "error": null
        })))
        .mount(&server)
        .await;

    let payload = json!({ "to": "5511999990000", "body": "Olá" });
    let outcome = fast_client()
        .send_message(&server.uri(), "ws-1-main", &payload)
        .await;

    match outcome {
        SendOutcome::Sent { message_id } => assert_eq!(message_id.as_deref(), Some("wamid.42")),
        other => panic!("Expected a sent outcome, got {other:?}"),
    }
}

#[tokio::test]
async fn test_send_message_never_retries() {
    let server = MockServer::start().await;

    // A timed-out or failed send may still have gone through on the
    // instance side; exactly one attempt must arrive no matter what
    Mock::given(method("POST"))
        .and(path("/api/sessions/ws-1-main/messages"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let payload = json!({ "to": "5511999990000", "body": "Olá" });
    let outcome = fast_client()
        .send_message(&server.uri(), "ws-1-main", &payload)
        .await;

    let SendOutcome::Failed { kind, .. } = outcome else {
        panic!("Expected a failed outcome");
    };
    assert_eq!(kind, SendErrorKind::Transient);
}

#[tokio::test]
async fn test_send_rejection_in_body_is_permanent() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/sessions/ws-1-main/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": false,
            "data": null,
            "error": "invalid phone number"
        })))
        .mount(&server)
        .await;

    let payload = json!({ "to": "123", "body": "Olá" });
    let outcome = fast_client()
        .send_message(&server.uri(), "ws-1-main", &payload)
        .await;

    let SendOutcome::Failed { kind, message } = outcome else {
        panic!("Expected a failed outcome");
    };
    assert_eq!(kind, SendErrorKind::PermanentValidation);
    assert!(message.contains("invalid phone number"));
    assert!(!kind.allows_fallback());
}

#[tokio::test]
async fn test_send_http_status_classification() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/sessions/bad-payload/messages"))
        .respond_with(ResponseTemplate::new(422))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/sessions/logged-out/messages"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let client = fast_client();
    let payload = json!({ "to": "5511999990000", "body": "Olá" });

    let SendOutcome::Failed { kind, .. } = client
        .send_message(&server.uri(), "bad-payload", &payload)
        .await
    else {
        panic!("Expected a failed outcome");
    };
    assert_eq!(kind, SendErrorKind::PermanentValidation);

    let SendOutcome::Failed { kind, .. } = client
        .send_message(&server.uri(), "logged-out", &payload)
        .await
    else {
        panic!("Expected a failed outcome");
    };
    assert_eq!(kind, SendErrorKind::SessionUnavailable);
    assert!(kind.allows_fallback());
}

#[tokio::test]
async fn test_bearer_token_is_attached() {
    let server = MockServer::start().await;

    // Without the Authorization header nothing matches and the call fails
    Mock::given(method("POST"))
        .and(path("/api/sessions/ws-1-main/reconnect"))
        .and(header("authorization", "Bearer instance-token"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let config = ClientConfig {
        request_timeout: Duration::from_secs(5),
        retry_count: 0,
        retry_base_delay_ms: 10,
        api_token: Some("instance-token".to_string()),
    };
    let client = GatewayClient::new(config).unwrap();

    let result = client.reconnect_session(&server.uri(), "ws-1-main").await;
    assert!(result.is_ok());
}
