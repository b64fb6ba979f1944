mod support;

use std::collections::HashMap;
use std::time::Duration;

use oauthcli::auth::{AuthError, DevicePoller, PollOutcome, DEVICE_CODE_GRANT_TYPE};
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use support::{challenge, expired_challenge, CountingProgress};

const TICK: Duration = Duration::from_millis(2);

fn poller(server: &MockServer) -> DevicePoller {
    DevicePoller::new(format!("{}/contoso/oauth2/v2.0/token", server.uri()), "client-1", "shh")
        .with_tick(TICK)
}

async fn mount_pending(server: &MockServer, times: u64) {
    Mock::given(method("POST"))
        .and(path("/contoso/oauth2/v2.0/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "authorization_pending",
            "error_description": "AADSTS70016: pending"
        })))
        .up_to_n_times(times)
        .expect(times)
        .mount(server)
        .await;
}

async fn mount_success(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/contoso/oauth2/v2.0/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token_type": "Bearer",
            "access_token": "at-1",
            "refresh_token": "rt-1",
            "expires_in": 3599
        })))
        .expect(1)
        .mount(server)
        .await;
}

fn form_fields(body: &[u8]) -> HashMap<String, String> {
    let query = String::from_utf8_lossy(body);
    reqwest::Url::parse(&format!("http://form.invalid/?{query}"))
        .expect("form body parses as a query")
        .query_pairs()
        .into_owned()
        .collect()
}

#[tokio::test]
async fn pending_responses_are_retried_until_success() {
    let server = MockServer::start().await;
    mount_pending(&server, 3).await;
    mount_success(&server).await;

    let progress = CountingProgress::default();
    let token = poller(&server)
        .wait_for_authorization(&challenge(2), &progress)
        .await
        .expect("authorized");

    assert_eq!(token.access_token, "at-1");
    assert_eq!(token.refresh_token.as_deref(), Some("rt-1"));
    assert_eq!(progress.pending(), 3);
    // interval ticks after every pending response, none after success
    assert_eq!(progress.ticks(), 6);
    assert_eq!(server.received_requests().await.unwrap().len(), 4);
}

#[tokio::test]
async fn every_request_carries_the_device_code_form() {
    let server = MockServer::start().await;
    mount_pending(&server, 2).await;
    mount_success(&server).await;

    poller(&server)
        .wait_for_authorization(&challenge(1), &CountingProgress::default())
        .await
        .expect("authorized");

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 3);
    for request in requests {
        let fields = form_fields(&request.body);
        assert_eq!(fields["client_secret"], "shh");
        assert_eq!(fields["client_id"], "client-1");
        assert_eq!(fields["device_code"], "device-code-1");
        assert_eq!(fields["grant_type"], DEVICE_CODE_GRANT_TYPE);
        assert_eq!(fields.len(), 4);
    }
}

#[tokio::test]
async fn zero_interval_still_waits_one_tick() {
    let server = MockServer::start().await;
    mount_pending(&server, 2).await;
    mount_success(&server).await;

    let progress = CountingProgress::default();
    poller(&server)
        .wait_for_authorization(&challenge(0), &progress)
        .await
        .expect("authorized");

    assert_eq!(progress.ticks(), 2);
}

#[tokio::test]
async fn provider_error_status_stops_after_one_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/contoso/oauth2/v2.0/token"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": "invalid_client",
            "error_description": "AADSTS7000215: Invalid client secret provided."
        })))
        .expect(1)
        .mount(&server)
        .await;

    let progress = CountingProgress::default();
    let err = poller(&server)
        .wait_for_authorization(&challenge(1), &progress)
        .await
        .unwrap_err();

    match err {
        AuthError::Provider { status, body } => {
            assert_eq!(status, 401);
            assert!(body.contains("AADSTS7000215"));
        }
        other => panic!("expected provider error, got {other:?}"),
    }
    assert_eq!(progress.ticks(), 0);
}

#[tokio::test]
async fn server_error_is_terminal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
        .expect(1)
        .mount(&server)
        .await;

    let err = poller(&server)
        .wait_for_authorization(&challenge(1), &CountingProgress::default())
        .await
        .unwrap_err();

    assert!(matches!(err, AuthError::Provider { status: 500, ref body } if body == "upstream down"));
}

#[tokio::test]
async fn declined_authorization_is_access_denied() {
    let server = MockServer::start().await;
    mount_pending(&server, 1).await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "authorization_declined"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let err = poller(&server)
        .wait_for_authorization(&challenge(1), &CountingProgress::default())
        .await
        .unwrap_err();

    assert!(matches!(err, AuthError::AccessDenied));
}

#[tokio::test]
async fn provider_expiry_is_device_code_expired() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "expired_token"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let err = poller(&server)
        .wait_for_authorization(&challenge(1), &CountingProgress::default())
        .await
        .unwrap_err();

    assert!(matches!(err, AuthError::DeviceCodeExpired));
}

#[tokio::test]
async fn unreadable_success_body_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .expect(1)
        .mount(&server)
        .await;

    let err = poller(&server)
        .wait_for_authorization(&challenge(1), &CountingProgress::default())
        .await
        .unwrap_err();

    assert!(matches!(err, AuthError::Serialization(_)));
}

#[tokio::test]
async fn transport_failure_is_reported_not_retried() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let poller = DevicePoller::new(format!("http://{addr}/token"), "client-1", "").with_tick(TICK);
    let outcome = poller.poll_once(&challenge(1)).await.unwrap();
    assert!(matches!(outcome, PollOutcome::TransportError(_)));
    assert!(outcome.is_terminal());

    let progress = CountingProgress::default();
    let err = poller
        .wait_for_authorization(&challenge(1), &progress)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Network(_)));
    assert_eq!(progress.ticks(), 0);
}

// Polling has no deadline unless asked for one; the provider decides when a
// device code is dead.
#[tokio::test]
async fn polling_ignores_local_expiry_by_default() {
    let server = MockServer::start().await;
    mount_pending(&server, 1).await;
    mount_success(&server).await;

    let token = poller(&server)
        .wait_for_authorization(&expired_challenge(1), &CountingProgress::default())
        .await
        .expect("authorized despite local expiry");

    assert_eq!(token.access_token, "at-1");
}

#[tokio::test]
async fn expiry_check_stops_before_sending_anything() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let err = poller(&server)
        .with_expiry_check(true)
        .wait_for_authorization(&expired_challenge(1), &CountingProgress::default())
        .await
        .unwrap_err();

    assert!(matches!(err, AuthError::DeviceCodeExpired));
}

#[tokio::test]
async fn expiry_check_allows_a_live_challenge() {
    let server = MockServer::start().await;
    mount_pending(&server, 1).await;
    mount_success(&server).await;

    let token = poller(&server)
        .with_expiry_check(true)
        .wait_for_authorization(&challenge(1), &CountingProgress::default())
        .await
        .expect("authorized");

    assert_eq!(token.access_token, "at-1");
}
