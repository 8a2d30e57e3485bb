//! Callback correlation tests: origin trust, nonce checks, dedup, staleness.

use std::time::Duration;

use authprobe_core::FlowStep;
use authprobe_engine::{CallbackChannels, CallbackCorrelator, CallbackPayload, CALLBACK_KIND};
use authprobe_tests::{metadata_json, test_machine, test_profile, wait_for_step, TEST_ORIGIN};
use pretty_assertions::assert_eq;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TIMEOUT: Duration = Duration::from_secs(3);
const TEST_DEBOUNCE: Duration = Duration::from_millis(10);

/// Time to let the correlator tasks drain a delivery that should be dropped.
const SETTLE: Duration = Duration::from_millis(100);

async fn mount_happy_server(server: &MockServer, expected_token_calls: u64) {
    Mock::given(method("GET"))
        .and(path("/.well-known/oauth-authorization-server"))
        .respond_with(ResponseTemplate::new(200).set_body_json(metadata_json(&server.uri())))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/register"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
            "client_id": "client_cb"
        })))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "at_cb",
            "token_type": "Bearer"
        })))
        .expect(expected_token_calls)
        .mount(server)
        .await;
}

/// Walk a DCR flow to the point where a callback is accepted and return
/// the state nonce baked into the authorization URL.
async fn walk_to_authorization(
    machine: &authprobe_engine::DebugFlowMachine,
) -> String {
    for _ in 0..4 {
        machine.proceed_to_next_step().await;
    }
    let snapshot = machine.snapshot().await;
    assert_eq!(snapshot.current_step, FlowStep::AuthorizationRequest);
    snapshot.state.expect("state nonce present")
}

#[tokio::test]
async fn matching_nonce_advances_to_complete() {
    let server = MockServer::start().await;
    mount_happy_server(&server, 1).await;

    let (machine, _store) = test_machine(test_profile(&server.uri()));
    let channels = CallbackChannels::new();
    let _correlator =
        CallbackCorrelator::with_debounce(&channels, machine.clone(), TEST_ORIGIN, TEST_DEBOUNCE);

    let nonce = walk_to_authorization(&machine).await;
    channels.deliver_message(TEST_ORIGIN, CallbackPayload::new("code_ok", nonce));

    wait_for_step(&machine, FlowStep::Complete, TIMEOUT).await;
    assert_eq!(
        machine.snapshot().await.access_token.as_deref(),
        Some("at_cb")
    );
}

#[tokio::test]
async fn mismatched_nonce_records_error_and_holds_step() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/.well-known/oauth-authorization-server"))
        .respond_with(ResponseTemplate::new(200).set_body_json(metadata_json(&server.uri())))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/register"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
            "client_id": "client_cb"
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let (machine, _store) = test_machine(test_profile(&server.uri()));
    let channels = CallbackChannels::new();
    let _correlator =
        CallbackCorrelator::with_debounce(&channels, machine.clone(), TEST_ORIGIN, TEST_DEBOUNCE);

    walk_to_authorization(&machine).await;
    channels.deliver_broadcast(CallbackPayload::new("code_bad", "not-the-nonce"));
    tokio::time::sleep(SETTLE).await;

    let snapshot = machine.snapshot().await;
    assert_eq!(snapshot.current_step, FlowStep::AuthorizationRequest);
    assert!(snapshot
        .error
        .as_deref()
        .is_some_and(|e| e.contains("State parameter mismatch")));
    assert!(snapshot.authorization_code.is_none());
}

#[tokio::test]
async fn duplicate_code_over_both_channels_exchanges_once() {
    let server = MockServer::start().await;
    mount_happy_server(&server, 1).await;

    let (machine, _store) = test_machine(test_profile(&server.uri()));
    let channels = CallbackChannels::new();
    let _correlator =
        CallbackCorrelator::with_debounce(&channels, machine.clone(), TEST_ORIGIN, TEST_DEBOUNCE);

    let nonce = walk_to_authorization(&machine).await;
    // Host browsers often fire both paths for the same redirect.
    channels.deliver_message(TEST_ORIGIN, CallbackPayload::new("code_dup", nonce.clone()));
    channels.deliver_broadcast(CallbackPayload::new("code_dup", nonce));

    wait_for_step(&machine, FlowStep::Complete, TIMEOUT).await;
    tokio::time::sleep(SETTLE).await;
    // The expect(1) on the token mock verifies the single exchange on drop.
}

#[tokio::test]
async fn cross_origin_message_is_discarded() {
    let server = MockServer::start().await;
    mount_happy_server(&server, 0).await;

    let (machine, _store) = test_machine(test_profile(&server.uri()));
    let channels = CallbackChannels::new();
    let _correlator =
        CallbackCorrelator::with_debounce(&channels, machine.clone(), TEST_ORIGIN, TEST_DEBOUNCE);

    let nonce = walk_to_authorization(&machine).await;
    channels.deliver_message(
        "https://evil.example.com",
        CallbackPayload::new("code_evil", nonce),
    );
    tokio::time::sleep(SETTLE).await;

    let snapshot = machine.snapshot().await;
    assert_eq!(snapshot.current_step, FlowStep::AuthorizationRequest);
    assert!(snapshot.error.is_none());
    assert!(snapshot.authorization_code.is_none());
}

#[tokio::test]
async fn malformed_payloads_are_ignored() {
    let server = MockServer::start().await;
    mount_happy_server(&server, 0).await;

    let (machine, _store) = test_machine(test_profile(&server.uri()));
    let channels = CallbackChannels::new();
    let _correlator =
        CallbackCorrelator::with_debounce(&channels, machine.clone(), TEST_ORIGIN, TEST_DEBOUNCE);

    let nonce = walk_to_authorization(&machine).await;

    // Wrong discriminator.
    channels.deliver_broadcast(CallbackPayload {
        kind: "SOMETHING_ELSE".to_string(),
        code: "code_x".to_string(),
        state: nonce.clone(),
    });
    // Empty code.
    channels.deliver_broadcast(CallbackPayload {
        kind: CALLBACK_KIND.to_string(),
        code: String::new(),
        state: nonce,
    });
    tokio::time::sleep(SETTLE).await;

    let snapshot = machine.snapshot().await;
    assert_eq!(snapshot.current_step, FlowStep::AuthorizationRequest);
    assert!(snapshot.error.is_none());
}

#[tokio::test]
async fn callback_before_authorization_step_is_ignored() {
    let server = MockServer::start().await;
    mount_happy_server(&server, 0).await;

    let (machine, _store) = test_machine(test_profile(&server.uri()));
    let channels = CallbackChannels::new();
    let _correlator =
        CallbackCorrelator::with_debounce(&channels, machine.clone(), TEST_ORIGIN, TEST_DEBOUNCE);

    channels.deliver_broadcast(CallbackPayload::new("code_early", "whatever"));
    tokio::time::sleep(SETTLE).await;

    let snapshot = machine.snapshot().await;
    assert_eq!(snapshot.current_step, FlowStep::Configure);
    assert!(snapshot.error.is_none());
}

#[tokio::test]
async fn reset_mid_authorization_rejects_stale_callback() {
    let server = MockServer::start().await;
    mount_happy_server(&server, 0).await;

    let (machine, _store) = test_machine(test_profile(&server.uri()));
    let channels = CallbackChannels::new();
    let _correlator =
        CallbackCorrelator::with_debounce(&channels, machine.clone(), TEST_ORIGIN, TEST_DEBOUNCE);

    let nonce = walk_to_authorization(&machine).await;
    machine.reset(None).await;

    channels.deliver_broadcast(CallbackPayload::new("code_stale", nonce));
    tokio::time::sleep(SETTLE).await;

    let snapshot = machine.snapshot().await;
    assert_eq!(snapshot.current_step, FlowStep::Configure);
    assert!(snapshot.access_token.is_none());
}

#[tokio::test]
async fn cleared_nonce_at_authorization_step_reports_reset() {
    let server = MockServer::start().await;
    mount_happy_server(&server, 0).await;

    let (machine, _store) = test_machine(test_profile(&server.uri()));
    let channels = CallbackChannels::new();
    let _correlator =
        CallbackCorrelator::with_debounce(&channels, machine.clone(), TEST_ORIGIN, TEST_DEBOUNCE);

    walk_to_authorization(&machine).await;
    // Simulate a racing reset that wiped the nonce but not yet the step.
    machine.state_handle().update(|s| s.state = None).await;

    channels.deliver_broadcast(CallbackPayload::new("code_raced", "anything"));
    tokio::time::sleep(SETTLE).await;

    let snapshot = machine.snapshot().await;
    assert!(snapshot
        .error
        .as_deref()
        .is_some_and(|e| e.contains("reset")));
    assert!(snapshot.authorization_code.is_none());
}

#[tokio::test]
async fn newer_code_supersedes_pending_exchange() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/.well-known/oauth-authorization-server"))
        .respond_with(ResponseTemplate::new(200).set_body_json(metadata_json(&server.uri())))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/register"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
            "client_id": "client_cb"
        })))
        .mount(&server)
        .await;
    // Only the second code may reach the token endpoint.
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("code=code_second"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "at_second",
            "token_type": "Bearer"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("code=code_first"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let (machine, _store) = test_machine(test_profile(&server.uri()));
    let channels = CallbackChannels::new();
    // Wide debounce so the second delivery lands inside the window.
    let _correlator = CallbackCorrelator::with_debounce(
        &channels,
        machine.clone(),
        TEST_ORIGIN,
        Duration::from_millis(200),
    );

    let nonce = walk_to_authorization(&machine).await;
    channels.deliver_broadcast(CallbackPayload::new("code_first", nonce.clone()));
    tokio::time::sleep(Duration::from_millis(30)).await;
    channels.deliver_broadcast(CallbackPayload::new("code_second", nonce));

    wait_for_step(&machine, FlowStep::Complete, TIMEOUT).await;
    assert_eq!(
        machine.snapshot().await.access_token.as_deref(),
        Some("at_second")
    );
}
