//! Shared test utilities and fixtures for Authprobe integration tests.

use std::sync::Arc;
use std::time::Duration;

use authprobe_core::{FlowStep, ProtocolVersion, RegistrationStrategy};
use authprobe_engine::{create_state_machine, DebugFlowMachine, FlowProfile};
use authprobe_storage::MemoryCredentialStore;

/// Install a fmt subscriber honoring RUST_LOG. Safe to call from every
/// test; later calls are no-ops.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Origin the correlator trusts in tests.
pub const TEST_ORIGIN: &str = "http://localhost:1420";

/// Redirect URI used by every test flow.
pub const TEST_REDIRECT: &str = "http://127.0.0.1:7777/callback";

/// Flow profile pointing at a mock server, DCR + v2025-03-26 by default.
pub fn test_profile(server_url: &str) -> FlowProfile {
    FlowProfile {
        server_url: server_url.to_string(),
        server_id: "srv_test".to_string(),
        legacy_name: None,
        redirect_url: TEST_REDIRECT.to_string(),
        protocol_version: ProtocolVersion::V20250326,
        strategy: RegistrationStrategy::Dcr,
        scopes: vec!["mcp".to_string()],
        custom_headers: vec![],
    }
}

/// Build a machine over an in-memory store.
pub fn test_machine(profile: FlowProfile) -> (Arc<DebugFlowMachine>, Arc<MemoryCredentialStore>) {
    init_tracing();
    let store = Arc::new(MemoryCredentialStore::new());
    let machine = create_state_machine(profile, store.clone(), reqwest::Client::new())
        .expect("test profile must construct");
    (Arc::new(machine), store)
}

/// Drive the machine until it reports `step` or the timeout elapses.
pub async fn wait_for_step(machine: &DebugFlowMachine, step: FlowStep, timeout: Duration) {
    let mut rx = machine.subscribe();
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        if machine.snapshot().await.current_step == step {
            return;
        }
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            panic!(
                "timed out waiting for step {:?}, at {:?} (error: {:?})",
                step,
                machine.snapshot().await.current_step,
                machine.snapshot().await.error
            );
        }
        if tokio::time::timeout(remaining, rx.changed()).await.is_err() {
            // Loop once more to produce the panic with current state
        }
    }
}

/// Metadata document body pointing every endpoint at the mock server.
pub fn metadata_json(server_url: &str) -> serde_json::Value {
    serde_json::json!({
        "issuer": server_url,
        "authorization_endpoint": format!("{}/authorize", server_url),
        "token_endpoint": format!("{}/token", server_url),
        "registration_endpoint": format!("{}/register", server_url),
        "response_types_supported": ["code"],
        "grant_types_supported": ["authorization_code", "refresh_token"],
        "code_challenge_methods_supported": ["S256"]
    })
}
