//! Flow state entity - the record of one interactive OAuth debug session.
//!
//! The state machine and the callback correlator are the only writers;
//! the host subscribes to snapshots for rendering.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One step of the authorization-code-with-PKCE debug flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowStep {
    /// Initial step: server URL and strategy are chosen, nothing executed yet.
    Configure,
    /// Fetch the server's OAuth metadata document.
    DiscoverMetadata,
    /// Obtain a client identity (DCR or CIMD; skipped for pre-registered).
    RegisterClient,
    /// Generate the PKCE verifier/challenge pair.
    GeneratePkceParameters,
    /// Build the authorization URL and wait for the browser redirect.
    AuthorizationRequest,
    /// Authorization code captured; exchange is pending.
    ReceivedAuthorizationCode,
    /// Exchange the code + verifier at the token endpoint.
    ExchangeCode,
    /// Terminal step: tokens obtained.
    Complete,
}

impl FlowStep {
    /// Human-readable label used in trace lines.
    pub fn label(&self) -> &'static str {
        match self {
            FlowStep::Configure => "configure",
            FlowStep::DiscoverMetadata => "discover_metadata",
            FlowStep::RegisterClient => "register_client",
            FlowStep::GeneratePkceParameters => "generate_pkce_parameters",
            FlowStep::AuthorizationRequest => "authorization_request",
            FlowStep::ReceivedAuthorizationCode => "received_authorization_code",
            FlowStep::ExchangeCode => "exchange_code",
            FlowStep::Complete => "complete",
        }
    }

    /// Steps in which a browser callback may legitimately arrive.
    pub fn accepts_callback(&self) -> bool {
        matches!(
            self,
            FlowStep::AuthorizationRequest | FlowStep::ReceivedAuthorizationCode
        )
    }
}

/// Snapshot of a single HTTP request/response pair made during the flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpExchange {
    pub method: String,
    pub url: String,
    /// Request headers shown to the operator (sensitive values included on
    /// purpose: this is a debugging harness).
    #[serde(default)]
    pub request_headers: Vec<(String, String)>,
    #[serde(default)]
    pub request_body: Option<String>,
    pub status: u16,
    #[serde(default)]
    pub response_body: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl HttpExchange {
    pub fn new(method: impl Into<String>, url: impl Into<String>, status: u16) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            request_headers: Vec::new(),
            request_body: None,
            status,
            response_body: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_request_body(mut self, body: impl Into<String>) -> Self {
        self.request_body = Some(body.into());
        self
    }

    pub fn with_response_body(mut self, body: impl Into<String>) -> Self {
        self.response_body = Some(body.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request_headers.push((name.into(), value.into()));
        self
    }
}

/// Token bundle handed to the host once the flow reaches `Complete`.
///
/// The host owns connect-with-tokens / refresh lifecycle; the engine only
/// extracts what the exchange produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenBundle {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_type: Option<String>,
    pub expires_in: Option<i64>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

/// State of one active OAuth debug session.
///
/// Created empty when a session starts or the server is switched, mutated
/// exclusively by the state machine and the correlator, and replaced by a
/// fresh instance on reset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowState {
    /// Current position in the step sequence. Advances forward only, except
    /// for an explicit reset back to `Configure`.
    pub current_step: FlowStep,

    /// True only while an async sub-step is in flight. Guards against
    /// concurrent double-advance from rapid input.
    pub is_initiating_auth: bool,

    /// Random nonce bound to the authorization request (`state` parameter).
    /// Single-use: cleared after the matching callback completes exchange.
    pub state: Option<String>,

    /// PKCE verifier - never transmitted until the exchange step.
    pub code_verifier: Option<String>,

    /// PKCE challenge derived from the verifier (S256).
    pub code_challenge: Option<String>,

    /// Authorization code delivered by the callback correlator.
    pub authorization_code: Option<String>,

    /// Fully-built authorization URL, present once the request step ran.
    pub authorization_url: Option<String>,

    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub token_type: Option<String>,
    pub expires_in: Option<i64>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,

    /// Ordered human-readable trace lines, append-only until cleared.
    pub info_logs: Vec<String>,

    /// Ordered request/response snapshots, append-only until cleared.
    pub http_history: Vec<HttpExchange>,

    /// Last fatal message for the current step. Cleared on every successful
    /// transition, never auto-cleared on failure.
    pub error: Option<String>,

    /// Target server for this session. Immutable for the session lifetime.
    pub server_url: String,
}

impl FlowState {
    /// Create an empty flow state bound to a server URL.
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            current_step: FlowStep::Configure,
            is_initiating_auth: false,
            state: None,
            code_verifier: None,
            code_challenge: None,
            authorization_code: None,
            authorization_url: None,
            access_token: None,
            refresh_token: None,
            token_type: None,
            expires_in: None,
            client_id: None,
            client_secret: None,
            info_logs: Vec::new(),
            http_history: Vec::new(),
            error: None,
            server_url: server_url.into(),
        }
    }

    /// Append a trace line.
    pub fn log(&mut self, line: impl Into<String>) {
        self.info_logs.push(line.into());
    }

    /// Token bundle extracted on completion, if the flow finished.
    pub fn token_bundle(&self) -> Option<TokenBundle> {
        if self.current_step != FlowStep::Complete {
            return None;
        }
        let access_token = self.access_token.clone()?;
        Some(TokenBundle {
            access_token,
            refresh_token: self.refresh_token.clone(),
            token_type: self.token_type.clone(),
            expires_in: self.expires_in,
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
        })
    }
}
