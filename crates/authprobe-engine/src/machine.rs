//! Protocol state machine
//!
//! Sequences one OAuth debug session over `FlowState.current_step`.
//! `current_step` records the step most recently completed; each
//! `proceed_to_next_step()` call executes the action that realizes the
//! successor declared by the registration strategy, so the flow waits at
//! `authorization_request` with the URL already built until the callback
//! correlator delivers a code.
//!
//! Step failures never escape the public contract: they are written into
//! `FlowState.error` and the step stays put for retry.

use std::sync::Arc;

use authprobe_core::{
    ClientRegistrationRecord, CredentialKind, CredentialStore, FlowState, FlowStep,
    RegistrationStrategy, ServerIdentity, StoredTokens, TokenBundle,
};
use chrono::Utc;
use serde_json::json;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};
use url::Url;

use crate::debounce::DebouncedCall;
use crate::error::StepError;
use crate::factory::{FlowProfile, VersionAdapter};
use crate::oauth::{
    derive_client_id, DcrClient, DcrRegistrationRequest, ExchangeParams, OAuthDiscovery,
    OAuthMetadata, PkceChallenge, TokenClient,
};
use crate::state::SharedFlowState;

/// State machine for one (server, profile) debug session.
pub struct DebugFlowMachine {
    profile: FlowProfile,
    adapter: VersionAdapter,
    identity: ServerIdentity,
    state: SharedFlowState,
    store: Arc<dyn CredentialStore>,
    discovery: OAuthDiscovery,
    dcr: DcrClient,
    tokens: TokenClient,
    /// Discovered (or fallback) metadata, cached for the session.
    metadata: Mutex<Option<OAuthMetadata>>,
    /// The debounced exchange slot shared with the callback correlator.
    pending_exchange: Arc<DebouncedCall>,
}

impl DebugFlowMachine {
    pub(crate) fn new(
        profile: FlowProfile,
        adapter: VersionAdapter,
        store: Arc<dyn CredentialStore>,
        http_client: reqwest::Client,
    ) -> Self {
        let identity = profile.identity();
        let state = SharedFlowState::from_state(Self::initial_state(&profile));

        Self {
            identity,
            state,
            store,
            discovery: OAuthDiscovery::new(http_client.clone()),
            dcr: DcrClient::new(http_client.clone()),
            tokens: TokenClient::new(http_client, profile.custom_headers.clone()),
            metadata: Mutex::new(None),
            pending_exchange: Arc::new(DebouncedCall::new()),
            adapter,
            profile,
        }
    }

    /// Fresh flow state for this profile. Pre-registered credentials are
    /// seeded immediately so the skipped registration step needs no action.
    fn initial_state(profile: &FlowProfile) -> FlowState {
        let mut state = FlowState::new(profile.server_url.clone());
        if let RegistrationStrategy::Preregistered {
            client_id,
            client_secret,
        } = &profile.strategy
        {
            state.client_id = Some(client_id.clone());
            state.client_secret = client_secret.clone();
        }
        state
    }

    /// Handle to the shared flow state (the correlator writes through it).
    pub fn state_handle(&self) -> &SharedFlowState {
        &self.state
    }

    /// Subscribe to flow state snapshots for rendering.
    pub fn subscribe(&self) -> watch::Receiver<FlowState> {
        self.state.subscribe()
    }

    pub async fn snapshot(&self) -> FlowState {
        self.state.snapshot().await
    }

    pub fn profile(&self) -> &FlowProfile {
        &self.profile
    }

    /// The debounce slot the correlator schedules exchanges through.
    pub fn pending_exchange(&self) -> Arc<DebouncedCall> {
        self.pending_exchange.clone()
    }

    /// Token bundle for the host, once the flow is complete.
    pub async fn token_bundle(&self) -> Option<TokenBundle> {
        self.state.snapshot().await.token_bundle()
    }

    /// Advance the flow by one step.
    ///
    /// No-op while a transition is already in flight. On success the step
    /// advances and `error` clears; on failure `error` is set, the step is
    /// unchanged, and the same call may be retried.
    pub async fn proceed_to_next_step(&self) {
        // Guard and flag must be atomic with reading the step.
        let current = self
            .state
            .update(|s| {
                if s.is_initiating_auth {
                    None
                } else {
                    s.is_initiating_auth = true;
                    Some(s.current_step)
                }
            })
            .await;
        let Some(current) = current else {
            debug!("[Flow] proceed_to_next_step ignored - transition in flight");
            return;
        };

        let result = self.run_transition(current).await;

        self.state
            .update(|s| {
                if let Err(e) = &result {
                    warn!("[Flow] Step after {} failed: {}", current.label(), e);
                    s.error = Some(e.to_string());
                }
                s.is_initiating_auth = false;
            })
            .await;
    }

    /// Execute the action realizing the successor of `current`.
    async fn run_transition(&self, current: FlowStep) -> Result<(), StepError> {
        let Some(next) = self.profile.strategy.next_step(current) else {
            // Terminal: proceed on `complete` is a no-op.
            return Ok(());
        };

        match next {
            FlowStep::DiscoverMetadata => self.step_discover().await,
            FlowStep::RegisterClient => self.step_register().await,
            FlowStep::GeneratePkceParameters => self.step_generate_pkce().await,
            FlowStep::AuthorizationRequest => self.step_build_authorization().await,
            // Passive: only the correlator moves past authorization_request.
            FlowStep::ReceivedAuthorizationCode => {
                self.state
                    .update(|s| s.log("Waiting for authorization callback from the browser"))
                    .await;
                Ok(())
            }
            FlowStep::ExchangeCode | FlowStep::Complete => self.step_exchange().await,
            FlowStep::Configure => Ok(()),
        }
    }

    /// First transition: record configuration, consult the store, discover
    /// metadata. Discovery is never fatal - defaults substitute on miss.
    async fn step_discover(&self) -> Result<(), StepError> {
        info!(
            "[Flow] Starting flow for {} (strategy={}, version={})",
            self.profile.server_url,
            self.profile.strategy.label(),
            self.adapter.version().as_str()
        );

        self.persist_config().await;

        let mut bootstrap_logs = Vec::new();
        match self.store.has_oauth_config(&self.identity).await {
            Ok(true) => bootstrap_logs
                .push("Found stored OAuth data for this server".to_string()),
            Ok(false) => {}
            Err(e) => warn!("[Flow] Store lookup failed: {}", e),
        }
        if let Ok(Some(reg)) = self.store.get_client_registration(&self.identity).await {
            bootstrap_logs.push(format!(
                "Stored client registration available (client_id={})",
                reg.client_id
            ));
        }

        let outcome = self
            .discovery
            .discover(&self.profile.server_url, self.adapter.well_known_paths())
            .await;

        let log_line = if outcome.from_fallback {
            format!(
                "No metadata document found - using default endpoints derived from {}",
                self.profile.server_url
            )
        } else {
            format!(
                "Discovered OAuth metadata (token endpoint: {})",
                outcome.metadata.token_endpoint
            )
        };

        *self.metadata.lock().await = Some(outcome.metadata);

        self.state
            .update(|s| {
                for line in bootstrap_logs {
                    s.log(line);
                }
                s.http_history.extend(outcome.exchanges);
                s.log(log_line);
                s.current_step = FlowStep::DiscoverMetadata;
                s.error = None;
            })
            .await;
        Ok(())
    }

    /// Obtain a client identity (DCR POST or CIMD derivation).
    async fn step_register(&self) -> Result<(), StepError> {
        match &self.profile.strategy {
            RegistrationStrategy::Dcr => self.register_dcr().await,
            RegistrationStrategy::Cimd {
                client_metadata_url,
            } => {
                let client_id = derive_client_id(client_metadata_url)?;
                self.persist_registration(&client_id, None).await;
                self.state
                    .update(|s| {
                        s.client_id = Some(client_id.clone());
                        s.log(format!("Using CIMD client identity: {}", client_id));
                        s.current_step = FlowStep::RegisterClient;
                        s.error = None;
                    })
                    .await;
                Ok(())
            }
            // Not present in the preregistered step sequence.
            RegistrationStrategy::Preregistered { .. } => Ok(()),
        }
    }

    async fn register_dcr(&self) -> Result<(), StepError> {
        // A registration stored by an earlier session is reused rather than
        // re-registered; flow bootstrap reads are part of the store contract.
        if let Ok(Some(reg)) = self.store.get_client_registration(&self.identity).await {
            info!("[Flow] Reusing stored client registration {}", reg.client_id);
            self.state
                .update(|s| {
                    s.client_id = Some(reg.client_id.clone());
                    s.client_secret = reg.client_secret.clone();
                    s.log(format!(
                        "Reusing stored client registration (client_id={})",
                        reg.client_id
                    ));
                    s.current_step = FlowStep::RegisterClient;
                    s.error = None;
                })
                .await;
            return Ok(());
        }

        let endpoint = {
            let metadata = self.metadata.lock().await;
            metadata
                .as_ref()
                .and_then(|m| m.registration_endpoint.clone())
                .ok_or_else(|| {
                    StepError::NotReady(
                        "Server advertises no registration endpoint; use a pre-registered client"
                            .to_string(),
                    )
                })?
        };

        let request =
            DcrRegistrationRequest::for_redirect(&self.profile.redirect_url, &self.profile.scopes);

        match self.dcr.register(&endpoint, &request).await {
            Ok((registered, exchange)) => {
                self.persist_registration(&registered.client_id, registered.client_secret.clone())
                    .await;
                self.state
                    .update(|s| {
                        s.http_history.push(exchange);
                        s.client_id = Some(registered.client_id.clone());
                        s.client_secret = registered.client_secret.clone();
                        s.log(format!(
                            "Registered client via DCR (client_id={})",
                            registered.client_id
                        ));
                        s.current_step = FlowStep::RegisterClient;
                        s.error = None;
                    })
                    .await;
                Ok(())
            }
            Err((e, exchange)) => {
                if let Some(exchange) = exchange {
                    self.state.update(|s| s.http_history.push(exchange)).await;
                }
                Err(e)
            }
        }
    }

    /// Generate the PKCE pair. Re-running regenerates and invalidates any
    /// in-flight authorization request.
    async fn step_generate_pkce(&self) -> Result<(), StepError> {
        let pkce = PkceChallenge::generate();

        if let Err(e) = self
            .store
            .set(
                CredentialKind::PkceVerifier,
                &self.profile.server_id,
                json!({ "verifier": pkce.verifier }),
            )
            .await
        {
            warn!("[Flow] Failed to persist PKCE verifier: {}", e);
        }

        self.state
            .update(|s| {
                s.code_verifier = Some(pkce.verifier.clone());
                s.code_challenge = Some(pkce.challenge.clone());
                // Any previously built authorization request is now stale.
                s.state = None;
                s.authorization_url = None;
                s.authorization_code = None;
                s.log("Generated PKCE verifier and S256 challenge");
                if s.current_step != FlowStep::GeneratePkceParameters {
                    s.current_step = FlowStep::GeneratePkceParameters;
                }
                s.error = None;
            })
            .await;
        Ok(())
    }

    /// Build the authorization URL with a fresh state nonce. Does not
    /// navigate - the host decides when to open it.
    async fn step_build_authorization(&self) -> Result<(), StepError> {
        let snapshot = self.state.snapshot().await;
        let client_id = snapshot
            .client_id
            .ok_or_else(|| StepError::NotReady("No client id - registration incomplete".to_string()))?;
        let challenge = snapshot.code_challenge.ok_or_else(|| {
            StepError::NotReady("No PKCE challenge - generate parameters first".to_string())
        })?;

        let authorization_endpoint = {
            let metadata = self.metadata.lock().await;
            metadata
                .as_ref()
                .map(|m| m.authorization_endpoint.clone())
                .ok_or_else(|| StepError::NotReady("Metadata not discovered".to_string()))?
        };

        let nonce = crate::oauth::generate_state_nonce();

        let mut url = Url::parse(&authorization_endpoint)
            .map_err(|e| StepError::InvalidResponse(format!("bad authorization endpoint: {}", e)))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("response_type", "code");
            query.append_pair("client_id", &client_id);
            query.append_pair("redirect_uri", &self.profile.redirect_url);
            if !self.profile.scopes.is_empty() {
                query.append_pair("scope", &self.profile.scopes.join(" "));
            }
            query.append_pair("state", &nonce);
            query.append_pair("code_challenge", &challenge);
            query.append_pair("code_challenge_method", "S256");
            for (k, v) in self.adapter.extra_params(&self.profile.server_url) {
                query.append_pair(&k, &v);
            }
        }
        let authorization_url = url.to_string();

        debug!("[Flow] Built authorization URL: {}", authorization_url);

        self.state
            .update(|s| {
                s.state = Some(nonce);
                s.authorization_url = Some(authorization_url.clone());
                s.log(format!("Authorization URL ready: {}", authorization_url));
                s.current_step = FlowStep::AuthorizationRequest;
                s.error = None;
            })
            .await;
        Ok(())
    }

    /// Exchange the captured code for tokens. Enters `exchange_code`
    /// visibly; failure stays there so the operator can retry without
    /// restarting the flow.
    async fn step_exchange(&self) -> Result<(), StepError> {
        self.state
            .update(|s| {
                if s.current_step == FlowStep::ReceivedAuthorizationCode {
                    s.current_step = FlowStep::ExchangeCode;
                }
            })
            .await;

        let snapshot = self.state.snapshot().await;
        let code = snapshot
            .authorization_code
            .ok_or_else(|| StepError::NotReady("No authorization code captured".to_string()))?;
        let verifier = snapshot
            .code_verifier
            .ok_or_else(|| StepError::NotReady("No PKCE verifier".to_string()))?;
        let client_id = snapshot
            .client_id
            .ok_or_else(|| StepError::NotReady("No client id".to_string()))?;

        let token_endpoint = {
            let metadata = self.metadata.lock().await;
            metadata
                .as_ref()
                .map(|m| m.token_endpoint.clone())
                .ok_or_else(|| StepError::NotReady("Metadata not discovered".to_string()))?
        };

        let extra = self.adapter.extra_params(&self.profile.server_url);
        let outcome = self
            .tokens
            .exchange_code(
                &token_endpoint,
                ExchangeParams {
                    code: &code,
                    code_verifier: &verifier,
                    client_id: &client_id,
                    client_secret: snapshot.client_secret.as_deref(),
                    redirect_uri: &self.profile.redirect_url,
                },
                &extra,
            )
            .await?;

        let (exchange, response) = (outcome.exchange, outcome.response);
        match response {
            Ok(token) => {
                self.persist_tokens(&token.access_token, token.refresh_token.clone(),
                    token.token_type.clone(), token.expires_in, &client_id)
                    .await;
                self.state
                    .update(|s| {
                        s.http_history.push(exchange);
                        s.access_token = Some(token.access_token.clone());
                        s.refresh_token = token.refresh_token.clone();
                        s.token_type = token.token_type.clone();
                        s.expires_in = token.expires_in;
                        // Single-use artifacts
                        s.authorization_code = None;
                        s.state = None;
                        s.log("Token exchange successful - flow complete");
                        s.current_step = FlowStep::Complete;
                        s.error = None;
                    })
                    .await;
                Ok(())
            }
            Err(e) => {
                self.state.update(|s| s.http_history.push(exchange)).await;
                Err(e)
            }
        }
    }

    /// Refresh tokens in place. Distinct from the step sequence: callable
    /// only once the flow is complete and a refresh token is present;
    /// `current_step` never changes.
    pub async fn refresh(&self) {
        let ready = self
            .state
            .update(|s| {
                if s.is_initiating_auth {
                    return None;
                }
                if s.current_step != FlowStep::Complete {
                    s.error = Some("Refresh requires a completed flow".to_string());
                    return None;
                }
                let Some(refresh_token) = s.refresh_token.clone() else {
                    s.error = Some("Server issued no refresh token".to_string());
                    return None;
                };
                s.is_initiating_auth = true;
                Some((refresh_token, s.client_id.clone(), s.client_secret.clone()))
            })
            .await;
        let Some((refresh_token, client_id, client_secret)) = ready else {
            return;
        };

        let result = self
            .run_refresh(&refresh_token, client_id.as_deref(), client_secret.as_deref())
            .await;

        self.state
            .update(|s| {
                if let Err(e) = &result {
                    warn!("[Flow] Refresh failed: {}", e);
                    s.error = Some(e.to_string());
                }
                s.is_initiating_auth = false;
            })
            .await;
    }

    async fn run_refresh(
        &self,
        refresh_token: &str,
        client_id: Option<&str>,
        client_secret: Option<&str>,
    ) -> Result<(), StepError> {
        let client_id =
            client_id.ok_or_else(|| StepError::NotReady("No client id".to_string()))?;
        let token_endpoint = {
            let metadata = self.metadata.lock().await;
            metadata
                .as_ref()
                .map(|m| m.token_endpoint.clone())
                .ok_or_else(|| StepError::NotReady("Metadata not discovered".to_string()))?
        };

        let extra = self.adapter.extra_params(&self.profile.server_url);
        let outcome = self
            .tokens
            .refresh(&token_endpoint, refresh_token, client_id, client_secret, &extra)
            .await?;

        let (exchange, response) = (outcome.exchange, outcome.response);
        match response {
            Ok(token) => {
                self.persist_tokens(&token.access_token, token.refresh_token.clone(),
                    token.token_type.clone(), token.expires_in, client_id)
                    .await;
                self.state
                    .update(|s| {
                        s.http_history.push(exchange);
                        s.access_token = Some(token.access_token.clone());
                        // Keep the old refresh token unless the server rotated it
                        if token.refresh_token.is_some() {
                            s.refresh_token = token.refresh_token.clone();
                        }
                        if token.token_type.is_some() {
                            s.token_type = token.token_type.clone();
                        }
                        s.expires_in = token.expires_in;
                        s.log("Refreshed access token");
                        s.error = None;
                    })
                    .await;
                Ok(())
            }
            Err(e) => {
                self.state.update(|s| s.http_history.push(exchange)).await;
                Err(e)
            }
        }
    }

    /// Reset to `configure`: fresh state, nonce/PKCE gone, pending
    /// debounced exchange cancelled.
    pub async fn reset(&self, server_url_override: Option<String>) {
        self.pending_exchange.cancel();
        *self.metadata.lock().await = None;

        let mut profile = self.profile.clone();
        if let Some(url) = server_url_override {
            profile.server_url = url;
        }
        info!("[Flow] Reset to configure for {}", profile.server_url);
        self.state.replace(Self::initial_state(&profile)).await;
    }

    /// Delete every stored credential kind for this identity, canonical and
    /// legacy keys both.
    pub async fn clear_oauth_data(&self) -> Result<(), authprobe_core::StoreError> {
        info!("[Flow] Clearing stored OAuth data for {}", self.identity.server_id);
        self.store.clear(&self.identity).await
    }

    async fn persist_config(&self) {
        let id = &self.profile.server_id;
        if let Err(e) = self
            .store
            .set(
                CredentialKind::ServerUrl,
                id,
                json!({ "server_url": self.profile.server_url }),
            )
            .await
        {
            warn!("[Flow] Failed to persist server URL: {}", e);
        }
        if let Err(e) = self
            .store
            .set(
                CredentialKind::Config,
                id,
                json!({
                    "scopes": self.profile.scopes,
                    "protocol_version": self.adapter.version().as_str(),
                    "strategy": self.profile.strategy.label(),
                }),
            )
            .await
        {
            warn!("[Flow] Failed to persist flow config: {}", e);
        }
    }

    async fn persist_registration(&self, client_id: &str, client_secret: Option<String>) {
        let record = ClientRegistrationRecord::new(client_id, client_secret);
        match serde_json::to_value(&record) {
            Ok(value) => {
                if let Err(e) = self
                    .store
                    .set(CredentialKind::ClientRegistration, &self.profile.server_id, value)
                    .await
                {
                    warn!("[Flow] Failed to persist client registration: {}", e);
                }
            }
            Err(e) => warn!("[Flow] Failed to serialize client registration: {}", e),
        }
    }

    async fn persist_tokens(
        &self,
        access_token: &str,
        refresh_token: Option<String>,
        token_type: Option<String>,
        expires_in: Option<i64>,
        client_id: &str,
    ) {
        let tokens = StoredTokens {
            access_token: access_token.to_string(),
            refresh_token,
            token_type,
            expires_in,
            client_id: Some(client_id.to_string()),
            obtained_at: Utc::now(),
        };
        match serde_json::to_value(&tokens) {
            Ok(value) => {
                if let Err(e) = self
                    .store
                    .set(CredentialKind::Tokens, &self.profile.server_id, value)
                    .await
                {
                    warn!("[Flow] Failed to persist tokens: {}", e);
                }
            }
            Err(e) => warn!("[Flow] Failed to serialize tokens: {}", e),
        }
    }
}
