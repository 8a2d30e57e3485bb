//! Dynamic Client Registration (RFC 7591), client side
//!
//! POSTs a registration request to the server's registration endpoint and
//! captures the issued credentials together with the raw exchange.

use authprobe_core::HttpExchange;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::StepError;

/// Registration request body (RFC 7591)
#[derive(Debug, Clone, Serialize)]
pub struct DcrRegistrationRequest {
    /// Human-readable name of the client
    pub client_name: String,
    /// Array of allowed redirect URIs
    pub redirect_uris: Vec<String>,
    /// OAuth 2.0 grant types the client may use
    pub grant_types: Vec<String>,
    /// OAuth 2.0 response types the client may use
    pub response_types: Vec<String>,
    /// Authentication method for the token endpoint
    pub token_endpoint_auth_method: String,
    /// Scope values the client may request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl DcrRegistrationRequest {
    /// Build a registration request for one redirect URI with the OAuth 2.1
    /// defaults a public PKCE client uses.
    pub fn for_redirect(redirect_uri: impl Into<String>, scopes: &[String]) -> Self {
        Self {
            client_name: "authprobe".to_string(),
            redirect_uris: vec![redirect_uri.into()],
            grant_types: vec![
                "authorization_code".to_string(),
                "refresh_token".to_string(),
            ],
            response_types: vec!["code".to_string()],
            token_endpoint_auth_method: "none".to_string(),
            scope: if scopes.is_empty() {
                None
            } else {
                Some(scopes.join(" "))
            },
        }
    }
}

/// Registration response (RFC 7591). Servers vary widely; only `client_id`
/// is required here.
#[derive(Debug, Clone, Deserialize)]
pub struct DcrRegistrationResponse {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub client_id_issued_at: Option<u64>,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    #[serde(default)]
    pub token_endpoint_auth_method: Option<String>,
}

/// Client-side DCR caller
pub struct DcrClient {
    http_client: reqwest::Client,
}

impl DcrClient {
    pub fn new(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }

    /// POST a registration request. Both the 201/200 success path and error
    /// responses are captured as an exchange for the operator.
    pub async fn register(
        &self,
        registration_endpoint: &str,
        request: &DcrRegistrationRequest,
    ) -> Result<(DcrRegistrationResponse, HttpExchange), (StepError, Option<HttpExchange>)> {
        info!(
            "[DCR] Registering client '{}' at {}",
            request.client_name, registration_endpoint
        );

        let request_body =
            serde_json::to_string(request).map_err(|e| (StepError::InvalidResponse(e.to_string()), None))?;

        let response = self
            .http_client
            .post(registration_endpoint)
            .header("Content-Type", "application/json")
            .body(request_body.clone())
            .send()
            .await
            .map_err(|e| (StepError::from(e), None))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let exchange = HttpExchange::new("POST", registration_endpoint, status.as_u16())
            .with_header("Content-Type", "application/json")
            .with_request_body(request_body)
            .with_response_body(&body);

        if !status.is_success() {
            warn!("[DCR] Registration failed: HTTP {}", status);
            return Err((
                StepError::Endpoint {
                    status: status.as_u16(),
                    body,
                },
                Some(exchange),
            ));
        }

        match serde_json::from_str::<DcrRegistrationResponse>(&body) {
            Ok(registered) => {
                info!("[DCR] Registered client_id={}", registered.client_id);
                Ok((registered, exchange))
            }
            Err(e) => Err((StepError::InvalidResponse(e.to_string()), Some(exchange))),
        }
    }
}
