//! OAuth Discovery
//!
//! Fetches authorization-server metadata from `.well-known` endpoints,
//! recording every attempt for the operator. Discovery is never fatal: when
//! no document is found, default endpoint paths are derived from the server
//! URL so the flow can continue against conventional layouts.

use authprobe_core::HttpExchange;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::StepError;

/// OAuth/OIDC metadata from a discovery endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthMetadata {
    /// Issuer identifier
    #[serde(default)]
    pub issuer: Option<String>,

    /// Authorization endpoint URL
    pub authorization_endpoint: String,

    /// Token endpoint URL
    pub token_endpoint: String,

    /// Dynamic client registration endpoint (optional)
    #[serde(default)]
    pub registration_endpoint: Option<String>,

    /// Token revocation endpoint (optional)
    #[serde(default)]
    pub revocation_endpoint: Option<String>,

    /// Supported response types
    #[serde(default)]
    pub response_types_supported: Vec<String>,

    /// Supported grant types
    #[serde(default)]
    pub grant_types_supported: Vec<String>,

    /// Supported scopes
    #[serde(default)]
    pub scopes_supported: Vec<String>,

    /// Supported PKCE code challenge methods
    #[serde(default)]
    pub code_challenge_methods_supported: Vec<String>,
}

impl OAuthMetadata {
    /// Check if PKCE is supported
    pub fn supports_pkce(&self) -> bool {
        self.code_challenge_methods_supported
            .contains(&"S256".to_string())
    }

    /// Default endpoints derived from the server URL, used when no
    /// well-known document exists.
    pub fn fallback_for(server_url: &str) -> Self {
        let base = server_url.trim_end_matches('/');
        Self {
            issuer: Some(base.to_string()),
            authorization_endpoint: format!("{}/authorize", base),
            token_endpoint: format!("{}/token", base),
            registration_endpoint: Some(format!("{}/register", base)),
            revocation_endpoint: None,
            response_types_supported: vec!["code".to_string()],
            grant_types_supported: vec![
                "authorization_code".to_string(),
                "refresh_token".to_string(),
            ],
            scopes_supported: Vec::new(),
            code_challenge_methods_supported: vec!["S256".to_string()],
        }
    }
}

/// Outcome of a discovery run: the metadata to use, the attempts made, and
/// whether the defaults were substituted.
#[derive(Debug)]
pub struct DiscoveryOutcome {
    pub metadata: OAuthMetadata,
    pub exchanges: Vec<HttpExchange>,
    pub from_fallback: bool,
}

/// OAuth discovery client
pub struct OAuthDiscovery {
    http_client: reqwest::Client,
}

impl OAuthDiscovery {
    /// Create a new discovery client
    pub fn new(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }

    /// Fetch metadata for a server, trying each well-known path in order.
    ///
    /// Never fails: when every attempt misses (404, transport error, bad
    /// JSON), returns the default endpoints derived from `server_url`.
    pub async fn discover(
        &self,
        server_url: &str,
        well_known_paths: &[&str],
    ) -> DiscoveryOutcome {
        let origin = metadata_origin(server_url);
        let mut exchanges = Vec::new();

        for path in well_known_paths {
            let url = format!("{}{}", origin, path);
            debug!("[OAuth] Trying discovery: {}", url);

            match self.fetch_metadata(&url).await {
                Ok((metadata, exchange)) => {
                    info!("[OAuth] Discovery successful at {}", url);
                    exchanges.push(exchange);
                    return DiscoveryOutcome {
                        metadata,
                        exchanges,
                        from_fallback: false,
                    };
                }
                Err((e, exchange)) => {
                    debug!("[OAuth] Discovery miss at {}: {}", url, e);
                    if let Some(exchange) = exchange {
                        exchanges.push(exchange);
                    }
                }
            }
        }

        warn!(
            "[OAuth] No metadata document for {} - using default endpoint paths",
            server_url
        );
        DiscoveryOutcome {
            metadata: OAuthMetadata::fallback_for(server_url),
            exchanges,
            from_fallback: true,
        }
    }

    /// Fetch metadata from a specific URL, recording the exchange.
    async fn fetch_metadata(
        &self,
        url: &str,
    ) -> Result<(OAuthMetadata, HttpExchange), (StepError, Option<HttpExchange>)> {
        let response = self
            .http_client
            .get(url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| (StepError::from(e), None))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let exchange = HttpExchange::new("GET", url, status.as_u16()).with_response_body(&body);

        if !status.is_success() {
            return Err((
                StepError::Endpoint {
                    status: status.as_u16(),
                    body,
                },
                Some(exchange),
            ));
        }

        match serde_json::from_str::<OAuthMetadata>(&body) {
            Ok(metadata) => Ok((metadata, exchange)),
            Err(e) => Err((StepError::InvalidResponse(e.to_string()), Some(exchange))),
        }
    }
}

/// Origin (scheme + authority) the well-known paths are appended to.
fn metadata_origin(server_url: &str) -> String {
    match Url::parse(server_url) {
        Ok(url) => {
            let mut origin = format!("{}://{}", url.scheme(), url.host_str().unwrap_or(""));
            if let Some(port) = url.port() {
                origin.push_str(&format!(":{}", port));
            }
            origin
        }
        Err(_) => server_url.trim_end_matches('/').to_string(),
    }
}
