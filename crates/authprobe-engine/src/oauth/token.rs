//! Token endpoint calls
//!
//! Form-encoded POSTs for the authorization-code exchange and the refresh
//! grant. Every call is captured as an `HttpExchange`, success or not, so
//! the operator can inspect exactly what went over the wire.

use authprobe_core::HttpExchange;
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::StepError;

/// Token response from the OAuth server
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub scope: Option<String>,
}

/// One token-endpoint call: the recorded exchange plus the parsed result.
#[derive(Debug)]
pub struct TokenCallOutcome {
    pub exchange: HttpExchange,
    pub response: Result<TokenResponse, StepError>,
}

/// Parameters for the authorization-code exchange.
pub struct ExchangeParams<'a> {
    pub code: &'a str,
    pub code_verifier: &'a str,
    pub client_id: &'a str,
    pub client_secret: Option<&'a str>,
    pub redirect_uri: &'a str,
}

/// Token endpoint caller
pub struct TokenClient {
    http_client: reqwest::Client,
    /// Operator-supplied headers, applied to token calls only.
    custom_headers: Vec<(String, String)>,
}

impl TokenClient {
    pub fn new(http_client: reqwest::Client, custom_headers: Vec<(String, String)>) -> Self {
        Self {
            http_client,
            custom_headers,
        }
    }

    /// Exchange an authorization code for tokens.
    ///
    /// `extra_params` carries protocol-version additions such as the RFC
    /// 8707 `resource` parameter.
    pub async fn exchange_code(
        &self,
        token_endpoint: &str,
        params: ExchangeParams<'_>,
        extra_params: &[(String, String)],
    ) -> Result<TokenCallOutcome, StepError> {
        info!("[OAuth] Exchanging authorization code for tokens");

        let mut form: Vec<(&str, &str)> = vec![
            ("grant_type", "authorization_code"),
            ("code", params.code),
            ("redirect_uri", params.redirect_uri),
            ("client_id", params.client_id),
            ("code_verifier", params.code_verifier),
        ];
        if let Some(secret) = params.client_secret {
            form.push(("client_secret", secret));
        }
        for (k, v) in extra_params {
            form.push((k.as_str(), v.as_str()));
        }

        self.post_form(token_endpoint, &form).await
    }

    /// Refresh an access token.
    pub async fn refresh(
        &self,
        token_endpoint: &str,
        refresh_token: &str,
        client_id: &str,
        client_secret: Option<&str>,
        extra_params: &[(String, String)],
    ) -> Result<TokenCallOutcome, StepError> {
        info!("[OAuth] Refreshing access token");

        let mut form: Vec<(&str, &str)> = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", client_id),
        ];
        if let Some(secret) = client_secret {
            form.push(("client_secret", secret));
        }
        for (k, v) in extra_params {
            form.push((k.as_str(), v.as_str()));
        }

        self.post_form(token_endpoint, &form).await
    }

    /// POST a form to the token endpoint and record the exchange.
    ///
    /// Transport failures are the only hard error; HTTP-level failures come
    /// back inside the outcome so the exchange is still recorded.
    async fn post_form(
        &self,
        token_endpoint: &str,
        form: &[(&str, &str)],
    ) -> Result<TokenCallOutcome, StepError> {
        let mut request = self.http_client.post(token_endpoint).form(form);
        for (name, value) in &self.custom_headers {
            request = request.header(name, value);
        }

        let response = request.send().await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        let mut exchange = HttpExchange::new("POST", token_endpoint, status.as_u16())
            .with_request_body(redacted_form(form))
            .with_response_body(&body);
        for (name, value) in &self.custom_headers {
            exchange = exchange.with_header(name, value);
        }

        let result = if status.is_success() {
            match serde_json::from_str::<TokenResponse>(&body) {
                Ok(token) => {
                    info!("[OAuth] Token endpoint call successful");
                    Ok(token)
                }
                Err(e) => Err(StepError::InvalidResponse(e.to_string())),
            }
        } else {
            warn!("[OAuth] Token endpoint returned HTTP {}", status);
            Err(StepError::Endpoint {
                status: status.as_u16(),
                body,
            })
        };

        Ok(TokenCallOutcome {
            exchange,
            response: result,
        })
    }
}

/// Form body shown in the history. The verifier is the one PKCE secret that
/// must stay out of the trace; everything else is what the server saw.
fn redacted_form(form: &[(&str, &str)]) -> String {
    form.iter()
        .map(|(k, v)| {
            if *k == "code_verifier" || *k == "client_secret" {
                format!("{}=<redacted>", k)
            } else {
                format!("{}={}", k, v)
            }
        })
        .collect::<Vec<_>>()
        .join("&")
}
