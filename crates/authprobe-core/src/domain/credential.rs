//! Credential entities - what the engine persists between sessions.
//!
//! Note: tokens and client registration are stored under separate keys;
//! `get_stored_tokens` joins them at read time so callers never do it.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// The five independently-keyed kinds of record the store manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    Tokens,
    ClientRegistration,
    PkceVerifier,
    ServerUrl,
    Config,
}

impl CredentialKind {
    /// Storage key prefix. The full key is `{prefix}:{identity}`.
    pub fn key_prefix(&self) -> &'static str {
        match self {
            CredentialKind::Tokens => "mcp:tokens",
            CredentialKind::ClientRegistration => "mcp:client",
            CredentialKind::PkceVerifier => "mcp:verifier",
            CredentialKind::ServerUrl => "mcp:server_url",
            CredentialKind::Config => "mcp:config",
        }
    }

    /// All managed kinds, in clear order.
    pub fn all() -> [CredentialKind; 5] {
        [
            CredentialKind::Tokens,
            CredentialKind::ClientRegistration,
            CredentialKind::PkceVerifier,
            CredentialKind::ServerUrl,
            CredentialKind::Config,
        ]
    }

    /// Canonical storage key for a server id.
    pub fn canonical_key(&self, server_id: &str) -> String {
        format!("{}:{}", self.key_prefix(), server_id)
    }

    /// Legacy storage key for a display name (older naming scheme).
    pub fn legacy_key(&self, name: &str) -> String {
        format!("{}:{}", self.key_prefix(), name)
    }
}

/// Server identity used for key resolution.
///
/// Canonical identity is the server's stable id; the legacy identity is the
/// display name the older scheme keyed records by.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerIdentity {
    pub server_id: String,
    pub legacy_name: Option<String>,
}

impl ServerIdentity {
    pub fn new(server_id: impl Into<String>) -> Self {
        Self {
            server_id: server_id.into(),
            legacy_name: None,
        }
    }

    pub fn with_legacy_name(mut self, name: impl Into<String>) -> Self {
        self.legacy_name = Some(name.into());
        self
    }
}

/// Tokens persisted after a successful exchange or refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredTokens {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    /// Merged in from the client-registration record at read time; not
    /// serialized back into the tokens record itself.
    #[serde(default)]
    pub client_id: Option<String>,
    pub obtained_at: DateTime<Utc>,
}

impl StoredTokens {
    /// Check if the token is past its lifetime.
    pub fn is_expired(&self) -> bool {
        match self.expires_in {
            Some(secs) => Utc::now() >= self.obtained_at + Duration::seconds(secs),
            None => false, // No expiry = never expires
        }
    }

    /// Check if the token will expire within the buffer.
    pub fn expires_soon(&self, buffer_seconds: i64) -> bool {
        match self.expires_in {
            Some(secs) => {
                Utc::now() + Duration::seconds(buffer_seconds)
                    >= self.obtained_at + Duration::seconds(secs)
            }
            None => false,
        }
    }

    pub fn can_refresh(&self) -> bool {
        self.refresh_token.is_some()
    }

    /// Authorization header value for manual probing.
    pub fn authorization_header(&self) -> String {
        format!(
            "{} {}",
            self.token_type.as_deref().unwrap_or("Bearer"),
            self.access_token
        )
    }
}

/// Client registration persisted after DCR (or derived for CIMD).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientRegistrationRecord {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    pub registered_at: DateTime<Utc>,
}

impl ClientRegistrationRecord {
    pub fn new(client_id: impl Into<String>, client_secret: Option<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret,
            registered_at: Utc::now(),
        }
    }
}
