//! State machine factory
//!
//! The single seam where protocol-version-specific behavior is chosen:
//! well-known discovery paths and extra authorize/token parameters are bound
//! into a `VersionAdapter` here, so step logic stays free of version
//! conditionals.

use std::sync::Arc;

use authprobe_core::{CredentialStore, ProtocolVersion, RegistrationStrategy, ServerIdentity};
use url::Url;

use crate::error::FactoryError;
use crate::machine::DebugFlowMachine;

/// Everything a flow session is bound to at construction.
#[derive(Debug, Clone)]
pub struct FlowProfile {
    /// Target MCP server. Immutable for the session.
    pub server_url: String,
    /// Stable server id (canonical storage identity).
    pub server_id: String,
    /// Display name from the older storage scheme, if known.
    pub legacy_name: Option<String>,
    /// Redirect URI the browser returns to.
    pub redirect_url: String,
    pub protocol_version: ProtocolVersion,
    pub strategy: RegistrationStrategy,
    /// Scopes requested at authorization; empty means server defaults.
    pub scopes: Vec<String>,
    /// Operator-supplied headers, applied to token calls only.
    pub custom_headers: Vec<(String, String)>,
}

impl FlowProfile {
    pub fn identity(&self) -> ServerIdentity {
        let identity = ServerIdentity::new(self.server_id.clone());
        match &self.legacy_name {
            Some(name) => identity.with_legacy_name(name.clone()),
            None => identity,
        }
    }
}

/// Version-specific behavior, bound once by the factory.
#[derive(Debug, Clone)]
pub struct VersionAdapter {
    version: ProtocolVersion,
    well_known_paths: &'static [&'static str],
}

impl VersionAdapter {
    pub fn for_version(version: ProtocolVersion) -> Self {
        let well_known_paths: &'static [&'static str] = match version {
            ProtocolVersion::V20250326 => &["/.well-known/oauth-authorization-server"],
            ProtocolVersion::V20250618 => &[
                "/.well-known/oauth-authorization-server",
                "/.well-known/openid-configuration",
            ],
        };
        Self {
            version,
            well_known_paths,
        }
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    /// Discovery paths tried in order against the server origin.
    pub fn well_known_paths(&self) -> &'static [&'static str] {
        self.well_known_paths
    }

    /// Extra query/form parameters the version adds to the authorization
    /// and token requests (RFC 8707 resource indicator on 2025-06-18).
    pub fn extra_params(&self, server_url: &str) -> Vec<(String, String)> {
        if self.version.uses_resource_indicators() {
            vec![("resource".to_string(), server_url.to_string())]
        } else {
            Vec::new()
        }
    }
}

/// Build a state machine bound to one (server, profile) pair.
///
/// Fails only on construction-level problems (missing/invalid URLs); all
/// later failures surface through `FlowState.error`.
pub fn create_state_machine(
    profile: FlowProfile,
    store: Arc<dyn CredentialStore>,
    http_client: reqwest::Client,
) -> Result<DebugFlowMachine, FactoryError> {
    if profile.server_url.trim().is_empty() {
        return Err(FactoryError::MissingServerUrl);
    }
    if profile.redirect_url.trim().is_empty() {
        return Err(FactoryError::MissingRedirectUrl);
    }
    Url::parse(&profile.server_url)
        .map_err(|e| FactoryError::InvalidServerUrl(e.to_string()))?;

    let adapter = VersionAdapter::for_version(profile.protocol_version);
    Ok(DebugFlowMachine::new(profile, adapter, store, http_client))
}
