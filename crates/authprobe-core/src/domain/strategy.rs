//! Registration strategies and protocol versions.
//!
//! The per-strategy step list is declarative: a strategy that needs no
//! registration simply does not contain the `RegisterClient` step, so the
//! state machine never embeds skip conditionals.

use serde::{Deserialize, Serialize};

use super::flow::FlowStep;

/// How the flow obtains a client identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RegistrationStrategy {
    /// Operator-supplied static credentials; the registration step is absent
    /// from the sequence entirely.
    Preregistered {
        client_id: String,
        #[serde(default)]
        client_secret: Option<String>,
    },
    /// Dynamic Client Registration (RFC 7591): POST to the registration
    /// endpoint and store the issued credentials.
    Dcr,
    /// Client ID Metadata Document: the metadata URL itself is the client
    /// identity. No network round trip.
    Cimd { client_metadata_url: String },
}

impl RegistrationStrategy {
    /// Ordered step sequence for this strategy, `Configure` through `Complete`.
    pub fn step_sequence(&self) -> &'static [FlowStep] {
        match self {
            RegistrationStrategy::Preregistered { .. } => &[
                FlowStep::Configure,
                FlowStep::DiscoverMetadata,
                FlowStep::GeneratePkceParameters,
                FlowStep::AuthorizationRequest,
                FlowStep::ReceivedAuthorizationCode,
                FlowStep::ExchangeCode,
                FlowStep::Complete,
            ],
            RegistrationStrategy::Dcr | RegistrationStrategy::Cimd { .. } => &[
                FlowStep::Configure,
                FlowStep::DiscoverMetadata,
                FlowStep::RegisterClient,
                FlowStep::GeneratePkceParameters,
                FlowStep::AuthorizationRequest,
                FlowStep::ReceivedAuthorizationCode,
                FlowStep::ExchangeCode,
                FlowStep::Complete,
            ],
        }
    }

    /// Step that follows `current` in this strategy's sequence, if any.
    pub fn next_step(&self, current: FlowStep) -> Option<FlowStep> {
        let seq = self.step_sequence();
        let idx = seq.iter().position(|s| *s == current)?;
        seq.get(idx + 1).copied()
    }

    pub fn label(&self) -> &'static str {
        match self {
            RegistrationStrategy::Preregistered { .. } => "preregistered",
            RegistrationStrategy::Dcr => "dcr",
            RegistrationStrategy::Cimd { .. } => "cimd",
        }
    }
}

/// Revision of the MCP authorization spec the target server implements.
///
/// Version-specific behavior (well-known paths, resource-indicator
/// parameters) is bound once at construction by the factory, keeping step
/// logic free of version conditionals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolVersion {
    /// 2025-03-26 revision: authorization-server metadata only.
    #[serde(rename = "2025-03-26")]
    V20250326,
    /// 2025-06-18 revision: adds RFC 8707 resource indicators to the
    /// authorization and token requests.
    #[serde(rename = "2025-06-18")]
    V20250618,
}

impl ProtocolVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolVersion::V20250326 => "2025-03-26",
            ProtocolVersion::V20250618 => "2025-06-18",
        }
    }

    /// Whether token/authorize requests carry the `resource` parameter.
    pub fn uses_resource_indicators(&self) -> bool {
        matches!(self, ProtocolVersion::V20250618)
    }
}
