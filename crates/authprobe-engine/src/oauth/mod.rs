//! OAuth 2.1 network clients
//!
//! Discovery, dynamic client registration, CIMD identity, PKCE, and token
//! endpoint calls used by the debug flow state machine.

mod cimd;
mod dcr;
mod discovery;
mod pkce;
mod token;

pub use cimd::{derive_client_id, is_cimd_url};
pub use dcr::{DcrClient, DcrRegistrationRequest, DcrRegistrationResponse};
pub use discovery::{DiscoveryOutcome, OAuthDiscovery, OAuthMetadata};
pub use pkce::{generate_state_nonce, PkceChallenge};
pub use token::{ExchangeParams, TokenCallOutcome, TokenClient, TokenResponse};
