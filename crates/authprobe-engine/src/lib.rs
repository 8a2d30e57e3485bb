//! # Authprobe Engine
//!
//! The OAuth 2.1 debug flow engine for remote MCP servers: a per-session
//! protocol state machine, the callback correlator that captures the
//! browser redirect, and the factory that binds version- and
//! strategy-specific behavior at construction.
//!
//! ## Modules
//!
//! - `oauth` - network clients (discovery, DCR, CIMD, PKCE, token endpoint)
//! - `machine` - the `DebugFlowMachine` step sequencer
//! - `correlator` - dual-channel redirect capture with dedup and debounce
//! - `factory` - `create_state_machine` and the `VersionAdapter` seam
//! - `state` - shared `FlowState` handle with watch-based subscriptions

pub mod correlator;
pub mod debounce;
pub mod error;
pub mod factory;
pub mod machine;
pub mod oauth;
pub mod state;

pub use correlator::{
    CallbackChannels, CallbackCorrelator, CallbackEnvelope, CallbackPayload, CALLBACK_KIND,
    DEBOUNCE_DELAY,
};
pub use debounce::DebouncedCall;
pub use error::{FactoryError, StepError};
pub use factory::{create_state_machine, FlowProfile, VersionAdapter};
pub use machine::DebugFlowMachine;
pub use oauth::{OAuthMetadata, PkceChallenge};
pub use state::SharedFlowState;
