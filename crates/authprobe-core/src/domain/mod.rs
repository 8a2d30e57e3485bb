//! Core domain entities for the debug flow engine.

pub mod credential;
pub mod flow;
pub mod strategy;

pub use credential::{ClientRegistrationRecord, CredentialKind, ServerIdentity, StoredTokens};
pub use flow::{FlowState, FlowStep, HttpExchange, TokenBundle};
pub use strategy::{ProtocolVersion, RegistrationStrategy};
