//! # Authprobe Core Library
//!
//! Domain logic and contracts for the OAuth 2.1 debug-flow engine.
//!
//! ## Modules
//!
//! - `domain` - Core entities (FlowState, StoredTokens, RegistrationStrategy)
//! - `repository` - Credential store trait and error types

pub mod domain;
pub mod repository;

// Re-export commonly used types
pub use domain::*;
pub use repository::{CredentialStore, StoreError};
