//! Engine error types.
//!
//! Step failures never cross the public `proceed_to_next_step`/`refresh`
//! contracts: they are caught at the step boundary and written into
//! `FlowState.error`. `FactoryError` is the one fatal, returned error.

use thiserror::Error;

/// Recoverable failure of a single flow step. Surfaced via
/// `FlowState.error`; the step stays put and may be retried.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("request failed: {0}")]
    Http(String),

    #[error("endpoint returned HTTP {status}: {body}")]
    Endpoint { status: u16, body: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// A prerequisite of the step is missing (client id, verifier, code).
    #[error("{0}")]
    NotReady(String),
}

impl From<reqwest::Error> for StepError {
    fn from(e: reqwest::Error) -> Self {
        StepError::Http(e.to_string())
    }
}

/// Fatal construction error: the factory cannot produce a state machine.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FactoryError {
    #[error("server URL is required")]
    MissingServerUrl,

    #[error("redirect URL is required")]
    MissingRedirectUrl,

    #[error("invalid server URL: {0}")]
    InvalidServerUrl(String),
}
