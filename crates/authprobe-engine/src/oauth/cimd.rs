//! CIMD (Client ID Metadata Document) identity
//!
//! Under CIMD the client's identity IS the HTTPS URL of its metadata
//! document; the authorization server fetches the document itself. The
//! debug flow therefore derives the client id locally with no network
//! round trip - only shape validation happens here.

use tracing::info;

use crate::error::StepError;

/// Check if a string looks like a CIMD URL
pub fn is_cimd_url(client_id: &str) -> bool {
    client_id.starts_with("https://") || client_id.starts_with("http://")
}

/// Derive the client identity from a metadata URL.
pub fn derive_client_id(client_metadata_url: &str) -> Result<String, StepError> {
    if !is_cimd_url(client_metadata_url) {
        return Err(StepError::NotReady(format!(
            "CIMD client metadata URL must be an http(s) URL, got '{}'",
            client_metadata_url
        )));
    }

    info!("[CIMD] Using client metadata URL as client_id: {}", client_metadata_url);
    Ok(client_metadata_url.to_string())
}
