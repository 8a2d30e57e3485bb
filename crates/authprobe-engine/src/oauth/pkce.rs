//! PKCE (Proof Key for Code Exchange)
//!
//! Implements RFC 7636 for secure authorization code flow.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::Rng;
use sha2::{Digest, Sha256};

/// PKCE code verifier and challenge pair
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    /// The code verifier (kept secret, sent in token exchange)
    pub verifier: String,
    /// The code challenge (sent in authorization request)
    pub challenge: String,
    /// Challenge method (always S256)
    pub method: String,
}

impl PkceChallenge {
    /// Generate a new PKCE challenge
    pub fn generate() -> Self {
        // 32 random bytes for the verifier
        let mut rng = rand::thread_rng();
        let random_bytes: Vec<u8> = (0..32).map(|_| rng.gen()).collect();

        // Base64-URL encode to create verifier (43-128 characters)
        let verifier = URL_SAFE_NO_PAD.encode(&random_bytes);

        // Challenge: SHA256(verifier) then base64-URL encode
        let mut hasher = Sha256::new();
        hasher.update(verifier.as_bytes());
        let hash = hasher.finalize();
        let challenge = URL_SAFE_NO_PAD.encode(hash);

        Self {
            verifier,
            challenge,
            method: "S256".to_string(),
        }
    }

    /// Verify that a verifier matches a challenge
    pub fn verify(verifier: &str, challenge: &str) -> bool {
        let mut hasher = Sha256::new();
        hasher.update(verifier.as_bytes());
        let hash = hasher.finalize();
        let computed_challenge = URL_SAFE_NO_PAD.encode(hash);
        computed_challenge == challenge
    }
}

impl Default for PkceChallenge {
    fn default() -> Self {
        Self::generate()
    }
}

/// Generate a random `state` nonce for CSRF protection.
pub fn generate_state_nonce() -> String {
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..16).map(|_| rng.gen()).collect();
    URL_SAFE_NO_PAD.encode(&bytes)
}
