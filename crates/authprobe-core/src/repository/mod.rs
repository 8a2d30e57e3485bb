//! Store traits for credential persistence
//!
//! These traits define the interface for keyed storage without specifying
//! the implementation (SQLite, in-memory, etc.)

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::domain::{
    ClientRegistrationRecord, CredentialKind, ServerIdentity, StoredTokens,
};

/// Storage-layer error.
///
/// Malformed persisted JSON is NOT an error: reads degrade to "value absent"
/// so corrupt state never blocks the next flow attempt.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Keyed credential store with the legacy-key migration contract.
///
/// Records are resolved by canonical server id first, then by the legacy
/// display name; a legacy hit is written back under the canonical key
/// (self-healing migration). The canonical key always wins when both exist.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Read a record with migration. Returns `None` for missing or
    /// malformed entries; never fails on bad data.
    async fn get(
        &self,
        kind: CredentialKind,
        identity: &ServerIdentity,
    ) -> Result<Option<Value>, StoreError>;

    /// Write a record under the canonical id key.
    async fn set(
        &self,
        kind: CredentialKind,
        server_id: &str,
        value: Value,
    ) -> Result<(), StoreError>;

    /// Remove every managed kind under both the canonical and the legacy
    /// key. A missing legacy name is tolerated (id-only clear).
    async fn clear(&self, identity: &ServerIdentity) -> Result<(), StoreError>;

    /// Read stored tokens, merging `client_id` from the separately stored
    /// client-registration record under the same identity resolution.
    async fn get_stored_tokens(
        &self,
        identity: &ServerIdentity,
    ) -> Result<Option<StoredTokens>, StoreError> {
        let Some(value) = self.get(CredentialKind::Tokens, identity).await? else {
            return Ok(None);
        };
        let mut tokens: StoredTokens = match serde_json::from_value(value) {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!(
                    "[Store] Malformed token record for {}: {} - treating as absent",
                    identity.server_id, e
                );
                return Ok(None);
            }
        };

        if tokens.client_id.is_none() {
            if let Some(reg) = self.get_client_registration(identity).await? {
                tokens.client_id = Some(reg.client_id);
            }
        }

        Ok(Some(tokens))
    }

    /// Read the stored client registration, if any.
    async fn get_client_registration(
        &self,
        identity: &ServerIdentity,
    ) -> Result<Option<ClientRegistrationRecord>, StoreError> {
        let Some(value) = self
            .get(CredentialKind::ClientRegistration, identity)
            .await?
        else {
            return Ok(None);
        };
        match serde_json::from_value(value) {
            Ok(reg) => Ok(Some(reg)),
            Err(e) => {
                warn!(
                    "[Store] Malformed client registration for {}: {} - treating as absent",
                    identity.server_id, e
                );
                Ok(None)
            }
        }
    }

    /// Whether any OAuth configuration exists for this identity (tokens or
    /// a client registration under either key scheme).
    async fn has_oauth_config(&self, identity: &ServerIdentity) -> Result<bool, StoreError> {
        if self.get(CredentialKind::Tokens, identity).await?.is_some() {
            return Ok(true);
        }
        Ok(self
            .get(CredentialKind::ClientRegistration, identity)
            .await?
            .is_some())
    }
}
