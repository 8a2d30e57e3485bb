//! In-memory CredentialStore for engine tests.
//!
//! Implements the same read-with-migration and clear-with-legacy contracts
//! as the SQLite store, over a plain map.

use std::collections::HashMap;

use async_trait::async_trait;
use authprobe_core::{CredentialKind, CredentialStore, ServerIdentity, StoreError};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::warn;

/// Map-backed credential store.
#[derive(Default)]
pub struct MemoryCredentialStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plant a raw entry under an arbitrary key (test setup helper).
    pub async fn plant(&self, key: impl Into<String>, raw: impl Into<String>) {
        self.entries.lock().await.insert(key.into(), raw.into());
    }

    /// Raw entry under a key, if present (test inspection helper).
    pub async fn raw(&self, key: &str) -> Option<String> {
        self.entries.lock().await.get(key).cloned()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    fn parse_tolerant(key: &str, raw: &str) -> Option<Value> {
        match serde_json::from_str(raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("[Store] Malformed JSON under {}: {} - treating as absent", key, e);
                None
            }
        }
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get(
        &self,
        kind: CredentialKind,
        identity: &ServerIdentity,
    ) -> Result<Option<Value>, StoreError> {
        let mut entries = self.entries.lock().await;

        let canonical = kind.canonical_key(&identity.server_id);
        if let Some(raw) = entries.get(&canonical) {
            if let Some(value) = Self::parse_tolerant(&canonical, raw) {
                return Ok(Some(value));
            }
        }

        let Some(name) = &identity.legacy_name else {
            return Ok(None);
        };
        let legacy = kind.legacy_key(name);
        let Some(raw) = entries.get(&legacy).cloned() else {
            return Ok(None);
        };
        let Some(value) = Self::parse_tolerant(&legacy, &raw) else {
            return Ok(None);
        };

        // Self-healing migration to the canonical key
        entries.insert(canonical, raw);
        Ok(Some(value))
    }

    async fn set(
        &self,
        kind: CredentialKind,
        server_id: &str,
        value: Value,
    ) -> Result<(), StoreError> {
        let raw = serde_json::to_string(&value)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        self.entries
            .lock()
            .await
            .insert(kind.canonical_key(server_id), raw);
        Ok(())
    }

    async fn clear(&self, identity: &ServerIdentity) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        for kind in CredentialKind::all() {
            entries.remove(&kind.canonical_key(&identity.server_id));
            if let Some(name) = &identity.legacy_name {
                entries.remove(&kind.legacy_key(name));
            }
        }
        Ok(())
    }
}
