//! SQLite implementation of the CredentialStore contract.
//!
//! One row per key in the `oauth_store` table. Values are JSON text. Reads
//! follow the read-with-migration algorithm: canonical server-id key first,
//! then legacy display-name key, healing legacy hits back under the
//! canonical key. Malformed JSON degrades to "value absent".

use std::sync::Arc;

use async_trait::async_trait;
use authprobe_core::{CredentialKind, CredentialStore, ServerIdentity, StoreError};
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::Database;

/// SQLite-backed credential store.
pub struct SqliteCredentialStore {
    db: Arc<Mutex<Database>>,
}

impl SqliteCredentialStore {
    pub fn new(db: Arc<Mutex<Database>>) -> Self {
        Self { db }
    }

    /// Read the raw JSON text stored under a key.
    fn read_raw(db: &Database, key: &str) -> Result<Option<String>, StoreError> {
        db.conn()
            .query_row(
                "SELECT value FROM oauth_store WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    /// Write JSON text under a key, replacing any existing row.
    fn write_raw(db: &Database, key: &str, value: &str) -> Result<(), StoreError> {
        db.conn()
            .execute(
                "INSERT OR REPLACE INTO oauth_store (key, value, updated_at) VALUES (?1, ?2, ?3)",
                params![key, value, Utc::now().to_rfc3339()],
            )
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    fn delete_raw(db: &Database, key: &str) -> Result<(), StoreError> {
        db.conn()
            .execute("DELETE FROM oauth_store WHERE key = ?1", params![key])
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    /// Parse stored JSON, degrading malformed text to `None`.
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
impl CredentialStore for SqliteCredentialStore {
    async fn get(
        &self,
        kind: CredentialKind,
        identity: &ServerIdentity,
    ) -> Result<Option<Value>, StoreError> {
        let db = self.db.lock().await;

        // Canonical key always wins when both exist
        let canonical = kind.canonical_key(&identity.server_id);
        if let Some(raw) = Self::read_raw(&db, &canonical)? {
            if let Some(value) = Self::parse_tolerant(&canonical, &raw) {
                return Ok(Some(value));
            }
        }

        let Some(name) = &identity.legacy_name else {
            return Ok(None);
        };
        let legacy = kind.legacy_key(name);
        let Some(raw) = Self::read_raw(&db, &legacy)? else {
            return Ok(None);
        };
        let Some(value) = Self::parse_tolerant(&legacy, &raw) else {
            return Ok(None);
        };

        // Self-healing migration: persist the legacy hit under the canonical
        // key so the next read no longer needs the name.
        Self::write_raw(&db, &canonical, &raw)?;
        debug!("[Store] Migrated {} -> {}", legacy, canonical);

        Ok(Some(value))
    }

    async fn set(
        &self,
        kind: CredentialKind,
        server_id: &str,
        value: Value,
    ) -> Result<(), StoreError> {
        let db = self.db.lock().await;
        let key = kind.canonical_key(server_id);
        let raw = serde_json::to_string(&value)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Self::write_raw(&db, &key, &raw)?;
        debug!("[Store] Wrote {}", key);
        Ok(())
    }

    async fn clear(&self, identity: &ServerIdentity) -> Result<(), StoreError> {
        let db = self.db.lock().await;
        for kind in CredentialKind::all() {
            Self::delete_raw(&db, &kind.canonical_key(&identity.server_id))?;
            if let Some(name) = &identity.legacy_name {
                Self::delete_raw(&db, &kind.legacy_key(name))?;
            }
        }
        debug!("[Store] Cleared OAuth data for {}", identity.server_id);
        Ok(())
    }
}
