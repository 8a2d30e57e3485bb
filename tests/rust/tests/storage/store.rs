//! Read-with-migration contract tests for the SQLite credential store.

use std::sync::Arc;

use authprobe_core::{CredentialKind, CredentialStore, ServerIdentity};
use authprobe_storage::{Database, SqliteCredentialStore};
use pretty_assertions::assert_eq;
use rusqlite::params;
use serde_json::json;
use tempfile::TempDir;
use tokio::sync::Mutex;

struct Harness {
    store: SqliteCredentialStore,
    db: Arc<Mutex<Database>>,
    _dir: TempDir,
}

fn harness() -> Harness {
    let dir = TempDir::new().expect("temp dir");
    let db = Database::open(&dir.path().join("authprobe.db")).expect("open database");
    let db = Arc::new(Mutex::new(db));
    Harness {
        store: SqliteCredentialStore::new(db.clone()),
        db,
        _dir: dir,
    }
}

impl Harness {
    /// Insert a raw row, bypassing the store's canonical-key writes.
    async fn plant(&self, key: &str, raw: &str) {
        let db = self.db.lock().await;
        db.conn()
            .execute(
                "INSERT OR REPLACE INTO oauth_store (key, value, updated_at) VALUES (?1, ?2, datetime('now'))",
                params![key, raw],
            )
            .expect("plant row");
    }

    async fn raw(&self, key: &str) -> Option<String> {
        let db = self.db.lock().await;
        db.conn()
            .query_row(
                "SELECT value FROM oauth_store WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .ok()
    }

    async fn row_count(&self) -> i64 {
        let db = self.db.lock().await;
        db.conn()
            .query_row("SELECT COUNT(*) FROM oauth_store", [], |row| row.get(0))
            .expect("count rows")
    }
}

fn tokens_json(access_token: &str) -> String {
    json!({
        "access_token": access_token,
        "refresh_token": "rt_legacy",
        "obtained_at": "2026-08-01T00:00:00Z"
    })
    .to_string()
}

#[tokio::test]
async fn legacy_token_read_heals_to_canonical_key() {
    let h = harness();
    h.plant("mcp:tokens:My Server", &tokens_json("at_legacy")).await;

    let identity = ServerIdentity::new("srv_9").with_legacy_name("My Server");
    let tokens = h
        .store
        .get_stored_tokens(&identity)
        .await
        .unwrap()
        .expect("legacy tokens found");
    assert_eq!(tokens.access_token, "at_legacy");

    // The hit was written back under the canonical key.
    let healed = h.raw("mcp:tokens:srv_9").await.expect("canonical row written");
    assert!(healed.contains("at_legacy"));

    // A later read without the legacy name still resolves.
    let tokens = h
        .store
        .get_stored_tokens(&ServerIdentity::new("srv_9"))
        .await
        .unwrap()
        .expect("canonical read after healing");
    assert_eq!(tokens.access_token, "at_legacy");
}

#[tokio::test]
async fn canonical_key_wins_over_legacy_for_every_kind() {
    let h = harness();
    let identity = ServerIdentity::new("srv_1").with_legacy_name("Old Name");

    for kind in CredentialKind::all() {
        h.plant(&kind.canonical_key("srv_1"), r#"{"which":"canonical"}"#)
            .await;
        h.plant(&kind.legacy_key("Old Name"), r#"{"which":"legacy"}"#)
            .await;

        let value = h
            .store
            .get(kind, &identity)
            .await
            .unwrap()
            .expect("value present");
        assert_eq!(value["which"], "canonical", "kind {kind:?}");
    }
}

#[tokio::test]
async fn malformed_json_degrades_to_absent() {
    let h = harness();
    h.plant("mcp:tokens:srv_bad", "{not json at all").await;

    let identity = ServerIdentity::new("srv_bad");
    assert!(h.store.get(CredentialKind::Tokens, &identity).await.unwrap().is_none());
    assert!(h.store.get_stored_tokens(&identity).await.unwrap().is_none());
}

#[tokio::test]
async fn malformed_canonical_falls_through_to_legacy() {
    let h = harness();
    h.plant("mcp:tokens:srv_2", "garbage").await;
    h.plant("mcp:tokens:Display Name", &tokens_json("at_fallback"))
        .await;

    let identity = ServerIdentity::new("srv_2").with_legacy_name("Display Name");
    let tokens = h
        .store
        .get_stored_tokens(&identity)
        .await
        .unwrap()
        .expect("legacy value used");
    assert_eq!(tokens.access_token, "at_fallback");
}

#[tokio::test]
async fn clear_removes_every_kind_under_both_keyings() {
    let h = harness();
    for kind in CredentialKind::all() {
        h.plant(&kind.canonical_key("srv_3"), r#"{"a":1}"#).await;
        h.plant(&kind.legacy_key("Named Server"), r#"{"a":1}"#).await;
    }
    assert_eq!(h.row_count().await, 10);

    let identity = ServerIdentity::new("srv_3").with_legacy_name("Named Server");
    h.store.clear(&identity).await.unwrap();

    assert_eq!(h.row_count().await, 0);
}

#[tokio::test]
async fn clear_without_legacy_name_leaves_unrelated_rows() {
    let h = harness();
    h.plant("mcp:tokens:srv_4", r#"{"a":1}"#).await;
    h.plant("mcp:tokens:Other Server", r#"{"a":1}"#).await;

    h.store.clear(&ServerIdentity::new("srv_4")).await.unwrap();

    assert!(h.raw("mcp:tokens:srv_4").await.is_none());
    assert!(h.raw("mcp:tokens:Other Server").await.is_some());
}

#[tokio::test]
async fn stored_tokens_merge_client_id_from_registration() {
    let h = harness();
    let identity = ServerIdentity::new("srv_5");

    h.store
        .set(
            CredentialKind::Tokens,
            "srv_5",
            json!({
                "access_token": "at_m",
                "obtained_at": "2026-08-01T00:00:00Z"
            }),
        )
        .await
        .unwrap();
    h.store
        .set(
            CredentialKind::ClientRegistration,
            "srv_5",
            json!({
                "client_id": "client_m",
                "registered_at": "2026-08-01T00:00:00Z"
            }),
        )
        .await
        .unwrap();

    let tokens = h
        .store
        .get_stored_tokens(&identity)
        .await
        .unwrap()
        .expect("tokens present");
    assert_eq!(tokens.client_id.as_deref(), Some("client_m"));
}

#[tokio::test]
async fn has_oauth_config_reflects_stored_records() {
    let h = harness();
    let identity = ServerIdentity::new("srv_6");

    assert!(!h.store.has_oauth_config(&identity).await.unwrap());

    h.store
        .set(
            CredentialKind::ClientRegistration,
            "srv_6",
            json!({ "client_id": "client_6", "registered_at": "2026-08-01T00:00:00Z" }),
        )
        .await
        .unwrap();

    assert!(h.store.has_oauth_config(&identity).await.unwrap());
}

#[tokio::test]
async fn reopening_the_database_preserves_rows() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("authprobe.db");

    {
        let db = Arc::new(Mutex::new(Database::open(&path).expect("first open")));
        let store = SqliteCredentialStore::new(db);
        store
            .set(CredentialKind::ServerUrl, "srv_7", json!({ "server_url": "https://a.example" }))
            .await
            .unwrap();
    }

    // Second open re-runs migrations on the populated file.
    let db = Arc::new(Mutex::new(Database::open(&path).expect("reopen")));
    let store = SqliteCredentialStore::new(db);
    let value = store
        .get(CredentialKind::ServerUrl, &ServerIdentity::new("srv_7"))
        .await
        .unwrap()
        .expect("row survives reopen");
    assert_eq!(value["server_url"], "https://a.example");
}
