//! # Authprobe Storage Layer
//!
//! SQLite-backed key-value persistence for the credential store contract
//! defined in `authprobe-core`, plus an in-memory store for tests.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                  Debug Flow Engine                   │
//! ├──────────────────────────────────────────────────────┤
//! │        CredentialStore trait (authprobe-core)        │
//! │   get / set / clear + read-with-migration contract   │
//! ├──────────────────────────────────────────────────────┤
//! │   SqliteCredentialStore      MemoryCredentialStore   │
//! ├──────────────────────────────────────────────────────┤
//! │                 Database (SQLite)                    │
//! └──────────────────────────────────────────────────────┘
//! ```

mod database;
mod memory_store;
mod sqlite_store;

pub use database::Database;
pub use memory_store::MemoryCredentialStore;
pub use sqlite_store::SqliteCredentialStore;
