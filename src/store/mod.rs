//! Local credential persistence.
//!
//! ARCHITECTURE
//! ============
//! `CredentialStore` is the raw keyed-record interface (two tables, upsert /
//! read / delete / clear). Backends:
//! - `memory::MemoryStore`: in-process, used by tests and session-only runs.
//! - `file::FileStore`: a JSON document on disk, replaced atomically on
//!   every mutation.
//!
//! `cookies::CookieJarFile` keeps the HTTP cookie jar (and with it the
//! server-held refresh cookie) on disk for hosts that restart between runs.
//!
//! `credentials::Credentials` layers the token/profile semantics (max token
//! age, paired writes) over whichever backend is injected.
//!
//! ERROR HANDLING
//! ==============
//! A missing or broken backend is reported as `StoreError::Unavailable` and
//! propagated. Callers never get a silent no-op for security-sensitive state.

pub mod cookies;
pub mod credentials;
pub mod file;
pub mod memory;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// The two logical tables of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    AuthTokens,
    UserData,
}

/// One stored record. `timestamp` is the write time in epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub value: serde_json::Value,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("credential store unavailable: {0}")]
    Unavailable(String),
    #[error("credential store write failed: {0}")]
    Write(String),
    #[error("credential record encoding failed: {0}")]
    Encode(String),
}

/// Keyed record storage. Each call is applied as a unit: a batch `put`,
/// `delete` or `clear` either lands completely or not at all.
#[async_trait::async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get(&self, table: Table, id: &str) -> Result<Option<Record>, StoreError>;

    /// Upsert every record in `records` into `table`.
    async fn put(&self, table: Table, records: Vec<Record>) -> Result<(), StoreError>;

    /// Delete the given ids. Missing ids are not an error.
    async fn delete(&self, table: Table, ids: &[&str]) -> Result<(), StoreError>;

    /// Empty every listed table.
    async fn clear(&self, tables: &[Table]) -> Result<(), StoreError>;
}

// =============================================================================
// SHARED TABLE DOCUMENT
// =============================================================================

/// In-memory shape shared by both backends; also the on-disk JSON layout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct Tables {
    #[serde(rename = "auth-tokens", default)]
    auth_tokens: BTreeMap<String, Record>,
    #[serde(rename = "user-data", default)]
    user_data: BTreeMap<String, Record>,
}

impl Tables {
    fn table(&self, table: Table) -> &BTreeMap<String, Record> {
        match table {
            Table::AuthTokens => &self.auth_tokens,
            Table::UserData => &self.user_data,
        }
    }

    fn table_mut(&mut self, table: Table) -> &mut BTreeMap<String, Record> {
        match table {
            Table::AuthTokens => &mut self.auth_tokens,
            Table::UserData => &mut self.user_data,
        }
    }

    pub(crate) fn get(&self, table: Table, id: &str) -> Option<Record> {
        self.table(table).get(id).cloned()
    }

    pub(crate) fn put(&mut self, table: Table, records: Vec<Record>) {
        let rows = self.table_mut(table);
        for record in records {
            rows.insert(record.id.clone(), record);
        }
    }

    pub(crate) fn delete(&mut self, table: Table, ids: &[&str]) {
        let rows = self.table_mut(table);
        for id in ids {
            rows.remove(*id);
        }
    }

    pub(crate) fn clear(&mut self, tables: &[Table]) {
        for table in tables {
            self.table_mut(*table).clear();
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.auth_tokens.is_empty() && self.user_data.is_empty()
    }
}
