//! In-process credential store.

use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{CredentialStore, Record, StoreError, Table, Tables};

/// Credential store that lives for the process. Can be built in an
/// "unavailable" mode where every call fails, mirroring a host without
/// persistent storage.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    unavailable: Option<String>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose every operation fails with `StoreError::Unavailable`.
    #[must_use]
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self { tables: Mutex::new(Tables::default()), unavailable: Some(reason.into()) }
    }

    /// True when no record exists in any table.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(&self) -> Result<(), StoreError> {
        match &self.unavailable {
            Some(reason) => Err(StoreError::Unavailable(reason.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl CredentialStore for MemoryStore {
    async fn get(&self, table: Table, id: &str) -> Result<Option<Record>, StoreError> {
        self.check()?;
        Ok(self.lock().get(table, id))
    }

    async fn put(&self, table: Table, records: Vec<Record>) -> Result<(), StoreError> {
        self.check()?;
        self.lock().put(table, records);
        Ok(())
    }

    async fn delete(&self, table: Table, ids: &[&str]) -> Result<(), StoreError> {
        self.check()?;
        self.lock().delete(table, ids);
        Ok(())
    }

    async fn clear(&self, tables: &[Table]) -> Result<(), StoreError> {
        self.check()?;
        self.lock().clear(tables);
        Ok(())
    }
}

#[cfg(test)]
#[path = "memory_test.rs"]
mod tests;
