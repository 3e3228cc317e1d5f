//! File-backed credential store.
//!
//! DESIGN
//! ======
//! The whole store is one small JSON document. Every mutation is applied to a
//! copy, written to a sibling temp file, and renamed over the original, so a
//! crash mid-write leaves either the old or the new document on disk. The
//! in-memory copy is only replaced after the rename succeeds.

use std::path::{Path, PathBuf};

use tokio::sync::Mutex;

use super::{CredentialStore, Record, StoreError, Table, Tables};

pub struct FileStore {
    path: PathBuf,
    tables: Mutex<Tables>,
}

impl FileStore {
    /// Open (or create) the store at `path`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` if the parent directory cannot be
    /// created or an existing file cannot be read or parsed.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Unavailable(format!("{}: {e}", parent.display())))?;
        }

        let tables = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => Tables::default(),
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| StoreError::Unavailable(format!("{} is corrupt: {e}", path.display())))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Tables::default(),
            Err(e) => return Err(StoreError::Unavailable(format!("{}: {e}", path.display()))),
        };

        tracing::debug!(path = %path.display(), "credential file store opened");
        Ok(Self { path, tables: Mutex::new(tables) })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn mutate(&self, apply: impl FnOnce(&mut Tables)) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let mut next = tables.clone();
        apply(&mut next);
        if next == *tables {
            return Ok(());
        }
        persist(&self.path, &next).await?;
        *tables = next;
        Ok(())
    }
}

async fn persist(path: &Path, tables: &Tables) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(tables).map_err(|e| StoreError::Encode(e.to_string()))?;
    replace_file(path, &bytes).await
}

/// Write `bytes` to a sibling temp file and rename it over `path`.
pub(super) async fn replace_file(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let tmp = temp_path(path);

    if let Err(e) = tokio::fs::write(&tmp, bytes).await {
        tracing::error!(error = %e, path = %tmp.display(), "credential temp write failed");
        return Err(StoreError::Write(e.to_string()));
    }
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        tracing::error!(error = %e, path = %path.display(), "credential file replace failed");
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(StoreError::Write(e.to_string()));
    }
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(std::ffi::OsStr::to_os_string).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[async_trait::async_trait]
impl CredentialStore for FileStore {
    async fn get(&self, table: Table, id: &str) -> Result<Option<Record>, StoreError> {
        Ok(self.tables.lock().await.get(table, id))
    }

    async fn put(&self, table: Table, records: Vec<Record>) -> Result<(), StoreError> {
        self.mutate(|t| t.put(table, records)).await
    }

    async fn delete(&self, table: Table, ids: &[&str]) -> Result<(), StoreError> {
        self.mutate(|t| t.delete(table, ids)).await
    }

    async fn clear(&self, tables: &[Table]) -> Result<(), StoreError> {
        self.mutate(|t| t.clear(tables)).await
    }
}

#[cfg(test)]
#[path = "file_test.rs"]
mod tests;
