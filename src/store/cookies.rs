//! Cookie jar kept on disk.
//!
//! The refresh credential is an HTTP-only cookie that never passes through
//! `Credentials`. A browser keeps it across reloads; a process that exits
//! between runs has to keep the jar itself, or every restart loses the
//! ability to refresh. The jar is written with the same temp-and-rename
//! replacement as `FileStore`, session cookies included.

use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError};

use cookie_store::CookieStore;
use reqwest_cookie_store::CookieStoreMutex;

use super::StoreError;
use super::file::replace_file;

pub struct CookieJarFile {
    path: PathBuf,
    jar: Arc<CookieStoreMutex>,
}

impl CookieJarFile {
    /// Load the jar at `path`, or start empty when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` if the parent directory cannot be
    /// created or the file cannot be read or parsed.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Unavailable(format!("{}: {e}", parent.display())))?;
        }

        let cookies = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => CookieStore::default(),
            Ok(bytes) => cookie_store::serde::json::load_all(bytes.as_slice())
                .map_err(|e| StoreError::Unavailable(format!("{} is corrupt: {e}", path.display())))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => CookieStore::default(),
            Err(e) => return Err(StoreError::Unavailable(format!("{}: {e}", path.display()))),
        };

        tracing::debug!(path = %path.display(), "cookie jar opened");
        Ok(Self { path, jar: Arc::new(CookieStoreMutex::new(cookies)) })
    }

    /// The shared jar to hand to the HTTP client.
    #[must_use]
    pub fn jar(&self) -> Arc<CookieStoreMutex> {
        Arc::clone(&self.jar)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the current jar to disk.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Encode` if the jar cannot be serialized and
    /// `StoreError::Write` if the file cannot be replaced.
    pub async fn save(&self) -> Result<(), StoreError> {
        let mut bytes = Vec::new();
        {
            let cookies = self.jar.lock().unwrap_or_else(PoisonError::into_inner);
            cookie_store::serde::json::save_incl_expired_and_nonpersistent(&cookies, &mut bytes)
                .map_err(|e| StoreError::Encode(e.to_string()))?;
        }
        replace_file(&self.path, &bytes).await
    }
}

#[cfg(test)]
#[path = "cookies_test.rs"]
mod tests;
