//! Token and profile records on top of a `CredentialStore`.
//!
//! Record ids are fixed: `accessToken` / `refreshToken` in `auth-tokens`,
//! `userData` in `user-data`. Tokens older than `MAX_TOKEN_AGE` are treated
//! as absent and purged on read. The age check is a client-side shortcut;
//! the server's own expiry is what actually ends a session.

use std::sync::Arc;
use std::time::Duration;

use super::{CredentialStore, Record, StoreError, Table};
use crate::net::types::UserProfile;

pub const MAX_TOKEN_AGE: Duration = Duration::from_secs(30 * 24 * 60 * 60);
pub const USER_DATA_ID: &str = "userData";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    AccessToken,
    RefreshToken,
}

impl TokenKind {
    #[must_use]
    pub const fn id(self) -> &'static str {
        match self {
            TokenKind::AccessToken => "accessToken",
            TokenKind::RefreshToken => "refreshToken",
        }
    }
}

const TOKEN_IDS: [&str; 2] = [TokenKind::AccessToken.id(), TokenKind::RefreshToken.id()];

// =============================================================================
// CLOCK
// =============================================================================

/// Source of record timestamps, in epoch milliseconds.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        let nanos = time::OffsetDateTime::now_utc().unix_timestamp_nanos();
        i64::try_from(nanos / 1_000_000).unwrap_or(i64::MAX)
    }
}

// =============================================================================
// CREDENTIALS
// =============================================================================

/// Typed access to the persisted session. Cheap to clone; clones share the
/// same backend.
#[derive(Clone)]
pub struct Credentials {
    store: Arc<dyn CredentialStore>,
    clock: Arc<dyn Clock>,
}

impl Credentials {
    #[must_use]
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(store: Arc<dyn CredentialStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Persist the access token, and the refresh token when given, in one
    /// write. Returns `Ok(false)` without touching the store when
    /// `access_token` is empty.
    ///
    /// # Errors
    ///
    /// Propagates backend failures.
    pub async fn save_tokens(&self, access_token: &str, refresh_token: Option<&str>) -> Result<bool, StoreError> {
        if access_token.is_empty() {
            tracing::warn!("refusing to persist an empty access token");
            return Ok(false);
        }

        let now = self.clock.now_millis();
        let mut records = vec![token_record(TokenKind::AccessToken, access_token, now)];
        if let Some(refresh) = refresh_token.filter(|r| !r.is_empty()) {
            records.push(token_record(TokenKind::RefreshToken, refresh, now));
        }
        self.store.put(Table::AuthTokens, records).await?;
        Ok(true)
    }

    /// Read a token. A record past `MAX_TOKEN_AGE` purges every token record
    /// and reads as `None`.
    ///
    /// # Errors
    ///
    /// Propagates backend failures.
    pub async fn get_token(&self, kind: TokenKind) -> Result<Option<String>, StoreError> {
        let Some(record) = self.store.get(Table::AuthTokens, kind.id()).await? else {
            return Ok(None);
        };

        if self.is_expired(record.timestamp) {
            tracing::info!(token = kind.id(), "stored token exceeded max age; purging tokens");
            self.remove_tokens().await?;
            return Ok(None);
        }

        match record.value {
            serde_json::Value::String(token) if !token.is_empty() => Ok(Some(token)),
            _ => {
                tracing::warn!(token = kind.id(), "stored token is not a string; ignoring");
                Ok(None)
            }
        }
    }

    /// Delete both token records. Absent records are fine.
    ///
    /// # Errors
    ///
    /// Propagates backend failures.
    pub async fn remove_tokens(&self) -> Result<(), StoreError> {
        self.store.delete(Table::AuthTokens, &TOKEN_IDS).await
    }

    /// # Errors
    ///
    /// Propagates backend and encoding failures.
    pub async fn save_user_data(&self, profile: &UserProfile) -> Result<(), StoreError> {
        let value = serde_json::to_value(profile).map_err(|e| StoreError::Encode(e.to_string()))?;
        let record = Record { id: USER_DATA_ID.to_owned(), value, timestamp: self.clock.now_millis() };
        self.store.put(Table::UserData, vec![record]).await
    }

    /// Read the stored profile. A record that no longer decodes reads as
    /// `None`.
    ///
    /// # Errors
    ///
    /// Propagates backend failures.
    pub async fn get_user_data(&self) -> Result<Option<UserProfile>, StoreError> {
        let Some(record) = self.store.get(Table::UserData, USER_DATA_ID).await? else {
            return Ok(None);
        };
        match serde_json::from_value(record.value) {
            Ok(profile) => Ok(Some(profile)),
            Err(e) => {
                tracing::warn!(error = %e, "stored user profile is unreadable; ignoring");
                Ok(None)
            }
        }
    }

    /// Remove every token and profile record in one call.
    ///
    /// # Errors
    ///
    /// Propagates backend failures.
    pub async fn clear_all_data(&self) -> Result<(), StoreError> {
        self.store.clear(&[Table::AuthTokens, Table::UserData]).await
    }

    /// Persist a fresh login: access token plus profile. When the profile
    /// write fails the token is cleared again so the store never holds one
    /// without the other. Returns `Ok(false)` for an empty token.
    ///
    /// # Errors
    ///
    /// Propagates the first backend failure.
    pub async fn save_session(&self, access_token: &str, profile: &UserProfile) -> Result<bool, StoreError> {
        if !self.save_tokens(access_token, None).await? {
            return Ok(false);
        }
        if let Err(e) = self.save_user_data(profile).await {
            tracing::error!(error = %e, "profile write failed after token write; rolling back");
            if let Err(rollback) = self.clear_all_data().await {
                tracing::error!(error = %rollback, "credential rollback failed");
            }
            return Err(e);
        }
        Ok(true)
    }

    fn is_expired(&self, timestamp: i64) -> bool {
        let max_age = i64::try_from(MAX_TOKEN_AGE.as_millis()).unwrap_or(i64::MAX);
        self.clock.now_millis().saturating_sub(timestamp) > max_age
    }
}

fn token_record(kind: TokenKind, token: &str, timestamp: i64) -> Record {
    Record { id: kind.id().to_owned(), value: serde_json::Value::String(token.to_owned()), timestamp }
}

#[cfg(test)]
#[path = "credentials_test.rs"]
mod tests;
