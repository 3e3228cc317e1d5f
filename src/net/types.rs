//! Wire types for the auth endpoints.

use serde::{Deserialize, Serialize};

use crate::role::Role;

/// Signed-in user as returned by login and kept in the credential store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
}

#[derive(Debug, Serialize)]
pub struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    #[serde(default)]
    pub success: bool,
    pub access_token: Option<String>,
    pub user: Option<UserProfile>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    #[serde(default)]
    pub success: bool,
    pub access_token: Option<String>,
}

/// Minimal identity echoed back by `/auth/verify-token`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VerifiedUser {
    pub id: String,
    pub role: Option<Role>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerifyResponse {
    #[serde(default)]
    pub success: bool,
    pub user: Option<VerifiedUser>,
}

/// Error body shape used by the API for non-2xx responses.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ErrorBody {
    pub message: Option<String>,
    pub error: Option<String>,
}

#[cfg(test)]
#[path = "types_test.rs"]
mod tests;
