//! Per-portal session state machine.
//!
//! STATES
//! ======
//! `Uninitialized -> Checking -> Authenticated | Unauthenticated`, and
//! `Authenticated -> Unauthenticated` on logout or auth failure. The current
//! [`SessionState`] is published on a `watch` channel so views and route
//! guards can react to changes.
//!
//! DESIGN
//! ======
//! A session is mounted for exactly one [`Role`]. It registers itself as the
//! client's auth-failure handler through a weak reference, so the client
//! never keeps an unmounted session alive. `handle_auth_failure` is the only
//! place that ends a session on the client's behalf.

pub mod guard;
pub mod navigator;

use std::sync::{Arc, Weak};

use tokio::sync::watch;

pub use guard::{GuardDecision, Guarded, RouteGuard};
pub use navigator::{HistoryNavigator, Navigator};

use crate::net::client::{ApiClient, ApiError, AuthFailureHandler};
use crate::net::types::UserProfile;
use crate::role::Role;
use crate::store::StoreError;
use crate::store::credentials::{Credentials, TokenKind};

/// Server messages that all mean "wrong email or password". They are shown
/// as one generic message so the UI never reveals which half was wrong.
const CREDENTIAL_FAILURE_MESSAGES: &[&str] = &[
    "invalid credentials",
    "invalid email or password",
    "user not found",
    "invalid password",
    "incorrect password",
    "unauthorized",
];

// =============================================================================
// STATE
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    Uninitialized,
    Checking,
    Authenticated,
    Unauthenticated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub status: AuthStatus,
    pub user: Option<UserProfile>,
    /// A login or check is running.
    pub is_loading: bool,
    /// True until the first `check_auth` has finished.
    pub is_initial_loading: bool,
    /// Last login error, ready for display.
    pub error: Option<String>,
}

impl SessionState {
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            status: AuthStatus::Uninitialized,
            user: None,
            is_loading: false,
            is_initial_loading: true,
            error: None,
        }
    }
}

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Invalid login. You are trying to log in as a {expected} but your account is a {actual}.")]
    RoleMismatch { expected: Role, actual: Role },
    /// Server message passed through verbatim.
    #[error("{0}")]
    Server(String),
    #[error("login response missing {0}")]
    MalformedResponse(&'static str),
    #[error(transparent)]
    Api(ApiError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<ApiError> for SessionError {
    fn from(e: ApiError) -> Self {
        match e {
            ApiError::Store(store) => SessionError::Store(store),
            ApiError::Status { message: Some(message), .. } => classify_server_message(message),
            e if e.is_unauthorized() => SessionError::InvalidCredentials,
            e => SessionError::Api(e),
        }
    }
}

fn classify_server_message(message: String) -> SessionError {
    let normalized = message.trim().to_ascii_lowercase();
    if CREDENTIAL_FAILURE_MESSAGES.contains(&normalized.as_str()) {
        SessionError::InvalidCredentials
    } else {
        SessionError::Server(message)
    }
}

// =============================================================================
// SESSION
// =============================================================================

/// Session for one mounted portal. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    role: Role,
    client: Arc<ApiClient>,
    navigator: Arc<dyn Navigator>,
    state: watch::Sender<SessionState>,
}

struct FailureHook(Weak<SessionInner>);

#[async_trait::async_trait]
impl AuthFailureHandler for FailureHook {
    async fn on_auth_failure(&self) {
        if let Some(inner) = self.0.upgrade() {
            Session { inner }.handle_auth_failure().await;
        }
    }
}

impl Session {
    /// Mount a session for `role` and register it as the client's
    /// auth-failure handler. Call [`Session::check_auth`] once afterwards.
    #[must_use]
    pub fn mount(role: Role, client: Arc<ApiClient>, navigator: Arc<dyn Navigator>) -> Self {
        let (state, _) = watch::channel(SessionState::default());
        let inner = Arc::new(SessionInner { role, client, navigator, state });
        inner
            .client
            .set_auth_failure_handler(Arc::new(FailureHook(Arc::downgrade(&inner))));
        tracing::debug!(%role, "session mounted");
        Self { inner }
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.inner.role
    }

    #[must_use]
    pub fn client(&self) -> &Arc<ApiClient> {
        &self.inner.client
    }

    fn credentials(&self) -> &Credentials {
        self.inner.client.credentials()
    }

    /// Snapshot of the current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    #[must_use]
    pub fn user(&self) -> Option<UserProfile> {
        self.inner.state.borrow().user.clone()
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.inner.state.borrow().is_authenticated()
    }

    fn update(&self, apply: impl FnOnce(&mut SessionState)) {
        self.inner.state.send_modify(apply);
    }

    fn navigate(&self, route: &str) {
        self.inner.navigator.navigate(route);
    }

    // -------------------------------------------------------------------------
    // check_auth
    // -------------------------------------------------------------------------

    /// Restore the session from the credential store and confirm it with the
    /// server. Always leaves `is_initial_loading` false.
    ///
    /// Missing token or profile resolves unauthenticated without a network
    /// call. A stored profile for another role, a failed verification, or a
    /// verified id that differs from the stored profile clears all stored
    /// data.
    ///
    /// # Errors
    ///
    /// Only storage failures are returned; the session is left
    /// unauthenticated.
    pub async fn check_auth(&self) -> Result<bool, SessionError> {
        self.update(|s| {
            s.status = AuthStatus::Checking;
            s.is_loading = true;
        });

        let outcome = self.restore().await;
        let user = outcome.as_ref().ok().cloned().flatten();
        let authenticated = user.is_some();
        self.update(|s| {
            s.status = if authenticated { AuthStatus::Authenticated } else { AuthStatus::Unauthenticated };
            s.user = user;
            s.is_loading = false;
            s.is_initial_loading = false;
        });

        match outcome {
            Ok(_) => Ok(authenticated),
            Err(e) => {
                tracing::error!(error = %e, role = %self.role(), "session restore failed");
                Err(e)
            }
        }
    }

    async fn restore(&self) -> Result<Option<UserProfile>, SessionError> {
        let credentials = self.credentials();
        let token = credentials.get_token(TokenKind::AccessToken).await?;
        let profile = credentials.get_user_data().await?;
        let (Some(_), Some(profile)) = (token, profile) else {
            return Ok(None);
        };

        if profile.role != self.role() {
            tracing::info!(stored = %profile.role, expected = %self.role(), "stored profile is for another portal");
            credentials.clear_all_data().await?;
            return Ok(None);
        }

        match self.inner.client.verify_token().await {
            Ok(verified) if verified.success && verified.user.as_ref().is_some_and(|u| u.id == profile.id) => {
                Ok(Some(profile))
            }
            Ok(_) => {
                tracing::info!(user_id = %profile.id, "token verification did not match stored profile");
                credentials.clear_all_data().await?;
                Ok(None)
            }
            Err(ApiError::Store(e)) => Err(e.into()),
            Err(e) => {
                tracing::info!(error = %e, "token verification failed");
                credentials.clear_all_data().await?;
                Ok(None)
            }
        }
    }

    // -------------------------------------------------------------------------
    // login / logout
    // -------------------------------------------------------------------------

    /// Log in through this portal's endpoint. On success the token and
    /// profile are stored together and the user is sent to the dashboard. On
    /// failure nothing is stored and the error is kept in `state().error`.
    ///
    /// # Errors
    ///
    /// - `SessionError::InvalidCredentials` for known credential failures;
    /// - `SessionError::RoleMismatch` when the account belongs to another
    ///   portal;
    /// - `SessionError::Server` with the server's own message otherwise.
    pub async fn login(&self, email: &str, password: &str) -> Result<UserProfile, SessionError> {
        self.update(|s| {
            s.is_loading = true;
            s.error = None;
        });

        let result = self.try_login(email, password).await;

        match &result {
            Ok(user) => {
                let user = user.clone();
                self.update(|s| {
                    s.status = AuthStatus::Authenticated;
                    s.user = Some(user);
                    s.is_loading = false;
                });
                tracing::info!(role = %self.role(), "login succeeded");
                self.navigate(self.role().routes().dashboard_route);
            }
            Err(e) => {
                let message = e.to_string();
                tracing::warn!(error = %message, role = %self.role(), "login failed");
                self.update(|s| {
                    s.error = Some(message);
                    s.is_loading = false;
                });
            }
        }
        result
    }

    async fn try_login(&self, email: &str, password: &str) -> Result<UserProfile, SessionError> {
        let role = self.role();
        let response = self.inner.client.login(role, email, password).await?;
        if !response.success {
            return Err(match response.message {
                Some(message) => classify_server_message(message),
                None => SessionError::InvalidCredentials,
            });
        }

        let user = response.user.ok_or(SessionError::MalformedResponse("user"))?;
        if user.role != role {
            return Err(SessionError::RoleMismatch { expected: role, actual: user.role });
        }
        let token = response
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or(SessionError::MalformedResponse("accessToken"))?;

        self.credentials().save_session(&token, &user).await?;
        Ok(user)
    }

    /// End the session. The server call is best-effort; local state is
    /// always cleared and the user is sent to the portal's login page.
    ///
    /// # Errors
    ///
    /// Only a failure to clear the credential store is returned, after the
    /// in-memory session has already been ended.
    pub async fn logout(&self) -> Result<(), SessionError> {
        if let Err(e) = self.inner.client.logout().await {
            tracing::warn!(error = %e, "server logout failed; clearing local session anyway");
        }

        let cleared = self.credentials().clear_all_data().await;
        self.end_session();

        cleared.map_err(|e| {
            tracing::error!(error = %e, "credential store could not be cleared on logout");
            e.into()
        })
    }

    /// Clear everything and return to the login page. Invoked by the client
    /// when a 401 cannot be recovered.
    pub async fn handle_auth_failure(&self) {
        tracing::info!(role = %self.role(), "session expired");
        if let Err(e) = self.credentials().clear_all_data().await {
            tracing::error!(error = %e, "credential store could not be cleared after auth failure");
        }
        self.end_session();
    }

    fn end_session(&self) {
        self.update(|s| {
            s.status = AuthStatus::Unauthenticated;
            s.user = None;
            s.error = None;
            s.is_loading = false;
        });
        self.navigate(self.role().routes().login_route);
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
