//! Refresh-aware API client.
//!
//! ARCHITECTURE
//! ============
//! Every call goes through [`ApiClient::send`], which plays the two
//! interceptor roles around the transport:
//! - outgoing: attach `Authorization: Bearer <access token>` unless the path
//!   is a login or refresh endpoint;
//! - incoming: on 401, refresh once through the single-flight slot and
//!   resubmit the request. A request is resubmitted at most once.
//!
//! When a refresh fails the registered [`AuthFailureHandler`] runs exactly
//! once for that refresh episode, and every caller waiting on the episode
//! gets its own original 401 back.
//!
//! ERROR HANDLING
//! ==============
//! Only 401 is intercepted. Other statuses come back from `send` untouched;
//! the typed helpers turn non-2xx into `ApiError::Status`. Storage failures
//! while reading or writing tokens are propagated, never skipped.

use std::sync::{Arc, PoisonError, RwLock};

use reqwest::header::{AUTHORIZATION, HeaderValue};
use reqwest::{Method, StatusCode};
use reqwest_cookie_store::CookieStoreMutex;
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::single_flight::SingleFlight;
use super::transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport, TransportError};
use super::types::{LoginRequest, LoginResponse, RefreshResponse, VerifyResponse};
use crate::config::ClientConfig;
use crate::role::{LOGOUT_ENDPOINT, REFRESH_TOKEN_ENDPOINT, Role, VERIFY_TOKEN_ENDPOINT, is_unauthenticated_endpoint};
use crate::store::StoreError;
use crate::store::credentials::{Credentials, TokenKind};

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("API responded {status}: {}", .message.as_deref().unwrap_or("no message"))]
    Status { status: StatusCode, message: Option<String> },
    #[error("request body encoding failed: {0}")]
    Encode(String),
    #[error("response decode failed: {0}")]
    Decode(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ApiError {
    #[must_use]
    pub fn from_response(response: &HttpResponse) -> Self {
        ApiError::Status { status: response.status, message: response.message() }
    }

    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Status { status: StatusCode::UNAUTHORIZED, .. })
    }

    /// Server-provided message for status errors.
    #[must_use]
    pub fn server_message(&self) -> Option<&str> {
        match self {
            ApiError::Status { message, .. } => message.as_deref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RefreshError {
    #[error("refresh rejected with status {0}")]
    Rejected(StatusCode),
    #[error("refresh response carried no access token")]
    MissingToken,
    #[error("refresh response decode failed: {0}")]
    Decode(String),
    #[error("refresh request failed: {0}")]
    Transport(TransportError),
    #[error("refreshed token could not be stored: {0}")]
    Store(StoreError),
}

// =============================================================================
// AUTH FAILURE HOOK
// =============================================================================

/// Called when a session cannot be recovered by refreshing.
#[async_trait::async_trait]
pub trait AuthFailureHandler: Send + Sync {
    async fn on_auth_failure(&self);
}

// =============================================================================
// CLIENT
// =============================================================================

pub struct ApiClient {
    transport: Arc<dyn Transport>,
    credentials: Credentials,
    refresh: SingleFlight<Result<(), RefreshError>>,
    failure_handler: RwLock<Option<Arc<dyn AuthFailureHandler>>>,
}

impl ApiClient {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, credentials: Credentials) -> Self {
        Self { transport, credentials, refresh: SingleFlight::new(), failure_handler: RwLock::new(None) }
    }

    /// Build a client over the production `reqwest` transport.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_config(config: ClientConfig, credentials: Credentials) -> Result<Self, TransportError> {
        let transport = ReqwestTransport::new(config)?;
        Ok(Self::new(Arc::new(transport), credentials))
    }

    /// Like [`ApiClient::from_config`], but cookies (the refresh credential)
    /// go to `jar` instead of a jar private to this client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_config_with_cookies(
        config: ClientConfig,
        credentials: Credentials,
        jar: Arc<CookieStoreMutex>,
    ) -> Result<Self, TransportError> {
        let transport = ReqwestTransport::with_cookie_jar(config, jar)?;
        Ok(Self::new(Arc::new(transport), credentials))
    }

    #[must_use]
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Register the handler invoked on unrecoverable 401s, replacing any
    /// previous one.
    pub fn set_auth_failure_handler(&self, handler: Arc<dyn AuthFailureHandler>) {
        *self.failure_handler.write().unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    pub fn clear_auth_failure_handler(&self) {
        *self.failure_handler.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    #[must_use]
    pub fn refresh_in_flight(&self) -> bool {
        self.refresh.in_flight()
    }

    /// Number of refresh episodes started by this client.
    #[must_use]
    pub fn refresh_episodes(&self) -> u64 {
        self.refresh.episodes()
    }

    fn failure_handler(&self) -> Option<Arc<dyn AuthFailureHandler>> {
        self.failure_handler.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    // -------------------------------------------------------------------------
    // interceptors
    // -------------------------------------------------------------------------

    /// Send a request with bearer attachment and refresh-and-retry on 401.
    ///
    /// Returns every non-401 response as-is, including error statuses.
    ///
    /// # Errors
    ///
    /// - `ApiError::Status` (401) for a rejected login, for a 401 after the
    ///   one retry, for a request marked `without_refresh`, or when the
    ///   refresh itself failed.
    /// - `ApiError::Transport` / `ApiError::Store` from the layers below.
    pub async fn send(&self, mut request: HttpRequest) -> Result<HttpResponse, ApiError> {
        loop {
            self.attach_bearer(&mut request).await?;
            let response = self.transport.execute(&request).await.inspect_err(|e| {
                tracing::debug!(error = %e, path = %request.path, "transport error");
            })?;

            if response.status != StatusCode::UNAUTHORIZED {
                return Ok(response);
            }
            if request.retried || !request.refreshable || is_unauthenticated_endpoint(&request.path) {
                return Err(ApiError::from_response(&response));
            }
            request.retried = true;

            // A refresh that finished while this request was on the wire has
            // already replaced the token; just resend with it.
            let sent_with = request.bearer().map(str::to_owned);
            let current = self.credentials.get_token(TokenKind::AccessToken).await?;
            if current.is_some() && current != sent_with {
                tracing::debug!(path = %request.path, "access token changed in flight; retrying");
                continue;
            }

            if let Err(e) = self.refresh_access_token().await {
                tracing::debug!(error = %e, path = %request.path, "401 not recoverable");
                return Err(ApiError::from_response(&response));
            }
        }
    }

    async fn attach_bearer(&self, request: &mut HttpRequest) -> Result<(), StoreError> {
        request.headers.remove(AUTHORIZATION);
        if is_unauthenticated_endpoint(&request.path) {
            return Ok(());
        }
        if let Some(token) = self.credentials.get_token(TokenKind::AccessToken).await? {
            match HeaderValue::from_str(&format!("Bearer {token}")) {
                Ok(value) => {
                    request.headers.insert(AUTHORIZATION, value);
                }
                Err(_) => tracing::warn!("stored access token is not a valid header value; sending without it"),
            }
        }
        Ok(())
    }

    /// Obtain a new access token, joining any refresh already in flight.
    ///
    /// The refresh credential is the server's HTTP-only cookie; only the new
    /// access token is stored here, before any waiter is released. On failure
    /// the auth-failure handler runs once for the episode.
    ///
    /// # Errors
    ///
    /// Returns the shared outcome of the episode.
    pub async fn refresh_access_token(&self) -> Result<(), RefreshError> {
        let transport = Arc::clone(&self.transport);
        let credentials = self.credentials.clone();
        let on_failure = self.failure_handler();

        self.refresh
            .run(move || async move {
                let outcome = refresh_once(transport.as_ref(), &credentials).await;
                if let Err(e) = &outcome {
                    tracing::warn!(error = %e, "token refresh failed; ending session");
                    if let Some(handler) = on_failure {
                        handler.on_auth_failure().await;
                    }
                }
                outcome
            })
            .await
    }

    // -------------------------------------------------------------------------
    // typed helpers
    // -------------------------------------------------------------------------

    /// Send and decode a 2xx JSON body.
    ///
    /// # Errors
    ///
    /// As [`ApiClient::send`], plus `ApiError::Status` for any non-2xx and
    /// `ApiError::Decode` for a body that does not match `T`.
    pub async fn request_json<T: DeserializeOwned>(&self, request: HttpRequest) -> Result<T, ApiError> {
        let response = self.send(request).await?;
        if !response.is_success() {
            return Err(ApiError::from_response(&response));
        }
        response.json().map_err(ApiError::Decode)
    }

    /// # Errors
    ///
    /// See [`ApiClient::request_json`].
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.request_json(HttpRequest::get(path)).await
    }

    /// # Errors
    ///
    /// See [`ApiClient::request_json`].
    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.request_json(with_body(Method::POST, path, body)?).await
    }

    /// # Errors
    ///
    /// See [`ApiClient::request_json`].
    pub async fn put_json<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.request_json(with_body(Method::PUT, path, body)?).await
    }

    /// # Errors
    ///
    /// See [`ApiClient::request_json`].
    pub async fn delete_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.request_json(HttpRequest::new(Method::DELETE, path)).await
    }

    // -------------------------------------------------------------------------
    // auth endpoints
    // -------------------------------------------------------------------------

    /// Call the role's login endpoint. Nothing is persisted here.
    ///
    /// # Errors
    ///
    /// A rejected login surfaces as `ApiError::Status` without any refresh.
    pub async fn login(&self, role: Role, email: &str, password: &str) -> Result<LoginResponse, ApiError> {
        self.post_json(role.routes().login_endpoint, &LoginRequest { email, password })
            .await
    }

    /// # Errors
    ///
    /// See [`ApiClient::request_json`].
    pub async fn verify_token(&self) -> Result<VerifyResponse, ApiError> {
        self.get_json(VERIFY_TOKEN_ENDPOINT).await
    }

    /// Invalidate the server session. A 401 here is final; logging out never
    /// starts a refresh.
    ///
    /// # Errors
    ///
    /// Any transport failure or non-2xx status.
    pub async fn logout(&self) -> Result<(), ApiError> {
        let response = self
            .send(HttpRequest::post(LOGOUT_ENDPOINT).without_refresh())
            .await?;
        if response.is_success() { Ok(()) } else { Err(ApiError::from_response(&response)) }
    }
}

fn with_body<B: Serialize + ?Sized>(method: Method, path: &str, body: &B) -> Result<HttpRequest, ApiError> {
    let body = serde_json::to_value(body).map_err(|e| ApiError::Encode(e.to_string()))?;
    Ok(HttpRequest::new(method, path).with_json(body))
}

async fn refresh_once(transport: &dyn Transport, credentials: &Credentials) -> Result<(), RefreshError> {
    let response = transport
        .execute(&HttpRequest::post(REFRESH_TOKEN_ENDPOINT))
        .await
        .map_err(RefreshError::Transport)?;
    if !response.is_success() {
        return Err(RefreshError::Rejected(response.status));
    }

    let body: RefreshResponse = response.json().map_err(RefreshError::Decode)?;
    let success = body.success;
    let token = body
        .access_token
        .filter(|t| success && !t.is_empty())
        .ok_or(RefreshError::MissingToken)?;

    credentials
        .save_tokens(&token, None)
        .await
        .map_err(RefreshError::Store)?;
    tracing::info!("access token refreshed");
    Ok(())
}

#[cfg(test)]
#[path = "client_test.rs"]
mod tests;
