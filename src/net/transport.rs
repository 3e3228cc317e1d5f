//! Wire transport: one request in, one response out.
//!
//! `ReqwestTransport` is the production implementation. Interceptor logic in
//! `client` only sees the `Transport` trait, so it can be driven by a scripted
//! fake in tests.

use std::sync::Arc;

use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Method, StatusCode};
use reqwest_cookie_store::CookieStoreMutex;
use serde::de::DeserializeOwned;

use super::types::ErrorBody;
use crate::config::ClientConfig;

// =============================================================================
// REQUEST / RESPONSE
// =============================================================================

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    /// API path relative to the configured base URL.
    pub path: String,
    pub headers: HeaderMap,
    pub body: Option<serde_json::Value>,
    /// Set once the request has been resubmitted after a refresh.
    pub retried: bool,
    /// Whether a 401 on this request may start a refresh.
    pub refreshable: bool,
}

impl HttpRequest {
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: None,
            retried: false,
            refreshable: true,
        }
    }

    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    #[must_use]
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    #[must_use]
    pub fn with_json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// A 401 on this request is final; no refresh is attempted.
    #[must_use]
    pub fn without_refresh(mut self) -> Self {
        self.refreshable = false;
        self
    }

    /// The bearer token attached to this request, if any.
    #[must_use]
    pub fn bearer(&self) -> Option<&str> {
        self.headers
            .get(reqwest::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub body: String,
}

impl HttpResponse {
    #[must_use]
    pub fn new(status: StatusCode, body: impl Into<String>) -> Self {
        Self { status, body: body.into() }
    }

    #[must_use]
    pub fn json_body(status: StatusCode, body: &serde_json::Value) -> Self {
        Self::new(status, body.to_string())
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Decode the body as JSON. An empty body decodes as `null`.
    ///
    /// # Errors
    ///
    /// Returns the serde error text when the body does not match `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, String> {
        let body = if self.body.trim().is_empty() { "null" } else { self.body.as_str() };
        serde_json::from_str(body).map_err(|e| e.to_string())
    }

    /// Server-provided error message from a `{ "message": ... }` or
    /// `{ "error": ... }` body.
    #[must_use]
    pub fn message(&self) -> Option<String> {
        let body: ErrorBody = serde_json::from_str(&self.body).unwrap_or_default();
        body.message.or(body.error).filter(|m| !m.trim().is_empty())
    }
}

// =============================================================================
// ERROR
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request failed: {0}")]
    Request(String),
    #[error("HTTP client build failed: {0}")]
    Build(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout
        } else if e.is_connect() {
            TransportError::Connect(e.to_string())
        } else if e.is_builder() {
            TransportError::Build(e.to_string())
        } else {
            TransportError::Request(e.to_string())
        }
    }
}

// =============================================================================
// TRANSPORT
// =============================================================================

#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// `reqwest`-backed transport with a fixed timeout, JSON defaults, and a
/// cookie jar so the HTTP-only refresh cookie is sent back to the server.
pub struct ReqwestTransport {
    http: reqwest::Client,
    config: ClientConfig,
}

impl ReqwestTransport {
    /// Transport with an in-memory cookie jar that lives as long as the
    /// transport.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(config: ClientConfig) -> Result<Self, TransportError> {
        Self::build(config, None)
    }

    /// Transport sharing `jar`, typically loaded from a `CookieJarFile` so
    /// the refresh cookie outlives the process.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn with_cookie_jar(config: ClientConfig, jar: Arc<CookieStoreMutex>) -> Result<Self, TransportError> {
        Self::build(config, Some(jar))
    }

    fn build(config: ClientConfig, jar: Option<Arc<CookieStoreMutex>>) -> Result<Self, TransportError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let builder = reqwest::Client::builder()
            .timeout(config.timeout)
            .default_headers(headers);
        let builder = match jar {
            Some(jar) if config.with_credentials => builder.cookie_provider(jar),
            _ => builder.cookie_store(config.with_credentials),
        };
        let http = builder.build().map_err(|e| TransportError::Build(e.to_string()))?;
        Ok(Self { http, config })
    }
}

#[async_trait::async_trait]
impl Transport for ReqwestTransport {
    async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let url = self.config.url(&request.path);
        let mut builder = self
            .http
            .request(request.method.clone(), &url)
            .headers(request.headers.clone());
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            tracing::warn!(error = %e, method = %request.method, %url, "API request failed");
            TransportError::from(e)
        })?;
        let status = response.status();
        let body = response.text().await.map_err(TransportError::from)?;
        Ok(HttpResponse { status, body })
    }
}

#[cfg(test)]
#[path = "transport_test.rs"]
mod tests;
