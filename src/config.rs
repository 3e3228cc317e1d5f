//! API client configuration parsed from environment variables.

use std::time::Duration;

pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required env var {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base URL every API path is joined onto, without a trailing slash.
    pub base_url: String,
    pub timeout: Duration,
    /// Send and store cookies so the server-held refresh credential travels
    /// with `/auth/refresh-token`.
    pub with_credentials: bool,
}

impl ClientConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: normalize_base_url(&base_url.into()),
            timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            with_credentials: true,
        }
    }

    /// Build config from environment variables.
    ///
    /// Required:
    /// - `API_BASE_URL`
    ///
    /// Optional:
    /// - `API_TIMEOUT_SECS`: default 10
    ///
    /// # Errors
    ///
    /// Returns an error if `API_BASE_URL` is unset or empty, or if
    /// `API_TIMEOUT_SECS` is not a positive integer.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with_base_url(None)
    }

    /// As [`ClientConfig::from_env`], with `base_url` taking precedence over
    /// `API_BASE_URL` when given.
    ///
    /// # Errors
    ///
    /// Returns an error if no base URL is available from either source, or
    /// if `API_TIMEOUT_SECS` is not a positive integer.
    pub fn from_env_with_base_url(base_url: Option<&str>) -> Result<Self, ConfigError> {
        let base_url = base_url
            .map(str::to_owned)
            .or_else(|| std::env::var("API_BASE_URL").ok())
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing("API_BASE_URL"))?;

        let mut config = Self::new(base_url);
        if let Ok(raw) = std::env::var("API_TIMEOUT_SECS") {
            let secs = raw
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|s| *s > 0)
                .ok_or(ConfigError::Invalid { key: "API_TIMEOUT_SECS", value: raw.clone() })?;
            config.timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }

    /// Join an API path onto the base URL.
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}/{path}", self.base_url)
        }
    }
}

fn normalize_base_url(raw: &str) -> String {
    raw.trim().trim_end_matches('/').to_owned()
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
