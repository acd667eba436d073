//! Remote store configuration.
//!
//! A `StoreConfig` is built once by the embedding application and handed to
//! [`crate::api::RemoteStore`] explicitly. There is no ambient global
//! configuration; tests and offline tooling construct their own.

use std::time::Duration;

/// Default timeout for API requests (30 seconds).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for the remote REST backend.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Normalized base URL, no trailing slash (e.g. `https://shop.example.com`).
    pub base_url: String,
    /// Bearer token attached as `Authorization: Bearer <token>` when present.
    pub auth_token: Option<String>,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl StoreConfig {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: normalize_base_url(base_url),
            auth_token: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Normalise the backend URL:
/// - strip trailing slashes
/// - ensure a scheme is present (https, or http for localhost)
pub fn normalize_base_url(url: &str) -> String {
    let mut url = url.trim().to_string();

    // Ensure scheme
    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    // Strip trailing slashes
    while url.ends_with('/') {
        url.pop();
    }

    url
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_adds_scheme() {
        assert_eq!(
            normalize_base_url("shop.example.com"),
            "https://shop.example.com"
        );
        assert_eq!(
            normalize_base_url("localhost:8000"),
            "http://localhost:8000"
        );
        assert_eq!(
            normalize_base_url("127.0.0.1:8000"),
            "http://127.0.0.1:8000"
        );
    }

    #[test]
    fn test_normalize_strips_trailing_slashes() {
        assert_eq!(
            normalize_base_url("https://shop.example.com///"),
            "https://shop.example.com"
        );
        assert_eq!(
            normalize_base_url("  http://localhost:8000/ "),
            "http://localhost:8000"
        );
    }

    #[test]
    fn test_config_builder() {
        let config = StoreConfig::new("localhost:8000").with_token("abc");
        assert_eq!(config.base_url, "http://localhost:8000");
        assert_eq!(config.auth_token.as_deref(), Some("abc"));
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
    }
}
