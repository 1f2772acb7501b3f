//! Connection settings for the commerce backend.

use std::env;
use std::time::Duration;

use crate::error::{CommerceApiError, Result};

/// Default timeout for API requests.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_STORE_CODE: &str = "default";
pub const DEFAULT_STORE_ID: i64 = 1;

pub const ENV_API_URL: &str = "STOREFRONT_API_URL";
pub const ENV_STORE_CODE: &str = "STOREFRONT_STORE_CODE";
pub const ENV_STORE_ID: &str = "STOREFRONT_STORE_ID";
pub const ENV_MEDIA_URL: &str = "STOREFRONT_MEDIA_URL";
pub const ENV_TIMEOUT_SECS: &str = "STOREFRONT_TIMEOUT_SECS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Backend origin, e.g. `https://shop.example.com`. No trailing slash.
    pub base_url: String,
    pub store_code: String,
    /// Store view guest carts are assigned into on login.
    pub store_id: i64,
    /// Prefix for product media file paths.
    pub media_base_url: String,
    /// Absolute per-request timeout.
    pub timeout: Duration,
}

impl ClientConfig {
    pub fn new(base_url: &str) -> Self {
        let base_url = base_url.trim_end_matches('/').to_string();
        Self {
            media_base_url: format!("{}/media/catalog/product", base_url),
            base_url,
            store_code: DEFAULT_STORE_CODE.to_string(),
            store_id: DEFAULT_STORE_ID,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// Build from `STOREFRONT_*` environment variables. Only the API URL is required.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let value = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let base_url = value(ENV_API_URL).ok_or_else(|| {
            CommerceApiError::invalid_request(format!("{} is not set", ENV_API_URL))
        })?;
        let mut config = Self::new(&base_url);

        if let Some(store_code) = value(ENV_STORE_CODE) {
            config.store_code = store_code;
        }
        if let Some(store_id) = value(ENV_STORE_ID) {
            config.store_id = store_id.parse().map_err(|_| {
                CommerceApiError::invalid_request(format!(
                    "{} must be an integer, got '{}'",
                    ENV_STORE_ID, store_id
                ))
            })?;
        }
        if let Some(media_url) = value(ENV_MEDIA_URL) {
            config.media_base_url = media_url.trim_end_matches('/').to_string();
        }
        if let Some(secs) = value(ENV_TIMEOUT_SECS) {
            let secs: u64 = secs.parse().map_err(|_| {
                CommerceApiError::invalid_request(format!(
                    "{} must be a number of seconds, got '{}'",
                    ENV_TIMEOUT_SECS, secs
                ))
            })?;
            config.timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }

    pub fn with_store_code(mut self, store_code: impl Into<String>) -> Self {
        self.store_code = store_code.into();
        self
    }

    pub fn with_store_id(mut self, store_id: i64) -> Self {
        self.store_id = store_id;
        self
    }

    pub fn with_media_base_url(mut self, media_base_url: &str) -> Self {
        self.media_base_url = media_base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Root of the versioned REST API for the configured store view.
    pub fn rest_root(&self) -> String {
        format!("{}/rest/{}/V1", self.base_url, self.store_code)
    }
}
