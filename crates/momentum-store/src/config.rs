//! Connection settings for the remote store.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::StoreError;

// Validation constants
const MIN_TIMEOUT_SECS: u64 = 1;
const MAX_TIMEOUT_SECS: u64 = 300;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Configuration for [`StoreClient`](crate::StoreClient) and
/// [`RealtimeClient`](crate::RealtimeClient).
///
/// # Examples
///
/// ```rust
/// use momentum_store::StoreConfig;
///
/// let config = StoreConfig::builder("https://project.example.co", "anon-key")
///     .request_timeout_secs(15)
///     .build()
///     .unwrap();
/// assert_eq!(config.realtime_url(), "wss://project.example.co/realtime/v1/websocket?apikey=anon-key&vsn=1.0.0");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Base URL of the backend project, without a trailing slash.
    pub url: String,

    /// Public (anon) API key sent with every request.
    pub anon_key: String,

    /// Total request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Connection timeout in seconds.
    pub connect_timeout_secs: u64,
}

impl StoreConfig {
    /// Start building a configuration.
    pub fn builder(url: impl Into<String>, anon_key: impl Into<String>) -> StoreConfigBuilder {
        StoreConfigBuilder {
            config: StoreConfig {
                url: url.into().trim_end_matches('/').to_string(),
                anon_key: anon_key.into(),
                request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
                connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            },
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), StoreError> {
        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            return Err(StoreError::Config(format!(
                "url must start with http:// or https://, got '{}'",
                self.url
            )));
        }
        if self.anon_key.trim().is_empty() {
            return Err(StoreError::Config("anon key must not be empty".to_string()));
        }
        for (name, secs) in [
            ("request timeout", self.request_timeout_secs),
            ("connect timeout", self.connect_timeout_secs),
        ] {
            if !(MIN_TIMEOUT_SECS..=MAX_TIMEOUT_SECS).contains(&secs) {
                return Err(StoreError::Config(format!(
                    "{} must be between {} and {} seconds, got {}",
                    name, MIN_TIMEOUT_SECS, MAX_TIMEOUT_SECS, secs
                )));
            }
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// REST endpoint for a table.
    pub fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.url, table)
    }

    /// Auth endpoint for the given path (e.g. `token`).
    pub fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.url, path)
    }

    /// Edge function endpoint.
    pub fn function_url(&self, name: &str) -> String {
        format!("{}/functions/v1/{}", self.url, name)
    }

    /// Websocket URL for the realtime transport.
    pub fn realtime_url(&self) -> String {
        let ws_base = if let Some(rest) = self.url.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = self.url.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            self.url.clone()
        };
        format!(
            "{}/realtime/v1/websocket?apikey={}&vsn=1.0.0",
            ws_base, self.anon_key
        )
    }
}

/// Builder for [`StoreConfig`].
#[derive(Debug, Clone)]
pub struct StoreConfigBuilder {
    config: StoreConfig,
}

impl StoreConfigBuilder {
    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs;
        self
    }

    pub fn connect_timeout_secs(mut self, secs: u64) -> Self {
        self.config.connect_timeout_secs = secs;
        self
    }

    /// Validate and build.
    pub fn build(self) -> Result<StoreConfig, StoreError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
